//! Owner side of the sharing protocol.

use std::sync::Arc;
use tracing::{debug, info, warn};

use sealshare_common::{Error, FileId, Namespace, Result, Username};
use sealshare_crypto::{DocumentKey, RsaPublicKey, SymmetricKey};
use sealshare_vault::{ActiveSession, VaultClient};

/// Shares and unshares files owned by the logged-in user.
pub struct SharingOrchestrator {
    client: Arc<VaultClient>,
}

impl SharingOrchestrator {
    pub fn new(client: Arc<VaultClient>) -> Self {
        Self { client }
    }

    /// Give `recipient` the ability to decrypt `file`.
    ///
    /// The file is re-encrypted under a document key, uploaded to the
    /// shared namespace, and the document key is registered twice: wrapped
    /// under the owner's master key and under the recipient's certified
    /// public key. A file that is already shared keeps its document key so
    /// earlier recipients keep access.
    ///
    /// # Preconditions
    /// - Caller is logged in and owns `file`
    ///
    /// # Postconditions
    /// - The file is CLOSED at its shared path
    /// - A pending share for `recipient` exists on the server
    ///
    /// # Errors
    /// - `Trust` if the recipient's certificate does not verify; nothing
    ///   has been changed locally or remotely at that point
    /// - Any failure after re-encryption rolls the local file back to its
    ///   previous state. An upload that already happened is not undone.
    pub async fn share(&self, file: &FileId, recipient: &Username) -> Result<()> {
        let active = self.client.session().current().await?;
        if file.owner() != active.username() {
            return Err(Error::NotPermitted(format!(
                "Only the owner may share {}",
                file
            )));
        }
        if recipient == active.username() {
            return Err(Error::InvalidInput(
                "Cannot share a file with yourself".to_string(),
            ));
        }

        let certificate = self.client.remote().retrieve(recipient).await?;
        let public_key = self.client.trust_anchor().verify(&certificate, recipient)?;
        debug!(file = %file, recipient = %recipient, "Recipient certificate verified");

        let (namespace, current_key) = self.client.resolve_key(&active, file).await?;
        let document_key = match namespace {
            Namespace::Shared => DocumentKey::from_symmetric(current_key.clone()),
            Namespace::Personal => DocumentKey::generate(current_key.len())?,
        };

        let opened_here = !self.client.tracker().lock().await.is_open(file);
        if opened_here {
            self.client.open(file).await?;
        }

        let result = self
            .rekey_and_register(&active, file, recipient, &document_key, &public_key)
            .await;

        if let Err(e) = &result {
            warn!(file = %file, recipient = %recipient, error = %e, "Share failed, rolling back");
            self.restore(file, opened_here, &current_key).await;
        }
        result
    }

    async fn rekey_and_register(
        &self,
        active: &ActiveSession,
        file: &FileId,
        recipient: &Username,
        document_key: &DocumentKey,
        public_key: &RsaPublicKey,
    ) -> Result<()> {
        let mut tracker = self.client.tracker().lock().await;
        let staged = tracker.stage_close(file, document_key.as_symmetric(), Namespace::Shared)?;

        let data = std::fs::read(&staged)?;
        self.client
            .remote()
            .upload(active.credentials(), file, Namespace::Shared, data)
            .await?;

        let codec = self.client.codec();
        let owner_key = codec.wrap_with_symmetric_key(document_key, active.keys().symmetric())?;
        let recipient_key = codec.wrap_with_public_key(document_key, public_key)?;

        self.client
            .remote()
            .register_share(active.credentials(), file, recipient, &owner_key, &recipient_key)
            .await?;

        tracker.commit_close(file)?;
        info!(file = %file, recipient = %recipient, "Share registered");
        Ok(())
    }

    /// Put the file back the way it was before a failed share.
    async fn restore(&self, file: &FileId, opened_here: bool, original_key: &SymmetricKey) {
        let mut tracker = self.client.tracker().lock().await;
        if let Err(e) = tracker.rollback_close(file) {
            warn!(file = %file, error = %e, "Rollback failed");
        }
        if opened_here && tracker.is_open(file) {
            if let Err(e) = tracker.close(file, original_key) {
                warn!(file = %file, error = %e, "Failed to re-close file after rollback");
            }
        }
    }

    /// Revoke `recipient`'s access to `file`.
    ///
    /// The document key is not rotated: a recipient who already accepted
    /// the share can still decrypt copies they fetched.
    pub async fn unshare(&self, file: &FileId, recipient: &Username) -> Result<()> {
        let active = self.client.session().current().await?;
        if file.owner() != active.username() {
            return Err(Error::NotPermitted(format!(
                "Only the owner may unshare {}",
                file
            )));
        }
        self.client
            .remote()
            .revoke_share(active.credentials(), file, recipient)
            .await?;
        info!(file = %file, recipient = %recipient, "Share revoked");
        Ok(())
    }
}
