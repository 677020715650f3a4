//! In-memory server for testing and embedding.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::service::{
    AccessKey, AuthService, CertificateDirectory, FileTransferService, PendingShare,
    ShareMetadataService,
};
use crate::state::ServerState;
use sealshare_common::{Credentials, Error, FileId, Namespace, Result, Username};
use sealshare_crypto::{Certificate, CertificateAuthority, TrustAnchor, WrappedKey, DEFAULT_ISSUER};

/// In-memory implementation of every collaborator.
///
/// All data is stored in memory and lost on drop.
pub struct MemoryServer {
    state: RwLock<ServerState>,
    blobs: RwLock<HashMap<(Namespace, FileId), Vec<u8>>>,
    authority: CertificateAuthority,
}

impl MemoryServer {
    /// Create a server whose certificates are issued by `authority`.
    pub fn new(authority: CertificateAuthority) -> Self {
        Self {
            state: RwLock::new(ServerState::new()),
            blobs: RwLock::new(HashMap::new()),
            authority,
        }
    }

    /// Create a server with a freshly generated root of the given size.
    pub fn generate(ca_bits: usize) -> Result<Self> {
        Ok(Self::new(CertificateAuthority::generate(DEFAULT_ISSUER, ca_bits)?))
    }

    /// Anchor clients should pin to trust this server's certificates.
    pub fn trust_anchor(&self) -> TrustAnchor {
        self.authority.trust_anchor()
    }

    /// Stored ciphertext, if any.
    pub async fn blob(&self, file: &FileId, namespace: Namespace) -> Option<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(&(namespace, file.clone()))
            .cloned()
    }

    /// Number of stored blobs across both namespaces.
    pub async fn blob_count(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl AuthService for MemoryServer {
    async fn signup(&self, credentials: &Credentials) -> Result<()> {
        self.state.write().await.signup(credentials)
    }

    async fn login(&self, credentials: &Credentials) -> Result<()> {
        self.state.read().await.authenticate(credentials)
    }
}

#[async_trait]
impl CertificateDirectory for MemoryServer {
    async fn retrieve(&self, username: &Username) -> Result<Certificate> {
        self.state.read().await.certificate(username)
    }

    async fn sign(&self, credentials: &Credentials, public_key_der: &[u8]) -> Result<Certificate> {
        let mut state = self.state.write().await;
        state.authenticate(credentials)?;
        let certificate = self.authority.issue(credentials.username(), public_key_der)?;
        state.store_certificate(certificate.clone());
        Ok(certificate)
    }
}

#[async_trait]
impl ShareMetadataService for MemoryServer {
    async fn register_share(
        &self,
        credentials: &Credentials,
        file: &FileId,
        recipient: &Username,
        owner_key: &WrappedKey,
        recipient_key: &WrappedKey,
    ) -> Result<()> {
        let personal_obsolete = self.state.write().await.register_share(
            credentials,
            file,
            recipient,
            owner_key,
            recipient_key,
        )?;
        if personal_obsolete {
            self.blobs
                .write()
                .await
                .remove(&(Namespace::Personal, file.clone()));
            debug!(file = %file, "Dropped personal copy of shared file");
        }
        Ok(())
    }

    async fn revoke_share(
        &self,
        credentials: &Credentials,
        file: &FileId,
        recipient: &Username,
    ) -> Result<()> {
        self.state
            .write()
            .await
            .revoke_share(credentials, file, recipient)
    }

    async fn list_pending_shares(&self, credentials: &Credentials) -> Result<Vec<PendingShare>> {
        self.state.read().await.pending_shares(credentials)
    }

    async fn finalize_share(
        &self,
        credentials: &Credentials,
        file: &FileId,
        sender: &Username,
        rewrapped_key: &WrappedKey,
    ) -> Result<()> {
        self.state
            .write()
            .await
            .finalize_share(credentials, file, sender, rewrapped_key)
    }

    async fn access_key(&self, credentials: &Credentials, file: &FileId) -> Result<AccessKey> {
        self.state.read().await.access_key(credentials, file)
    }
}

#[async_trait]
impl FileTransferService for MemoryServer {
    async fn upload(
        &self,
        credentials: &Credentials,
        file: &FileId,
        namespace: Namespace,
        data: Vec<u8>,
    ) -> Result<()> {
        self.state
            .write()
            .await
            .authorize_upload(credentials, file, namespace)?;
        self.blobs
            .write()
            .await
            .insert((namespace, file.clone()), data);
        Ok(())
    }

    async fn download(
        &self,
        credentials: &Credentials,
        file: &FileId,
        namespace: Namespace,
    ) -> Result<Vec<u8>> {
        self.state
            .read()
            .await
            .authorize_download(credentials, file, namespace)?;
        self.blob(file, namespace)
            .await
            .ok_or_else(|| Error::NotFound(format!("No {} copy of {}", namespace, file)))
    }
}
