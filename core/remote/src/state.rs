//! Server-side bookkeeping shared by every backend.
//!
//! `ServerState` holds accounts, certificates, file entries with per-user
//! access keys, and pending key transfers. It enforces authentication and
//! ownership rules; blob storage is left to the backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::service::{AccessKey, PendingShare};
use sealshare_common::{Credentials, Error, FileId, Namespace, Result, Username};
use sealshare_crypto::{Certificate, WrappedKey};

/// What the server knows about one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    file: FileId,
    /// Ciphertext present in the owner's personal namespace.
    personal: bool,
    /// Ciphertext present in the shared namespace.
    shared: bool,
    /// Access per user: `None` while a share is still pending.
    access: BTreeMap<Username, Option<WrappedKey>>,
}

impl FileEntry {
    fn new(file: FileId) -> Self {
        Self {
            file,
            personal: false,
            shared: false,
            access: BTreeMap::new(),
        }
    }

    fn has_accepted_access(&self, user: &Username) -> bool {
        matches!(self.access.get(user), Some(Some(_)))
    }
}

/// A wrapped document key in transit from sender to recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingTransfer {
    file: FileId,
    sender: Username,
    recipient: Username,
    wrapped_key: WrappedKey,
}

/// Server bookkeeping.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ServerState {
    users: BTreeMap<Username, String>,
    certificates: BTreeMap<Username, Certificate>,
    files: BTreeMap<String, FileEntry>,
    pending: Vec<PendingTransfer>,
}

fn file_key(file: &FileId) -> String {
    file.to_string()
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signup(&mut self, credentials: &Credentials) -> Result<()> {
        let username = credentials.username();
        if self.users.contains_key(username) {
            return Err(Error::AlreadyExists(format!("User {} already exists", username)));
        }
        self.users
            .insert(username.clone(), credentials.password_hash().to_string());
        info!(user = %username, "Registered user");
        Ok(())
    }

    /// Check that the credentials name a registered user with a matching password hash.
    pub fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        match self.users.get(credentials.username()) {
            Some(hash) if hash == credentials.password_hash() => Ok(()),
            _ => Err(Error::NotPermitted(
                "Username and password do not match".to_string(),
            )),
        }
    }

    pub fn user_exists(&self, username: &Username) -> bool {
        self.users.contains_key(username)
    }

    pub fn store_certificate(&mut self, certificate: Certificate) {
        self.certificates
            .insert(certificate.subject().clone(), certificate);
    }

    pub fn certificate(&self, username: &Username) -> Result<Certificate> {
        self.certificates
            .get(username)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No certificate for {}", username)))
    }

    fn require_owner(credentials: &Credentials, file: &FileId, action: &str) -> Result<()> {
        if credentials.username() != file.owner() {
            return Err(Error::NotPermitted(format!(
                "Only the owner of {} may {}",
                file, action
            )));
        }
        Ok(())
    }

    fn entry(&self, file: &FileId) -> Result<&FileEntry> {
        self.files
            .get(&file_key(file))
            .ok_or_else(|| Error::NotFound(format!("File {} not found", file)))
    }

    fn entry_mut(&mut self, file: &FileId) -> Result<&mut FileEntry> {
        self.files
            .get_mut(&file_key(file))
            .ok_or_else(|| Error::NotFound(format!("File {} not found", file)))
    }

    /// Authorize an upload and record that the blob exists.
    ///
    /// Only the owner may write the personal namespace, and only until the
    /// file has been shared. The shared namespace also accepts writes from
    /// users who have accepted a share of the file.
    pub fn authorize_upload(
        &mut self,
        credentials: &Credentials,
        file: &FileId,
        namespace: Namespace,
    ) -> Result<()> {
        self.authenticate(credentials)?;
        let caller = credentials.username();

        let is_owner = caller == file.owner();
        let allowed = match namespace {
            Namespace::Personal => is_owner,
            Namespace::Shared => {
                is_owner
                    || self
                        .files
                        .get(&file_key(file))
                        .map(|entry| entry.has_accepted_access(caller))
                        .unwrap_or(false)
            }
        };
        if !allowed {
            return Err(Error::NotPermitted(format!(
                "{} may not upload {} to the {} namespace",
                caller, file, namespace
            )));
        }

        let entry = self
            .files
            .entry(file_key(file))
            .or_insert_with(|| FileEntry::new(file.clone()));
        if namespace == Namespace::Personal && entry.access.contains_key(file.owner()) {
            return Err(Error::AlreadyExists(format!(
                "{} already lives in the shared namespace",
                file
            )));
        }
        match namespace {
            Namespace::Personal => entry.personal = true,
            Namespace::Shared => entry.shared = true,
        }
        debug!(file = %file, namespace = %namespace, "Upload authorized");
        Ok(())
    }

    /// Authorize a download. Existence of the blob is the backend's concern.
    pub fn authorize_download(
        &self,
        credentials: &Credentials,
        file: &FileId,
        namespace: Namespace,
    ) -> Result<()> {
        self.authenticate(credentials)?;
        let caller = credentials.username();

        let allowed = caller == file.owner()
            || (namespace == Namespace::Shared
                && self
                    .files
                    .get(&file_key(file))
                    .map(|entry| entry.has_accepted_access(caller))
                    .unwrap_or(false));
        if !allowed {
            return Err(Error::NotPermitted(format!(
                "{} may not download {} from the {} namespace",
                caller, file, namespace
            )));
        }
        Ok(())
    }

    /// Register a share.
    ///
    /// # Returns
    /// `true` if the owner's personal copy became obsolete and its blob
    /// should be removed.
    pub fn register_share(
        &mut self,
        credentials: &Credentials,
        file: &FileId,
        recipient: &Username,
        owner_key: &WrappedKey,
        recipient_key: &WrappedKey,
    ) -> Result<bool> {
        self.authenticate(credentials)?;
        Self::require_owner(credentials, file, "share it")?;
        if recipient == file.owner() {
            return Err(Error::InvalidInput(
                "Cannot share a file with its owner".to_string(),
            ));
        }
        if !self.user_exists(recipient) {
            return Err(Error::NotFound(format!("User {} not found", recipient)));
        }

        let entry = self.entry_mut(file)?;
        if !entry.shared {
            return Err(Error::InvalidInput(format!(
                "File {} has not been uploaded to the shared namespace",
                file
            )));
        }
        entry
            .access
            .insert(file.owner().clone(), Some(owner_key.clone()));
        entry.access.insert(recipient.clone(), None);
        let personal_obsolete = std::mem::take(&mut entry.personal);

        self.pending
            .retain(|p| !(p.file == *file && p.recipient == *recipient));
        self.pending.push(PendingTransfer {
            file: file.clone(),
            sender: file.owner().clone(),
            recipient: recipient.clone(),
            wrapped_key: recipient_key.clone(),
        });

        info!(file = %file, recipient = %recipient, "Share registered");
        Ok(personal_obsolete)
    }

    pub fn revoke_share(
        &mut self,
        credentials: &Credentials,
        file: &FileId,
        recipient: &Username,
    ) -> Result<()> {
        self.authenticate(credentials)?;
        Self::require_owner(credentials, file, "unshare it")?;

        let entry = self.entry_mut(file)?;
        if recipient == file.owner() {
            debug!(file = %file, "Owner unshare with self ignored");
            return Ok(());
        }
        if entry.access.remove(recipient).is_none() {
            return Err(Error::NotFound(format!(
                "File {} is not shared with {}",
                file, recipient
            )));
        }
        self.pending
            .retain(|p| !(p.file == *file && p.recipient == *recipient));

        info!(file = %file, recipient = %recipient, "Share revoked");
        Ok(())
    }

    pub fn pending_shares(&self, credentials: &Credentials) -> Result<Vec<PendingShare>> {
        self.authenticate(credentials)?;
        Ok(self
            .pending
            .iter()
            .filter(|p| &p.recipient == credentials.username())
            .map(|p| PendingShare {
                file: p.file.clone(),
                sender: p.sender.clone(),
                wrapped_key: p.wrapped_key.clone(),
            })
            .collect())
    }

    pub fn finalize_share(
        &mut self,
        credentials: &Credentials,
        file: &FileId,
        sender: &Username,
        rewrapped_key: &WrappedKey,
    ) -> Result<()> {
        self.authenticate(credentials)?;
        let caller = credentials.username().clone();

        let index = self
            .pending
            .iter()
            .position(|p| p.file == *file && p.sender == *sender && p.recipient == caller)
            .ok_or_else(|| {
                Error::NotFound(format!("No pending share of {} from {}", file, sender))
            })?;

        self.entry_mut(file)?
            .access
            .insert(caller.clone(), Some(rewrapped_key.clone()));
        self.pending.remove(index);

        info!(file = %file, recipient = %caller, "Share finalized");
        Ok(())
    }

    pub fn access_key(&self, credentials: &Credentials, file: &FileId) -> Result<AccessKey> {
        self.authenticate(credentials)?;
        let caller = credentials.username();

        if caller == file.owner() {
            let wrapped = self
                .files
                .get(&file_key(file))
                .and_then(|entry| entry.access.get(caller).cloned().flatten());
            return Ok(match wrapped {
                Some(key) => AccessKey::Shared(key),
                None => AccessKey::Personal,
            });
        }

        match self.entry(file)?.access.get(caller) {
            Some(Some(key)) => Ok(AccessKey::Shared(key.clone())),
            Some(None) => Ok(AccessKey::Pending),
            None => Err(Error::NotPermitted(format!(
                "{} has no access to {}",
                caller, file
            ))),
        }
    }
}
