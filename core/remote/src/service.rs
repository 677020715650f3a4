//! Collaborator interfaces consumed by the client.
//!
//! Every call that acts on behalf of a user carries that user's
//! [`Credentials`]; implementations authenticate each call independently.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sealshare_common::{Credentials, FileId, Namespace, Result, Username};
use sealshare_crypto::{Certificate, WrappedKey};

/// A document key waiting to be picked up by its recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingShare {
    pub file: FileId,
    pub sender: Username,
    /// Document key wrapped under the recipient's public key.
    pub wrapped_key: WrappedKey,
}

/// How the calling user obtains the key for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessKey {
    /// The caller owns the file and it is encrypted under their master key.
    Personal,
    /// The file was shared with the caller but the key has not been accepted yet.
    Pending,
    /// Document key wrapped under the caller's master key.
    Shared(WrappedKey),
}

/// Account registration and authentication.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Register a new account.
    ///
    /// # Errors
    /// - `AlreadyExists` if the username is taken
    async fn signup(&self, credentials: &Credentials) -> Result<()>;

    /// Check credentials.
    ///
    /// # Errors
    /// - `NotPermitted` if the username and password hash do not match
    async fn login(&self, credentials: &Credentials) -> Result<()>;
}

/// Certificate authority front end.
#[async_trait]
pub trait CertificateDirectory: Send + Sync {
    /// Fetch the certificate registered for `username`.
    ///
    /// The result is untrusted until verified against the pinned root.
    async fn retrieve(&self, username: &Username) -> Result<Certificate>;

    /// Have the root sign the caller's public key (SPKI DER).
    async fn sign(&self, credentials: &Credentials, public_key_der: &[u8]) -> Result<Certificate>;
}

/// Share registration and key hand-off.
#[async_trait]
pub trait ShareMetadataService: Send + Sync {
    /// Record that `file` is shared with `recipient`.
    ///
    /// # Preconditions
    /// - Caller owns `file` and has uploaded it to the shared namespace
    ///
    /// # Postconditions
    /// - The owner's access key is `owner_key`
    /// - A pending share carrying `recipient_key` is queued for `recipient`
    async fn register_share(
        &self,
        credentials: &Credentials,
        file: &FileId,
        recipient: &Username,
        owner_key: &WrappedKey,
        recipient_key: &WrappedKey,
    ) -> Result<()>;

    /// Remove `recipient`'s access to `file`. Owner only; revoking the
    /// owner's own access is a no-op.
    async fn revoke_share(
        &self,
        credentials: &Credentials,
        file: &FileId,
        recipient: &Username,
    ) -> Result<()>;

    /// Shares addressed to the caller that have not been finalized.
    async fn list_pending_shares(&self, credentials: &Credentials) -> Result<Vec<PendingShare>>;

    /// Accept a pending share, storing the caller's re-wrapped copy of the key.
    async fn finalize_share(
        &self,
        credentials: &Credentials,
        file: &FileId,
        sender: &Username,
        rewrapped_key: &WrappedKey,
    ) -> Result<()>;

    /// Look up how the caller can decrypt `file`.
    async fn access_key(&self, credentials: &Credentials, file: &FileId) -> Result<AccessKey>;
}

/// Ciphertext storage.
#[async_trait]
pub trait FileTransferService: Send + Sync {
    async fn upload(
        &self,
        credentials: &Credentials,
        file: &FileId,
        namespace: Namespace,
        data: Vec<u8>,
    ) -> Result<()>;

    async fn download(
        &self,
        credentials: &Credentials,
        file: &FileId,
        namespace: Namespace,
    ) -> Result<Vec<u8>>;
}

/// Everything a client needs from the server side.
pub trait RemoteServices:
    AuthService + CertificateDirectory + ShareMetadataService + FileTransferService
{
}

impl<T> RemoteServices for T where
    T: AuthService + CertificateDirectory + ShareMetadataService + FileTransferService
{
}
