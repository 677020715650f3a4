//! Directory-backed server.
//!
//! Everything lives under one root directory:
//!
//! ```text
//! <root>/state.json                          accounts, certificates, shares
//! <root>/rootca.key                          root CA private key (PKCS#8 DER)
//! <root>/rootca.pub                          root CA public key (SPKI DER), for pinning
//! <root>/blobs/<namespace>/<owner>/<file>    ciphertext
//! ```
//!
//! Several client processes on one machine can point at the same root to
//! exchange shares. Writers within a process are serialized; there is no
//! cross-process lock.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::service::{
    AccessKey, AuthService, CertificateDirectory, FileTransferService, PendingShare,
    ShareMetadataService,
};
use crate::state::ServerState;
use sealshare_common::{Credentials, Error, FileId, Namespace, Result, Username};
use sealshare_crypto::{Certificate, CertificateAuthority, TrustAnchor, WrappedKey, DEFAULT_ISSUER};

const STATE_FILE: &str = "state.json";
const CA_KEY_FILE: &str = "rootca.key";
const BLOB_DIR: &str = "blobs";

/// File name of the pinned root public key inside the server directory.
pub const TRUST_ANCHOR_FILE: &str = "rootca.pub";

/// Default root CA modulus size.
pub const DEFAULT_CA_BITS: usize = 2048;

fn storage_error(err: io::Error) -> Error {
    Error::Remote(format!("Server storage failure: {}", err))
}

/// Server storing its state and blobs in a local directory.
pub struct LocalServer {
    root: PathBuf,
    authority: CertificateAuthority,
    writer: Mutex<()>,
}

impl LocalServer {
    /// Open (or initialize) a server directory.
    ///
    /// # Postconditions
    /// - The root directory exists
    /// - A root CA key exists, generated on first use
    /// - `rootca.pub` holds the root public key
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_key_size(root, DEFAULT_CA_BITS)
    }

    /// Like [`LocalServer::open`] with a chosen root key size for a new directory.
    pub fn open_with_key_size(root: impl AsRef<Path>, ca_bits: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let key_path = root.join(CA_KEY_FILE);
        let authority = if key_path.exists() {
            let der = zeroize::Zeroizing::new(std::fs::read(&key_path)?);
            CertificateAuthority::from_pkcs8_der(DEFAULT_ISSUER, &der)?
        } else {
            let authority = CertificateAuthority::generate(DEFAULT_ISSUER, ca_bits)?;
            std::fs::write(&key_path, authority.to_pkcs8_der()?.as_slice())?;
            info!(path = %root.display(), "Created root certificate authority");
            authority
        };

        let anchor_path = root.join(TRUST_ANCHOR_FILE);
        if !anchor_path.exists() {
            authority.trust_anchor().save(&anchor_path)?;
        }

        Ok(Self {
            root,
            authority,
            writer: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the root public key clients should pin.
    pub fn trust_anchor_path(&self) -> PathBuf {
        self.root.join(TRUST_ANCHOR_FILE)
    }

    pub fn trust_anchor(&self) -> TrustAnchor {
        self.authority.trust_anchor()
    }

    fn blob_path(&self, file: &FileId, namespace: Namespace) -> PathBuf {
        self.root
            .join(BLOB_DIR)
            .join(namespace.as_str())
            .join(file.owner().as_str())
            .join(file.filename())
    }

    async fn load_state(&self) -> Result<ServerState> {
        match fs::read(self.root.join(STATE_FILE)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::Serialization(format!("Corrupt server state: {}", e))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ServerState::new()),
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn save_state(&self, state: &ServerState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        write_atomic(&self.root.join(STATE_FILE), &bytes).await
    }

    async fn read_state<T>(&self, f: impl FnOnce(&ServerState) -> Result<T>) -> Result<T> {
        let state = self.load_state().await?;
        f(&state)
    }

    async fn update_state<T>(&self, f: impl FnOnce(&mut ServerState) -> Result<T>) -> Result<T> {
        let _guard = self.writer.lock().await;
        let mut state = self.load_state().await?;
        let out = f(&mut state)?;
        self.save_state(&state).await?;
        Ok(out)
    }
}

/// Write through a sibling temp file and rename into place.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(storage_error)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).await.map_err(storage_error)?;
    fs::rename(&tmp, path).await.map_err(storage_error)
}

#[async_trait]
impl AuthService for LocalServer {
    async fn signup(&self, credentials: &Credentials) -> Result<()> {
        self.update_state(|state| state.signup(credentials)).await
    }

    async fn login(&self, credentials: &Credentials) -> Result<()> {
        self.read_state(|state| state.authenticate(credentials)).await
    }
}

#[async_trait]
impl CertificateDirectory for LocalServer {
    async fn retrieve(&self, username: &Username) -> Result<Certificate> {
        self.read_state(|state| state.certificate(username)).await
    }

    async fn sign(&self, credentials: &Credentials, public_key_der: &[u8]) -> Result<Certificate> {
        self.update_state(|state| {
            state.authenticate(credentials)?;
            let certificate = self.authority.issue(credentials.username(), public_key_der)?;
            state.store_certificate(certificate.clone());
            Ok(certificate)
        })
        .await
    }
}

#[async_trait]
impl ShareMetadataService for LocalServer {
    async fn register_share(
        &self,
        credentials: &Credentials,
        file: &FileId,
        recipient: &Username,
        owner_key: &WrappedKey,
        recipient_key: &WrappedKey,
    ) -> Result<()> {
        let personal_obsolete = self
            .update_state(|state| {
                state.register_share(credentials, file, recipient, owner_key, recipient_key)
            })
            .await?;
        if personal_obsolete {
            match fs::remove_file(self.blob_path(file, Namespace::Personal)).await {
                Ok(()) => debug!(file = %file, "Dropped personal copy of shared file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(storage_error(e)),
            }
        }
        Ok(())
    }

    async fn revoke_share(
        &self,
        credentials: &Credentials,
        file: &FileId,
        recipient: &Username,
    ) -> Result<()> {
        self.update_state(|state| state.revoke_share(credentials, file, recipient))
            .await
    }

    async fn list_pending_shares(&self, credentials: &Credentials) -> Result<Vec<PendingShare>> {
        self.read_state(|state| state.pending_shares(credentials)).await
    }

    async fn finalize_share(
        &self,
        credentials: &Credentials,
        file: &FileId,
        sender: &Username,
        rewrapped_key: &WrappedKey,
    ) -> Result<()> {
        self.update_state(|state| state.finalize_share(credentials, file, sender, rewrapped_key))
            .await
    }

    async fn access_key(&self, credentials: &Credentials, file: &FileId) -> Result<AccessKey> {
        self.read_state(|state| state.access_key(credentials, file)).await
    }
}

#[async_trait]
impl FileTransferService for LocalServer {
    async fn upload(
        &self,
        credentials: &Credentials,
        file: &FileId,
        namespace: Namespace,
        data: Vec<u8>,
    ) -> Result<()> {
        self.update_state(|state| state.authorize_upload(credentials, file, namespace))
            .await?;
        write_atomic(&self.blob_path(file, namespace), &data).await
    }

    async fn download(
        &self,
        credentials: &Credentials,
        file: &FileId,
        namespace: Namespace,
    ) -> Result<Vec<u8>> {
        self.read_state(|state| state.authorize_download(credentials, file, namespace))
            .await?;
        match fs::read(self.blob_path(file, namespace)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(format!(
                "No {} copy of {}",
                namespace, file
            ))),
            Err(e) => Err(storage_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn creds(name: &str) -> Credentials {
        Credentials::from_password(Username::new(name).unwrap(), "password")
    }

    #[tokio::test]
    async fn test_state_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let alice = creds("alice");
        let file = FileId::new("a.txt", alice.username().clone()).unwrap();

        {
            let server = LocalServer::open_with_key_size(temp.path(), 1024).unwrap();
            server.signup(&alice).await.unwrap();
            server
                .upload(&alice, &file, Namespace::Personal, b"data".to_vec())
                .await
                .unwrap();
        }

        let server = LocalServer::open_with_key_size(temp.path(), 1024).unwrap();
        server.login(&alice).await.unwrap();
        let data = server.download(&alice, &file, Namespace::Personal).await.unwrap();
        assert_eq!(data, b"data");
    }

    #[tokio::test]
    async fn test_root_key_is_stable_and_pinned() {
        let temp = TempDir::new().unwrap();
        let first = LocalServer::open_with_key_size(temp.path(), 1024).unwrap();
        let second = LocalServer::open_with_key_size(temp.path(), 1024).unwrap();

        assert_eq!(first.trust_anchor(), second.trust_anchor());
        let pinned = TrustAnchor::load(&first.trust_anchor_path()).unwrap();
        assert_eq!(pinned, first.trust_anchor());
    }

    #[tokio::test]
    async fn test_download_missing_blob() {
        let temp = TempDir::new().unwrap();
        let server = LocalServer::open_with_key_size(temp.path(), 1024).unwrap();
        let alice = creds("alice");
        server.signup(&alice).await.unwrap();

        let file = FileId::new("none.txt", alice.username().clone()).unwrap();
        let result = server.download(&alice, &file, Namespace::Personal).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
