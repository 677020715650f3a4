//! Client facade tying the session, the tracker and the server together.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::ClientConfig;
use crate::record::FileRecord;
use crate::session::{ActiveSession, Session};
use crate::tracker::VaultFileTracker;
use sealshare_common::{Error, FileId, Namespace, Result, Username};
use sealshare_crypto::{FileCipher, KeyWrapCodec, SymmetricKey, TrustAnchor};
use sealshare_remote::{AccessKey, RemoteServices};

/// One line of a vault listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    pub file: FileId,
    pub namespace: Namespace,
    pub open: bool,
    pub path: PathBuf,
}

/// A user's view of the vault.
///
/// Foreground operations (open, close, share) run one at a time through the
/// tracker lock. The session is shared with the share poller.
pub struct VaultClient {
    config: ClientConfig,
    remote: Arc<dyn RemoteServices>,
    session: Arc<Session>,
    tracker: Mutex<VaultFileTracker>,
    codec: KeyWrapCodec,
    trust_anchor: TrustAnchor,
}

impl VaultClient {
    /// Create a client.
    ///
    /// # Errors
    /// - `Config` if the configuration is invalid
    pub fn new(
        config: ClientConfig,
        remote: Arc<dyn RemoteServices>,
        trust_anchor: TrustAnchor,
    ) -> Result<Self> {
        config.validate()?;
        let cipher = FileCipher::new(config.crypto.clone())?;
        let codec = KeyWrapCodec::new(config.crypto.clone())?;
        let session = Arc::new(Session::new(remote.clone(), config.crypto.clone()));
        let tracker = Mutex::new(VaultFileTracker::new(config.vault_dir.clone(), cipher));

        Ok(Self {
            config,
            remote,
            session,
            tracker,
            codec,
            trust_anchor,
        })
    }

    /// Create a client pinning the trust anchor named in the configuration.
    pub fn from_config(config: ClientConfig, remote: Arc<dyn RemoteServices>) -> Result<Self> {
        let anchor = TrustAnchor::load(&config.trust_anchor).map_err(|e| {
            Error::Config(format!(
                "Cannot load trust anchor {}: {}",
                config.trust_anchor.display(),
                e
            ))
        })?;
        Self::new(config, remote, anchor)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn remote(&self) -> &Arc<dyn RemoteServices> {
        &self.remote
    }

    pub fn tracker(&self) -> &Mutex<VaultFileTracker> {
        &self.tracker
    }

    pub fn codec(&self) -> &KeyWrapCodec {
        &self.codec
    }

    pub fn trust_anchor(&self) -> &TrustAnchor {
        &self.trust_anchor
    }

    /// Register, log in and pick up any files already in the local layout.
    pub async fn signup(&self, username: Username, password: Zeroizing<String>) -> Result<()> {
        self.session.signup(username.clone(), password).await?;
        self.tracker.lock().await.restore(&username)?;
        self.recover_interrupted().await
    }

    /// Log in and pick up any files already in the local layout.
    ///
    /// Files a previous process left decrypted are tracked OPEN again.
    pub async fn login(&self, username: Username, password: Zeroizing<String>) -> Result<()> {
        self.session.login(username.clone(), password).await?;
        self.tracker.lock().await.restore(&username)?;
        self.recover_interrupted().await
    }

    async fn recover_interrupted(&self) -> Result<()> {
        let active = self.session.current().await?;
        let mut tracker = self.tracker.lock().await;
        for file in tracker.interrupted() {
            let key = match tracker.record(&file) {
                Some(record) => self.key_for_record(&active, record).await,
                None => continue,
            };
            let recovered = key.and_then(|key| tracker.recover(&file, &key));
            match recovered {
                Ok(true) => info!(file = %file, "Recovered open file"),
                Ok(false) => {}
                Err(e) => warn!(file = %file, error = %e, "Could not check interrupted file"),
            }
        }
        Ok(())
    }

    /// Close every open file, then drop the keys.
    ///
    /// The session ends even if some files fail to close; those failures
    /// are returned together afterwards.
    pub async fn logout(&self) -> Result<()> {
        let closed = self.close_all().await;
        self.session.logout().await?;
        self.tracker.lock().await.clear();
        closed
    }

    /// Log out if logged in. Called on process exit.
    pub async fn shutdown(&self) -> Result<()> {
        if self.session.is_logged_in().await {
            self.logout().await
        } else {
            Ok(())
        }
    }

    /// Ask the server how the caller can decrypt `file` and produce the key.
    ///
    /// # Errors
    /// - `FileState` if the file was shared with the caller but not accepted yet
    /// - `Crypto` if the stored access key does not unwrap under the master key
    pub async fn resolve_key(
        &self,
        active: &ActiveSession,
        file: &FileId,
    ) -> Result<(Namespace, SymmetricKey)> {
        match self.remote.access_key(active.credentials(), file).await? {
            AccessKey::Personal => Ok((Namespace::Personal, active.keys().symmetric().clone())),
            AccessKey::Pending => Err(Error::FileState(format!(
                "The share of {} has not been accepted yet",
                file
            ))),
            AccessKey::Shared(wrapped) => {
                let document_key = self
                    .codec
                    .unwrap_with_symmetric_key(&wrapped, active.keys().symmetric())?;
                Ok((Namespace::Shared, document_key.as_symmetric().clone()))
            }
        }
    }

    /// Key for an already tracked file. The caller's own personal files
    /// need no server round trip.
    async fn key_for_record(&self, active: &ActiveSession, record: &FileRecord) -> Result<SymmetricKey> {
        if record.namespace() == Namespace::Personal && record.file().owner() == active.username() {
            return Ok(active.keys().symmetric().clone());
        }
        let (_, key) = self.resolve_key(active, record.file()).await?;
        Ok(key)
    }

    /// Encrypt a plaintext file into the vault and upload it.
    ///
    /// # Postconditions
    /// - The file is tracked CLOSED in the caller's personal namespace
    /// - The ciphertext has been uploaded
    ///
    /// # Errors
    /// - `AlreadyExists` if a file of that name is already tracked or has
    ///   been shared from another client
    pub async fn add_file(&self, source: &Path, filename: &str) -> Result<FileId> {
        let active = self.session.current().await?;
        let file = FileId::new(filename, active.username().clone())?;

        let mut tracker = self.tracker.lock().await;
        if tracker.record(&file).is_some() {
            return Err(Error::AlreadyExists(format!("{} is already in the vault", file)));
        }
        if let AccessKey::Shared(_) = self.remote.access_key(active.credentials(), &file).await? {
            return Err(Error::AlreadyExists(format!("{} is already shared", file)));
        }

        let dest = tracker.local_path(&file, Namespace::Personal);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracker
            .cipher()
            .encrypt_file(source, &dest, active.keys().symmetric())?;
        tracker.track(file.clone(), Namespace::Personal)?;

        let data = std::fs::read(&dest)?;
        self.remote
            .upload(active.credentials(), &file, Namespace::Personal, data)
            .await?;

        info!(file = %file, "Added file to vault");
        Ok(file)
    }

    /// Decrypt a file for use, fetching it first if there is no local copy.
    ///
    /// # Returns
    /// Path of the plaintext.
    ///
    /// # Errors
    /// - `NotLoggedIn` without a session
    /// - `FileState` if already open or the share is still pending
    /// - `Integrity` if the ciphertext does not authenticate
    pub async fn open(&self, file: &FileId) -> Result<PathBuf> {
        let active = self.session.current().await?;
        let mut tracker = self.tracker.lock().await;
        if tracker.is_open(file) {
            return Err(Error::FileState(format!("{} is already open", file)));
        }

        let (namespace, key) = self.resolve_key(&active, file).await?;
        if tracker.record(file).is_some() {
            tracker.retarget(file, namespace)?;
        } else {
            tracker.track(file.clone(), namespace)?;
        }

        let path = tracker.local_path(file, namespace);
        if !path.exists() {
            let data = self
                .remote
                .download(active.credentials(), file, namespace)
                .await?;
            tracker.store_ciphertext(file, &data)?;
            debug!(file = %file, namespace = %namespace, "Fetched remote copy");
        }

        tracker.open(file, &key)?;
        Ok(path)
    }

    /// Re-encrypt an open file.
    pub async fn close(&self, file: &FileId) -> Result<()> {
        let active = self.session.current().await?;
        let mut tracker = self.tracker.lock().await;
        if !tracker.is_open(file) {
            return Err(Error::FileState(format!("{} is not open", file)));
        }
        let record = tracker
            .record(file)
            .ok_or_else(|| Error::NotFound(format!("{} is not in the vault", file)))?;
        let key = self.key_for_record(&active, record).await?;
        tracker.close(file, &key)
    }

    /// Close every open file, reporting all failures together.
    pub async fn close_all(&self) -> Result<()> {
        let mut tracker = self.tracker.lock().await;
        let open = tracker.open_files();
        if open.is_empty() {
            return Ok(());
        }
        let active = self.session.current().await?;

        let mut keys: BTreeMap<FileId, Result<SymmetricKey>> = BTreeMap::new();
        for file in open {
            let key = match tracker.record(&file) {
                Some(record) => self.key_for_record(&active, record).await,
                None => Err(Error::NotFound(format!("{} is not in the vault", file))),
            };
            keys.insert(file, key);
        }

        tracker.close_all(|record| {
            keys.remove(record.file()).unwrap_or_else(|| {
                Err(Error::NotFound(format!("No key for {}", record.file())))
            })
        })
    }

    /// Upload a CLOSED file's current ciphertext to its namespace.
    pub async fn push(&self, file: &FileId) -> Result<()> {
        let active = self.session.current().await?;
        let tracker = self.tracker.lock().await;
        if tracker.is_open(file) {
            return Err(Error::FileState(format!("{} is open; close it first", file)));
        }
        let record = tracker
            .record(file)
            .ok_or_else(|| Error::NotFound(format!("{} is not in the vault", file)))?;
        let namespace = record.namespace();
        let data = std::fs::read(record.path())?;

        self.remote
            .upload(active.credentials(), file, namespace, data)
            .await?;
        info!(file = %file, namespace = %namespace, "Pushed file");
        Ok(())
    }

    /// Tracked files and their state.
    pub async fn list(&self) -> Vec<FileStatus> {
        let tracker = self.tracker.lock().await;
        tracker
            .records()
            .map(|record| FileStatus {
                file: record.file().clone(),
                namespace: record.namespace(),
                open: tracker.is_open(record.file()),
                path: record.path().to_path_buf(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealshare_crypto::CryptoParams;
    use sealshare_remote::MemoryServer;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        server: Arc<MemoryServer>,
        client: VaultClient,
        source: PathBuf,
    }

    async fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let server = Arc::new(MemoryServer::generate(1024).unwrap());
        let mut config = ClientConfig::new(temp.path().join("vault"), temp.path().join("rootca.pub"));
        config.crypto = CryptoParams::for_tests();
        let client = VaultClient::new(config, server.clone(), server.trust_anchor()).unwrap();

        let source = temp.path().join("notes.txt");
        std::fs::write(&source, b"my notes").unwrap();

        client
            .signup(Username::new("alice").unwrap(), Zeroizing::new("pw".to_string()))
            .await
            .unwrap();

        Fixture {
            _temp: temp,
            server,
            client,
            source,
        }
    }

    #[tokio::test]
    async fn test_add_open_close_push() {
        let fx = fixture().await;
        let file = fx.client.add_file(&fx.source, "notes.txt").await.unwrap();
        assert!(fx.server.blob(&file, Namespace::Personal).await.is_some());

        let path = fx.client.open(&file).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"my notes");

        std::fs::write(&path, b"edited notes").unwrap();
        fx.client.close(&file).await.unwrap();
        fx.client.push(&file).await.unwrap();

        let uploaded = fx.server.blob(&file, Namespace::Personal).await.unwrap();
        assert_eq!(uploaded, std::fs::read(&path).unwrap());
    }

    #[tokio::test]
    async fn test_open_fetches_missing_copy() {
        let fx = fixture().await;
        let file = fx.client.add_file(&fx.source, "notes.txt").await.unwrap();
        let path = fx.client.list().await[0].path.clone();
        std::fs::remove_file(&path).unwrap();

        fx.client.open(&file).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"my notes");
    }

    #[tokio::test]
    async fn test_push_requires_closed() {
        let fx = fixture().await;
        let file = fx.client.add_file(&fx.source, "notes.txt").await.unwrap();
        fx.client.open(&file).await.unwrap();

        assert!(matches!(fx.client.push(&file).await, Err(Error::FileState(_))));
    }

    #[tokio::test]
    async fn test_logout_closes_everything() {
        let fx = fixture().await;
        let file = fx.client.add_file(&fx.source, "notes.txt").await.unwrap();
        let path = fx.client.open(&file).await.unwrap();

        fx.client.logout().await.unwrap();
        assert!(!fx.client.session().is_logged_in().await);
        assert!(fx.client.list().await.is_empty());
        assert_ne!(std::fs::read(&path).unwrap(), b"my notes");

        assert!(matches!(fx.client.open(&file).await, Err(Error::NotLoggedIn)));

        fx.client
            .login(Username::new("alice").unwrap(), Zeroizing::new("pw".to_string()))
            .await
            .unwrap();
        assert_eq!(fx.client.list().await.len(), 1);
        fx.client.open(&file).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"my notes");
    }

    #[tokio::test]
    async fn test_add_duplicate_rejected() {
        let fx = fixture().await;
        fx.client.add_file(&fx.source, "notes.txt").await.unwrap();
        let again = fx.client.add_file(&fx.source, "notes.txt").await;
        assert!(matches!(again, Err(Error::AlreadyExists(_))));
    }
}
