#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use sealshare_common::{Credentials, FileId, Username};
use sealshare_crypto::{CryptoParams, TrustAnchor};
use sealshare_remote::MemoryServer;
use sealshare_sharing::{SharePoller, SharingOrchestrator};
use sealshare_vault::{ClientConfig, VaultClient};
use tempfile::TempDir;
use zeroize::Zeroizing;

pub const PASSWORD: &str = "correct horse battery staple";

/// One user's client with its own vault directory.
pub struct Party {
    pub name: Username,
    pub client: Arc<VaultClient>,
    pub orchestrator: SharingOrchestrator,
    pub poller: Arc<SharePoller>,
    pub dir: TempDir,
}

impl Party {
    pub fn credentials(&self) -> Credentials {
        Credentials::from_password(self.name.clone(), PASSWORD)
    }

    /// Write `content` to a scratch file and add it to the vault as `filename`.
    pub async fn add(&self, filename: &str, content: &[u8]) -> FileId {
        let source = self.dir.path().join(format!("source-{}", filename));
        std::fs::write(&source, content).unwrap();
        self.client.add_file(&source, filename).await.unwrap()
    }

    pub async fn read_open(&self, file: &FileId) -> Vec<u8> {
        let path: PathBuf = self.client.open(file).await.unwrap();
        let content = std::fs::read(&path).unwrap();
        self.client.close(file).await.unwrap();
        content
    }
}

pub fn server() -> Arc<MemoryServer> {
    Arc::new(MemoryServer::generate(1024).unwrap())
}

pub fn password() -> Zeroizing<String> {
    Zeroizing::new(PASSWORD.to_string())
}

/// Client for `name` pinned to `anchor`, not yet logged in.
pub fn client(server: &Arc<MemoryServer>, name: &str, anchor: TrustAnchor) -> Party {
    client_in(server, Username::new(name).unwrap(), anchor, TempDir::new().unwrap())
}

/// Replace `party`'s client with a new one on the same vault directory.
/// The old client is dropped without logging out, as after a crash.
pub fn restart(server: &Arc<MemoryServer>, party: Party) -> Party {
    let Party { name, dir, .. } = party;
    client_in(server, name, server.trust_anchor(), dir)
}

fn client_in(server: &Arc<MemoryServer>, name: Username, anchor: TrustAnchor, dir: TempDir) -> Party {
    let mut config = ClientConfig::new(dir.path().join("vault"), dir.path().join("rootca.pub"));
    config.crypto = CryptoParams::for_tests();

    let client = Arc::new(VaultClient::new(config, server.clone(), anchor).unwrap());
    Party {
        name,
        orchestrator: SharingOrchestrator::new(client.clone()),
        poller: Arc::new(SharePoller::new(client.clone())),
        client,
        dir,
    }
}

/// New account, signed up and logged in, trusting the server's root.
pub async fn signed_up(server: &Arc<MemoryServer>, name: &str) -> Party {
    let party = client(server, name, server.trust_anchor());
    party
        .client
        .signup(party.name.clone(), password())
        .await
        .unwrap();
    party
}
