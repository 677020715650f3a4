//! Login session and key lifetime.
//!
//! The session owns the only copy of the user's key material. Keys are
//! derived at signup or login, held while logged in, and dropped (and
//! zeroized) at logout. All session mutations go through one lock, which the
//! share poller also takes before it uses the credentials.

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use zeroize::Zeroizing;

use sealshare_common::{Credentials, Error, Result, Username};
use sealshare_crypto::{derive_master_key_set, CryptoParams, MasterKeySet};
use sealshare_remote::RemoteServices;

/// Credentials and keys of the logged-in user.
#[derive(Clone)]
pub struct ActiveSession {
    credentials: Credentials,
    keys: MasterKeySet,
}

impl ActiveSession {
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn keys(&self) -> &MasterKeySet {
        &self.keys
    }

    pub fn username(&self) -> &Username {
        self.credentials.username()
    }
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("username", self.username())
            .finish_non_exhaustive()
    }
}

/// Session state guarded by the session lock. `None` when logged out.
pub type SessionGuard<'a> = MutexGuard<'a, Option<ActiveSession>>;

/// Login state of one client.
pub struct Session {
    remote: Arc<dyn RemoteServices>,
    params: CryptoParams,
    state: Mutex<Option<ActiveSession>>,
}

impl Session {
    pub fn new(remote: Arc<dyn RemoteServices>, params: CryptoParams) -> Self {
        Self {
            remote,
            params,
            state: Mutex::new(None),
        }
    }

    /// Derive keys off the async runtime; PBKDF2 and RSA generation are CPU bound.
    async fn derive(&self, username: &Username, password: Zeroizing<String>) -> Result<MasterKeySet> {
        let username = username.clone();
        let params = self.params.clone();
        tokio::task::spawn_blocking(move || derive_master_key_set(password, &username, &params))
            .await
            .map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))?
    }

    fn ensure_logged_out(state: &Option<ActiveSession>) -> Result<()> {
        match state {
            Some(active) => Err(Error::InvalidInput(format!(
                "Already logged in as {}",
                active.username()
            ))),
            None => Ok(()),
        }
    }

    /// Register a new account and log in.
    ///
    /// # Postconditions
    /// - The account exists remotely
    /// - The user's public key has been signed by the root CA
    /// - The session holds the derived keys
    ///
    /// # Errors
    /// - `InvalidInput` if already logged in or the password is empty
    /// - Remote errors from registration or certificate signing
    pub async fn signup(&self, username: Username, password: Zeroizing<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::ensure_logged_out(&state)?;
        if password.is_empty() {
            return Err(Error::InvalidInput("Password cannot be empty".to_string()));
        }

        let credentials = Credentials::from_password(username.clone(), &password);
        self.remote.signup(&credentials).await?;

        let keys = self.derive(&username, password).await?;
        let public_key = keys.key_pair().public_key_der()?;
        self.remote.sign(&credentials, &public_key).await?;
        debug!(user = %username, "Public key certified");

        *state = Some(ActiveSession { credentials, keys });
        info!(user = %username, "Signed up");
        Ok(())
    }

    /// Authenticate and derive keys.
    ///
    /// # Errors
    /// - `InvalidInput` if already logged in
    /// - Remote error if the credentials are rejected
    pub async fn login(&self, username: Username, password: Zeroizing<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::ensure_logged_out(&state)?;

        let credentials = Credentials::from_password(username.clone(), &password);
        self.remote.login(&credentials).await?;

        let keys = self.derive(&username, password).await?;
        *state = Some(ActiveSession { credentials, keys });
        info!(user = %username, "Logged in");
        Ok(())
    }

    /// Drop the keys.
    ///
    /// # Errors
    /// - `NotLoggedIn` if there is no session
    pub async fn logout(&self) -> Result<()> {
        let previous = self.state.lock().await.take().ok_or(Error::NotLoggedIn)?;
        info!(user = %previous.username(), "Logged out");
        Ok(())
    }

    pub async fn is_logged_in(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Copy of the active session, for foreground operations.
    pub async fn current(&self) -> Result<ActiveSession> {
        self.state.lock().await.clone().ok_or(Error::NotLoggedIn)
    }

    /// Hold the session lock; login and logout wait until the guard drops.
    pub async fn lock(&self) -> SessionGuard<'_> {
        self.state.lock().await
    }

    pub fn params(&self) -> &CryptoParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealshare_remote::{CertificateDirectory, MemoryServer};

    fn setup() -> (Arc<MemoryServer>, Session) {
        let server = Arc::new(MemoryServer::generate(1024).unwrap());
        let session = Session::new(server.clone(), CryptoParams::for_tests());
        (server, session)
    }

    fn password(s: &str) -> Zeroizing<String> {
        Zeroizing::new(s.to_string())
    }

    #[tokio::test]
    async fn test_signup_certifies_key() {
        let (server, session) = setup();
        let alice = Username::new("alice").unwrap();

        session.signup(alice.clone(), password("pw")).await.unwrap();
        let active = session.current().await.unwrap();

        let cert = server.retrieve(&alice).await.unwrap();
        let key = server.trust_anchor().verify(&cert, &alice).unwrap();
        assert_eq!(key, active.keys().key_pair().public_key());
    }

    #[tokio::test]
    async fn test_relogin_reproduces_keys() {
        let (_server, session) = setup();
        let alice = Username::new("alice").unwrap();

        session.signup(alice.clone(), password("pw")).await.unwrap();
        let first = session.current().await.unwrap().keys().clone();
        session.logout().await.unwrap();

        session.login(alice, password("pw")).await.unwrap();
        let second = session.current().await.unwrap().keys().clone();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let (_server, session) = setup();
        let alice = Username::new("alice").unwrap();
        session.signup(alice.clone(), password("pw")).await.unwrap();
        session.logout().await.unwrap();

        assert!(session.login(alice, password("other")).await.is_err());
        assert!(!session.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_state_errors() {
        let (_server, session) = setup();
        assert!(matches!(session.logout().await, Err(Error::NotLoggedIn)));
        assert!(matches!(session.current().await, Err(Error::NotLoggedIn)));

        let alice = Username::new("alice").unwrap();
        session.signup(alice.clone(), password("pw")).await.unwrap();
        assert!(matches!(
            session.login(alice, password("pw")).await,
            Err(Error::InvalidInput(_))
        ));
    }
}
