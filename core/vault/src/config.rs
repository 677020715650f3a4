//! Client configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sealshare_common::{Error, Result};
use sealshare_crypto::CryptoParams;

/// Default interval between polls for inbound shares.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Configuration file name in the config directory.
pub const CONFIG_FILENAME: &str = "config.json";

/// Directory name used under the platform data and config directories.
const APP_DIR: &str = "sealshare";

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

/// Settings for one client installation.
///
/// Two clients only interoperate if their `crypto` parameters agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Root of the local vault layout.
    pub vault_dir: PathBuf,
    /// Algorithm parameters.
    pub crypto: CryptoParams,
    /// Seconds between polls for inbound shares.
    pub poll_interval_secs: u64,
    /// Pinned root CA public key (SPKI DER).
    pub trust_anchor: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let data = app_dir(dirs::data_dir());
        Self {
            vault_dir: data.join("vault"),
            crypto: CryptoParams::default(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            trust_anchor: data.join("rootca.pub"),
        }
    }
}

impl ClientConfig {
    /// Configuration rooted at `vault_dir`, pinning the anchor at `trust_anchor`.
    pub fn new(vault_dir: impl Into<PathBuf>, trust_anchor: impl Into<PathBuf>) -> Self {
        Self {
            vault_dir: vault_dir.into(),
            trust_anchor: trust_anchor.into(),
            ..Self::default()
        }
    }

    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        app_dir(dirs::config_dir()).join(CONFIG_FILENAME)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// # Errors
    /// - Returns error if the poll interval is zero or the crypto
    ///   parameters are inconsistent
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(Error::Config(
                "Poll interval must be at least one second".to_string(),
            ));
        }
        self.crypto.validate()
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_json(&std::fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.crypto, CryptoParams::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = ClientConfig::from_json(r#"{"vault_dir": "/tmp/v", "crypto": {"rsa_bits": 4096}}"#).unwrap();
        assert_eq!(config.vault_dir, PathBuf::from("/tmp/v"));
        assert_eq!(config.crypto.rsa_bits, 4096);
        assert_eq!(config.crypto.kdf.iterations, 32768);
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config = ClientConfig {
            poll_interval_secs: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join(CONFIG_FILENAME);
        let config = ClientConfig::new(temp.path().join("vault"), temp.path().join("rootca.pub"));

        config.save(&path).unwrap();
        assert_eq!(ClientConfig::load(&path).unwrap(), config);
    }
}
