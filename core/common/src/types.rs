//! Common types used throughout SealShare.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

/// Validate a single name used as a path component.
fn validate_component(kind: &str, value: &str) -> crate::Result<()> {
    if value.is_empty() {
        return Err(crate::Error::InvalidInput(format!("{} cannot be empty", kind)));
    }
    if value == "." || value == ".." {
        return Err(crate::Error::InvalidInput(format!(
            "{} cannot be '{}'",
            kind, value
        )));
    }
    if value.contains('/') || value.contains('\\') || value.contains('\0') {
        return Err(crate::Error::InvalidInput(format!(
            "{} cannot contain separators",
            kind
        )));
    }
    Ok(())
}

/// Account name of a SealShare user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Create a new Username.
    ///
    /// # Errors
    /// - Returns error if the name is empty or contains path separators
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        validate_component("Username", &name)?;
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a vault entry: a file name within its owner's vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId {
    filename: String,
    owner: Username,
}

impl FileId {
    /// Create a file identity.
    ///
    /// # Errors
    /// - Returns error if `filename` is empty or contains path separators
    pub fn new(filename: impl Into<String>, owner: Username) -> crate::Result<Self> {
        let filename = filename.into();
        validate_component("Filename", &filename)?;
        Ok(Self { filename, owner })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn owner(&self) -> &Username {
        &self.owner
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.filename)
    }
}

/// Where a file's ciphertext lives on the file-transfer service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Owner-only files encrypted under the owner's master key.
    Personal,
    /// Files encrypted under a document key shared with other users.
    Shared,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Personal => "personal",
            Namespace::Shared => "shared",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication material sent with every remote call.
///
/// The password hash is a one-way digest of the password and is never used
/// as key material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct Credentials {
    #[zeroize(skip)]
    username: Username,
    password_hash: String,
}

impl Credentials {
    /// Build credentials from a cleartext password.
    pub fn from_password(username: Username, password: &str) -> Self {
        let digest = Sha256::digest(password.as_bytes());
        Self {
            username,
            password_hash: hex::encode(digest),
        }
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password_hash", &"[REDACTED]")
            .finish()
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        self.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_creation() {
        let name = Username::new("alice").unwrap();
        assert_eq!(name.as_str(), "alice");
    }

    #[test]
    fn test_username_rejects_bad_input() {
        assert!(Username::new("").is_err());
        assert!(Username::new("a/b").is_err());
        assert!(Username::new("..").is_err());
    }

    #[test]
    fn test_file_id_display() {
        let id = FileId::new("report.pdf", Username::new("owner").unwrap()).unwrap();
        assert_eq!(id.to_string(), "owner/report.pdf");
        assert!(FileId::new("dir\\x", Username::new("owner").unwrap()).is_err());
    }

    #[test]
    fn test_credentials_hash_password() {
        let creds = Credentials::from_password(Username::new("alice").unwrap(), "abc");
        // SHA-256("abc")
        assert_eq!(
            creds.password_hash(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(!format!("{:?}", creds).contains("ba7816"));
    }

    #[test]
    fn test_username_deserialize_validates() {
        let ok: Username = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(ok.as_str(), "bob");
        assert!(serde_json::from_str::<Username>("\"\"").is_err());
    }

    #[test]
    fn test_namespace_serialization() {
        assert_eq!(serde_json::to_string(&Namespace::Shared).unwrap(), "\"shared\"");
    }
}
