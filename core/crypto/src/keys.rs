//! Key types with secure memory handling.
//!
//! All key types zeroize their memory on drop so that key material does not
//! outlive the session or share transaction that created it.

use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use sealshare_common::{Error, Result};

/// Raw symmetric key for AES and HMAC.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: Vec<u8>,
}

impl SymmetricKey {
    /// Create a key from raw bytes.
    ///
    /// # Errors
    /// - Returns error unless the key is 16 or 32 bytes long
    pub fn from_bytes(key: Vec<u8>) -> Result<Self> {
        match key.len() {
            16 | 32 => Ok(Self { key }),
            other => {
                let mut key = key;
                key.zeroize();
                Err(Error::Crypto(format!("Invalid key length: {} bytes", other)))
            }
        }
    }

    /// Generate a random key of the given length.
    pub fn generate(length: usize) -> Result<Self> {
        let mut key = vec![0u8; length];
        OsRng.fill_bytes(&mut key);
        Self::from_bytes(key)
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl Eq for SymmetricKey {}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED; {} bytes])", self.key.len())
    }
}

/// Ephemeral key protecting exactly one shared file.
///
/// Lives only for the duration of a share (or share acceptance) and is
/// never stored unwrapped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DocumentKey(SymmetricKey);

impl DocumentKey {
    /// Generate a fresh random document key.
    pub fn generate(length: usize) -> Result<Self> {
        Ok(Self(SymmetricKey::generate(length)?))
    }

    pub fn from_symmetric(key: SymmetricKey) -> Self {
        Self(key)
    }

    /// Use the document key as a file key.
    pub fn as_symmetric(&self) -> &SymmetricKey {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentKey([REDACTED])")
    }
}

/// RSA key pair derived from the master key.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
}

impl KeyPair {
    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        Self { private }
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private.to_public_key()
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// SubjectPublicKeyInfo DER encoding of the public key, as sent for signing.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        encode_public_key(&self.public_key())
    }
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.private == other.private
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair([REDACTED])")
    }
}

/// Encode a public key as SubjectPublicKeyInfo DER.
pub fn encode_public_key(key: &RsaPublicKey) -> Result<Vec<u8>> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| Error::Crypto(format!("Public key encoding failed: {}", e)))
}

/// Decode a SubjectPublicKeyInfo DER public key.
pub fn decode_public_key(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der)
        .map_err(|e| Error::Crypto(format!("Invalid public key: {}", e)))
}

/// Key material of a logged-in user.
///
/// Exists only in session memory and is reproducible from the password, so it
/// is never persisted. Dropping it zeroizes both keys.
#[derive(Clone, PartialEq)]
pub struct MasterKeySet {
    symmetric: SymmetricKey,
    key_pair: KeyPair,
}

impl MasterKeySet {
    pub fn new(symmetric: SymmetricKey, key_pair: KeyPair) -> Self {
        Self {
            symmetric,
            key_pair,
        }
    }

    /// Master key protecting personally owned files.
    pub fn symmetric(&self) -> &SymmetricKey {
        &self.symmetric
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }
}

impl fmt::Debug for MasterKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKeySet([REDACTED])")
    }
}
