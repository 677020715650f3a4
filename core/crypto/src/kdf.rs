//! Password-based key derivation.
//!
//! The master key is PBKDF2 over the password, salted with the SHA-256 digest
//! of the username. The salt is deliberately not random: the same password and
//! username must reproduce the same keys on every login, from any client, so
//! that nothing secret ever has to be stored.

use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use crate::keys::{KeyPair, MasterKeySet, SymmetricKey};
use crate::params::{CryptoParams, KdfAlgorithm, KdfParams};
use sealshare_common::{Error, Result, Username};

/// Salt used for a user's master key derivation.
pub fn username_salt(username: &Username) -> [u8; 32] {
    Sha256::digest(username.as_str().as_bytes()).into()
}

/// Derive the master key from a password and username.
///
/// # Preconditions
/// - `password` must not be empty
/// - `params.key_length` must be 16 or 32
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
/// - The password buffer is zeroized on every return path
///
/// # Errors
/// - Returns error if password is empty
/// - Returns error if the parameters are unusable
pub fn derive_master_key(
    password: Zeroizing<String>,
    username: &Username,
    params: &KdfParams,
) -> Result<SymmetricKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    if params.iterations == 0 {
        return Err(Error::Config("KDF iterations must be positive".to_string()));
    }
    if params.key_length != 16 && params.key_length != 32 {
        return Err(Error::Config(format!(
            "Unsupported derived key length: {}",
            params.key_length
        )));
    }

    let salt = username_salt(username);
    let mut key = Zeroizing::new(vec![0u8; params.key_length]);

    match params.algorithm {
        KdfAlgorithm::Pbkdf2HmacSha256 => {
            pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, params.iterations, &mut key)
        }
        KdfAlgorithm::Pbkdf2HmacSha512 => {
            pbkdf2::pbkdf2_hmac::<Sha512>(password.as_bytes(), &salt, params.iterations, &mut key)
        }
    }

    debug!(user = %username, iterations = params.iterations, "Derived master key");
    SymmetricKey::from_bytes(std::mem::take(&mut *key))
}

/// Derive an RSA key pair from the master key.
///
/// A ChaCha20 generator is seeded with the SHA-256 digest of the key bytes,
/// so the same master key always yields the same key pair.
///
/// # Errors
/// - Returns error if RSA key generation fails for the requested size
pub fn derive_key_pair(key: &SymmetricKey, rsa_bits: usize) -> Result<KeyPair> {
    let mut seed: [u8; 32] = Sha256::digest(key.as_bytes()).into();
    let mut rng = ChaCha20Rng::from_seed(seed);
    seed.zeroize();

    let private = RsaPrivateKey::new(&mut rng, rsa_bits)
        .map_err(|e| Error::Crypto(format!("Key pair derivation failed: {}", e)))?;

    debug!(bits = rsa_bits, "Derived key pair");
    Ok(KeyPair::from_private_key(private))
}

/// Derive the full key set of a user at login.
pub fn derive_master_key_set(
    password: Zeroizing<String>,
    username: &Username,
    params: &CryptoParams,
) -> Result<MasterKeySet> {
    params.validate()?;
    let symmetric = derive_master_key(password, username, &params.kdf)?;
    let key_pair = derive_key_pair(&symmetric, params.rsa_bits)?;
    Ok(MasterKeySet::new(symmetric, key_pair))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> KdfParams {
        CryptoParams::for_tests().kdf
    }

    fn pw(s: &str) -> Zeroizing<String> {
        Zeroizing::new(s.to_string())
    }

    #[test]
    fn test_derive_master_key_deterministic() {
        let user = Username::new("alice").unwrap();

        let key1 = derive_master_key(pw("test-password-123"), &user, &params()).unwrap();
        let key2 = derive_master_key(pw("test-password-123"), &user, &params()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
        assert_eq!(key1.len(), 32);
    }

    #[test]
    fn test_derive_master_key_salted_by_username() {
        let key1 =
            derive_master_key(pw("same"), &Username::new("alice").unwrap(), &params()).unwrap();
        let key2 =
            derive_master_key(pw("same"), &Username::new("bob").unwrap(), &params()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_master_key_different_password() {
        let user = Username::new("alice").unwrap();
        let key1 = derive_master_key(pw("password1"), &user, &params()).unwrap();
        let key2 = derive_master_key(pw("password2"), &user, &params()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_sha512_variant_and_short_key() {
        let user = Username::new("alice").unwrap();
        let kdf = KdfParams {
            algorithm: KdfAlgorithm::Pbkdf2HmacSha512,
            iterations: 100,
            key_length: 16,
        };
        let key = derive_master_key(pw("pw"), &user, &kdf).unwrap();
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn test_empty_password_fails() {
        let user = Username::new("alice").unwrap();
        assert!(derive_master_key(pw(""), &user, &params()).is_err());
    }

    #[test]
    fn test_derive_key_pair_deterministic() {
        let key = SymmetricKey::from_bytes(vec![7u8; 32]).unwrap();

        let pair1 = derive_key_pair(&key, 1024).unwrap();
        let pair2 = derive_key_pair(&key, 1024).unwrap();
        assert_eq!(pair1, pair2);

        let other = SymmetricKey::from_bytes(vec![8u8; 32]).unwrap();
        let pair3 = derive_key_pair(&other, 1024).unwrap();
        assert_ne!(pair1.public_key(), pair3.public_key());
    }
}
