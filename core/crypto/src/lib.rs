//! Cryptographic primitives for SealShare.
//!
//! This crate provides:
//! - Password-based derivation of the master key and RSA key pair
//! - Authenticated streaming file encryption (AES-CBC + HMAC)
//! - Wrapping of per-document keys, symmetrically or under an RSA public key
//! - Certificates and a pinned trust anchor
//!
//! # Security Guarantees
//! - All key material is zeroized on drop
//! - No plaintext or key material is ever logged
//! - Integrity values and keys are compared in constant time

pub mod cert;
pub mod cipher;
pub mod kdf;
pub mod keys;
pub mod params;
pub mod wrap;

pub use cert::{Certificate, CertificateAuthority, CertificateBody, TrustAnchor, DEFAULT_ISSUER};
pub use cipher::FileCipher;
pub use kdf::{derive_key_pair, derive_master_key, derive_master_key_set, username_salt};
pub use keys::{decode_public_key, encode_public_key, DocumentKey, KeyPair, MasterKeySet, SymmetricKey};
pub use params::{CipherAlgorithm, CryptoParams, KdfAlgorithm, KdfParams, MacAlgorithm};
pub use wrap::{KeyWrapCodec, WrapMethod, WrappedKey};
pub use rsa::{RsaPrivateKey, RsaPublicKey};
pub use zeroize::Zeroizing;
