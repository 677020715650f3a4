//! Algorithm selection and tuning parameters.
//!
//! Every parameter has a fixed default. Two clients configured differently
//! produce files and wrapped keys the other cannot read; nothing on disk
//! records which parameters were used.

use serde::{Deserialize, Serialize};

use sealshare_common::{Error, Result};

/// Password-based key derivation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfAlgorithm {
    Pbkdf2HmacSha256,
    Pbkdf2HmacSha512,
}

/// Parameters for master key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub algorithm: KdfAlgorithm,
    /// Number of PBKDF2 iterations.
    pub iterations: u32,
    /// Derived key length in bytes (16 or 32).
    pub key_length: usize,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm: KdfAlgorithm::Pbkdf2HmacSha256,
            iterations: 32 * 1024,
            key_length: 32,
        }
    }
}

/// Block cipher used in CBC mode with PKCS#7 padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    Aes128Cbc,
    Aes256Cbc,
}

impl CipherAlgorithm {
    /// Cipher block size, which is also the IV length.
    pub const fn block_size(&self) -> usize {
        16
    }

    /// Required key length in bytes.
    pub const fn key_length(&self) -> usize {
        match self {
            CipherAlgorithm::Aes128Cbc => 16,
            CipherAlgorithm::Aes256Cbc => 32,
        }
    }
}

/// Keyed integrity function computed over plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacAlgorithm {
    HmacSha256,
    HmacSha512,
}

impl MacAlgorithm {
    /// Length of the integrity value in bytes.
    pub const fn output_length(&self) -> usize {
        match self {
            MacAlgorithm::HmacSha256 => 32,
            MacAlgorithm::HmacSha512 => 64,
        }
    }
}

/// Complete set of cryptographic parameters for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoParams {
    pub kdf: KdfParams,
    /// RSA modulus size in bits.
    pub rsa_bits: usize,
    pub cipher: CipherAlgorithm,
    pub mac: MacAlgorithm,
    /// Streaming buffer size in bytes.
    pub buffer_size: usize,
}

impl Default for CryptoParams {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            rsa_bits: 2048,
            cipher: CipherAlgorithm::Aes256Cbc,
            mac: MacAlgorithm::HmacSha256,
            buffer_size: 16 * 1024,
        }
    }
}

impl CryptoParams {
    /// Cheap parameters for tests: few KDF rounds and a small RSA modulus.
    pub fn for_tests() -> Self {
        Self {
            kdf: KdfParams {
                iterations: 1000,
                ..KdfParams::default()
            },
            rsa_bits: 1024,
            ..Self::default()
        }
    }

    /// Check that the parameters are usable together.
    ///
    /// # Errors
    /// - Derived key length does not match the cipher
    /// - Zero iterations or zero buffer size
    /// - RSA modulus too small to carry a wrapped key and a signature
    pub fn validate(&self) -> Result<()> {
        if self.kdf.iterations == 0 {
            return Err(Error::Config("KDF iterations must be positive".to_string()));
        }
        if self.kdf.key_length != self.cipher.key_length() {
            return Err(Error::Config(format!(
                "Derived key length {} does not match {:?} (needs {})",
                self.kdf.key_length,
                self.cipher,
                self.cipher.key_length()
            )));
        }
        if self.buffer_size == 0 {
            return Err(Error::Config("Buffer size must be positive".to_string()));
        }
        if self.rsa_bits < 1024 || self.rsa_bits % 8 != 0 {
            return Err(Error::Config(format!(
                "RSA key size must be a multiple of 8 and at least 1024 bits, got {}",
                self.rsa_bits
            )));
        }
        Ok(())
    }

    /// Length of the `[integrity-value][iv]` header of an encrypted file.
    pub fn header_length(&self) -> usize {
        self.mac.output_length() + self.cipher.block_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = CryptoParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.kdf.iterations, 32768);
        assert_eq!(params.header_length(), 32 + 16);
    }

    #[test]
    fn test_key_length_must_match_cipher() {
        let mut params = CryptoParams::default();
        params.cipher = CipherAlgorithm::Aes128Cbc;
        assert!(params.validate().is_err());

        params.kdf.key_length = 16;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let params = CryptoParams {
            buffer_size: 0,
            ..CryptoParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params: CryptoParams =
            serde_json::from_str(r#"{"mac":"HmacSha512"}"#).unwrap();
        assert_eq!(params.mac, MacAlgorithm::HmacSha512);
        assert_eq!(params.rsa_bits, 2048);
        assert_eq!(params.header_length(), 64 + 16);
    }
}
