//! Document key wrapping.
//!
//! A document key is wrapped one of two ways. The owner's copy is sealed
//! under the owner's master key with the same authenticated construction as
//! file content. A recipient's copy is encrypted under the RSA public key from
//! the recipient's verified certificate with PKCS#1 v1.5 padding.
//!
//! A wrapped key carries its method and only the matching unwrap accepts it.

use rand::rngs::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::cipher::FileCipher;
use crate::keys::{DocumentKey, SymmetricKey};
use crate::params::CryptoParams;
use sealshare_common::{Error, Result};

/// How a [`WrappedKey`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapMethod {
    /// Sealed under a symmetric key.
    Symmetric,
    /// Encrypted under an RSA public key.
    PublicKey,
}

/// Opaque wrapped document key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    pub method: WrapMethod,
    #[serde(with = "hex")]
    pub bytes: Vec<u8>,
}

impl WrappedKey {
    pub fn symmetric(bytes: Vec<u8>) -> Self {
        Self {
            method: WrapMethod::Symmetric,
            bytes,
        }
    }

    pub fn public_key(bytes: Vec<u8>) -> Self {
        Self {
            method: WrapMethod::PublicKey,
            bytes,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn expect_method(&self, method: WrapMethod) -> Result<()> {
        if self.method != method {
            return Err(Error::Crypto(format!(
                "Wrapped key was produced by {:?} wrapping, cannot unwrap as {:?}",
                self.method, method
            )));
        }
        Ok(())
    }
}

/// Wraps and unwraps document keys.
#[derive(Debug, Clone)]
pub struct KeyWrapCodec {
    cipher: FileCipher,
}

impl KeyWrapCodec {
    pub fn new(params: CryptoParams) -> Result<Self> {
        Ok(Self {
            cipher: FileCipher::new(params)?,
        })
    }

    fn key_length(&self) -> usize {
        self.cipher.params().cipher.key_length()
    }

    /// Seal a document key under a symmetric wrapping key.
    ///
    /// # Errors
    /// - `Crypto` if the wrapping key does not fit the configured cipher
    pub fn wrap_with_symmetric_key(
        &self,
        document_key: &DocumentKey,
        wrapping_key: &SymmetricKey,
    ) -> Result<WrappedKey> {
        let sealed = self
            .cipher
            .seal(document_key.as_bytes(), wrapping_key)
            .map_err(|e| Error::Crypto(format!("Symmetric key wrap failed: {}", e)))?;
        Ok(WrappedKey::symmetric(sealed))
    }

    /// Encrypt a document key under an RSA public key.
    ///
    /// The caller is responsible for having verified the certificate the
    /// public key came from.
    pub fn wrap_with_public_key(
        &self,
        document_key: &DocumentKey,
        public_key: &RsaPublicKey,
    ) -> Result<WrappedKey> {
        let encrypted = public_key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, document_key.as_bytes())
            .map_err(|e| Error::Crypto(format!("Public key wrap failed: {}", e)))?;
        Ok(WrappedKey::public_key(encrypted))
    }

    /// Inverse of [`KeyWrapCodec::wrap_with_symmetric_key`].
    ///
    /// # Errors
    /// - `Crypto` if the method does not match, the key is wrong, or the
    ///   blob is malformed
    pub fn unwrap_with_symmetric_key(
        &self,
        wrapped: &WrappedKey,
        key: &SymmetricKey,
    ) -> Result<DocumentKey> {
        wrapped.expect_method(WrapMethod::Symmetric)?;
        let raw = Zeroizing::new(
            self.cipher
                .open(wrapped.as_bytes(), key)
                .map_err(|e| Error::Crypto(format!("Symmetric key unwrap failed: {}", e)))?,
        );
        self.document_key(raw)
    }

    /// Inverse of [`KeyWrapCodec::wrap_with_public_key`].
    pub fn unwrap_with_private_key(
        &self,
        wrapped: &WrappedKey,
        private_key: &RsaPrivateKey,
    ) -> Result<DocumentKey> {
        wrapped.expect_method(WrapMethod::PublicKey)?;
        let raw = Zeroizing::new(
            private_key
                .decrypt(Pkcs1v15Encrypt, wrapped.as_bytes())
                .map_err(|e| Error::Crypto(format!("Private key unwrap failed: {}", e)))?,
        );
        self.document_key(raw)
    }

    fn document_key(&self, mut raw: Zeroizing<Vec<u8>>) -> Result<DocumentKey> {
        if raw.len() != self.key_length() {
            return Err(Error::Crypto(format!(
                "Unwrapped key has length {}, expected {}",
                raw.len(),
                self.key_length()
            )));
        }
        let key = SymmetricKey::from_bytes(std::mem::take(&mut *raw))?;
        Ok(DocumentKey::from_symmetric(key))
    }
}
