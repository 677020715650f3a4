//! User certificates and the pinned root of trust.
//!
//! A certificate binds a username to an RSA public key. It is issued by the
//! root certificate authority and must be verified against the pinned
//! [`TrustAnchor`] before its public key is used to wrap anything.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::keys::{decode_public_key, encode_public_key};
use sealshare_common::{Error, Result, Username};

/// Issuer name of the root certificate authority.
pub const DEFAULT_ISSUER: &str = "SealShare Root CA";

/// How long an issued certificate stays valid.
pub const CERTIFICATE_VALIDITY_DAYS: i64 = 365;

/// Signed portion of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBody {
    pub serial: String,
    pub subject: Username,
    pub issuer: String,
    /// SubjectPublicKeyInfo DER.
    #[serde(with = "hex")]
    pub public_key: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateBody {
    fn signed_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// A certificate as handed out by the certificate directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub body: CertificateBody,
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
}

impl Certificate {
    pub fn subject(&self) -> &Username {
        &self.body.subject
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Root key pair that signs user certificates.
pub struct CertificateAuthority {
    issuer: String,
    private_key: RsaPrivateKey,
}

impl CertificateAuthority {
    pub fn new(issuer: impl Into<String>, private_key: RsaPrivateKey) -> Self {
        Self {
            issuer: issuer.into(),
            private_key,
        }
    }

    /// Create a new root with a random key.
    pub fn generate(issuer: impl Into<String>, bits: usize) -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::Crypto(format!("CA key generation failed: {}", e)))?;
        Ok(Self::new(issuer, private_key))
    }

    /// Restore a root from its PKCS#8 DER private key.
    pub fn from_pkcs8_der(issuer: impl Into<String>, der: &[u8]) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| Error::Crypto(format!("Invalid CA key: {}", e)))?;
        Ok(Self::new(issuer, private_key))
    }

    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let doc = self
            .private_key
            .to_pkcs8_der()
            .map_err(|e| Error::Crypto(format!("CA key encoding failed: {}", e)))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The anchor clients pin to verify certificates from this authority.
    pub fn trust_anchor(&self) -> TrustAnchor {
        TrustAnchor::new(self.issuer.clone(), self.private_key.to_public_key())
    }

    /// Issue a certificate valid for one year from now.
    ///
    /// # Errors
    /// - `Crypto` if `public_key_der` is not an RSA SubjectPublicKeyInfo
    pub fn issue(&self, subject: &Username, public_key_der: &[u8]) -> Result<Certificate> {
        let now = Utc::now();
        self.issue_between(
            subject,
            public_key_der,
            now,
            now + Duration::days(CERTIFICATE_VALIDITY_DAYS),
        )
    }

    fn issue_between(
        &self,
        subject: &Username,
        public_key_der: &[u8],
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<Certificate> {
        decode_public_key(public_key_der)?;

        let body = CertificateBody {
            serial: uuid::Uuid::new_v4().to_string(),
            subject: subject.clone(),
            issuer: self.issuer.clone(),
            public_key: public_key_der.to_vec(),
            not_before,
            not_after,
        };

        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let signature = signing_key
            .try_sign(&body.signed_bytes()?)
            .map_err(|e| Error::Crypto(format!("Certificate signing failed: {}", e)))?;

        debug!(subject = %subject, serial = %body.serial, "Issued certificate");

        Ok(Certificate {
            body,
            signature: signature.to_vec(),
        })
    }
}

/// Pinned root public key.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustAnchor {
    issuer: String,
    public_key: RsaPublicKey,
}

impl TrustAnchor {
    pub fn new(issuer: impl Into<String>, public_key: RsaPublicKey) -> Self {
        Self {
            issuer: issuer.into(),
            public_key,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Load a pinned root public key (SPKI DER) issued under [`DEFAULT_ISSUER`].
    pub fn load(path: &Path) -> Result<Self> {
        let der = fs::read(path)?;
        Ok(Self::new(DEFAULT_ISSUER, decode_public_key(&der)?))
    }

    /// Write the root public key as SPKI DER.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, encode_public_key(&self.public_key)?)?;
        Ok(())
    }

    /// Verify a certificate and return the public key it vouches for.
    ///
    /// # Errors
    /// - `Trust` if the issuer differs, the signature does not verify, the
    ///   certificate is outside its validity window, or it names another subject
    pub fn verify(&self, certificate: &Certificate, expected_subject: &Username) -> Result<RsaPublicKey> {
        self.verify_at(certificate, expected_subject, Utc::now())
    }

    fn verify_at(
        &self,
        certificate: &Certificate,
        expected_subject: &Username,
        now: DateTime<Utc>,
    ) -> Result<RsaPublicKey> {
        let body = &certificate.body;

        if body.issuer != self.issuer {
            return Err(Error::Trust(format!(
                "Certificate issued by '{}', not by the pinned root",
                body.issuer
            )));
        }

        let signature = Signature::try_from(certificate.signature.as_slice())
            .map_err(|_| Error::Trust("Malformed certificate signature".to_string()))?;
        VerifyingKey::<Sha256>::new(self.public_key.clone())
            .verify(&body.signed_bytes()?, &signature)
            .map_err(|_| Error::Trust("Certificate signature does not verify".to_string()))?;

        if now < body.not_before || now > body.not_after {
            return Err(Error::Trust(format!(
                "Certificate for {} is outside its validity period",
                body.subject
            )));
        }

        if &body.subject != expected_subject {
            return Err(Error::Trust(format!(
                "Certificate is for {}, expected {}",
                body.subject, expected_subject
            )));
        }

        decode_public_key(&body.public_key)
            .map_err(|e| Error::Trust(format!("Certificate public key unusable: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::derive_key_pair;
    use crate::keys::SymmetricKey;
    use tempfile::TempDir;

    fn authority() -> CertificateAuthority {
        CertificateAuthority::generate(DEFAULT_ISSUER, 1024).unwrap()
    }

    fn user(name: &str) -> Username {
        Username::new(name).unwrap()
    }

    fn user_key_der(seed: u8) -> Vec<u8> {
        let master = SymmetricKey::from_bytes(vec![seed; 32]).unwrap();
        derive_key_pair(&master, 1024).unwrap().public_key_der().unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let ca = authority();
        let der = user_key_der(1);
        let cert = ca.issue(&user("bob"), &der).unwrap();

        let key = ca.trust_anchor().verify(&cert, &user("bob")).unwrap();
        assert_eq!(encode_public_key(&key).unwrap(), der);
        assert_eq!(
            cert.body.not_after - cert.body.not_before,
            Duration::days(CERTIFICATE_VALIDITY_DAYS)
        );
    }

    #[test]
    fn test_foreign_root_rejected() {
        let ca = authority();
        let rogue = authority();
        let cert = rogue.issue(&user("bob"), &user_key_der(1)).unwrap();

        let result = ca.trust_anchor().verify(&cert, &user("bob"));
        assert!(matches!(result, Err(Error::Trust(_))));
    }

    #[test]
    fn test_tampered_key_rejected() {
        let ca = authority();
        let mut cert = ca.issue(&user("bob"), &user_key_der(1)).unwrap();
        cert.body.public_key = user_key_der(2);

        let result = ca.trust_anchor().verify(&cert, &user("bob"));
        assert!(matches!(result, Err(Error::Trust(_))));
    }

    #[test]
    fn test_wrong_subject_rejected() {
        let ca = authority();
        let cert = ca.issue(&user("mallory"), &user_key_der(1)).unwrap();

        let result = ca.trust_anchor().verify(&cert, &user("bob"));
        assert!(matches!(result, Err(Error::Trust(_))));
    }

    #[test]
    fn test_expired_rejected() {
        let ca = authority();
        let start = Utc::now() - Duration::days(400);
        let cert = ca
            .issue_between(&user("bob"), &user_key_der(1), start, start + Duration::days(365))
            .unwrap();

        let result = ca.trust_anchor().verify(&cert, &user("bob"));
        assert!(matches!(result, Err(Error::Trust(_))));
    }

    #[test]
    fn test_issue_rejects_garbage_key() {
        let ca = authority();
        assert!(ca.issue(&user("bob"), b"not a key").is_err());
    }

    #[test]
    fn test_certificate_bytes_roundtrip_still_verifies() {
        let ca = authority();
        let cert = ca.issue(&user("bob"), &user_key_der(1)).unwrap();

        let parsed = Certificate::from_bytes(&cert.to_bytes().unwrap()).unwrap();
        assert!(ca.trust_anchor().verify(&parsed, &user("bob")).is_ok());
    }

    #[test]
    fn test_anchor_save_load_and_ca_restore() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rootca.pub");
        let ca = authority();
        ca.trust_anchor().save(&path).unwrap();

        let restored = CertificateAuthority::from_pkcs8_der(DEFAULT_ISSUER, &ca.to_pkcs8_der().unwrap()).unwrap();
        let cert = restored.issue(&user("bob"), &user_key_der(3)).unwrap();

        let anchor = TrustAnchor::load(&path).unwrap();
        assert_eq!(anchor, ca.trust_anchor());
        assert!(anchor.verify(&cert, &user("bob")).is_ok());
    }
}
