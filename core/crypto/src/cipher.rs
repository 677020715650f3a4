//! Authenticated file encryption.
//!
//! Encrypted file layout, byte-exact and without delimiters:
//!
//! ```text
//! [integrity value: MAC output length][iv: cipher block size][ciphertext]
//! ```
//!
//! The integrity value is an HMAC over the *plaintext*, keyed with the file
//! key. The ciphertext is AES-CBC with PKCS#7 padding under a fresh random IV.
//! Both directions stream through a fixed-size buffer, so memory use does not
//! depend on file size.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use aes::{Aes128, Aes256, Block};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Sha256, Sha512};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::keys::SymmetricKey;
use crate::params::{CipherAlgorithm, CryptoParams, MacAlgorithm};
use sealshare_common::{Error, Result};

/// CBC encryptor over the configured block cipher.
enum BlockEncryptor {
    Aes128(cbc::Encryptor<Aes128>),
    Aes256(cbc::Encryptor<Aes256>),
}

impl BlockEncryptor {
    fn new(algorithm: CipherAlgorithm, key: &[u8], iv: &[u8]) -> Result<Self> {
        let invalid =
            |e: cbc::cipher::InvalidLength| Error::Crypto(format!("Cipher initialization failed: {}", e));
        Ok(match algorithm {
            CipherAlgorithm::Aes128Cbc => {
                Self::Aes128(cbc::Encryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            CipherAlgorithm::Aes256Cbc => {
                Self::Aes256(cbc::Encryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
        })
    }

    /// Encrypt whole blocks in place. `data.len()` must be a multiple of the block size.
    fn encrypt_blocks(&mut self, data: &mut [u8]) {
        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let block = Block::from_mut_slice(chunk);
            match self {
                Self::Aes128(enc) => enc.encrypt_block_mut(block),
                Self::Aes256(enc) => enc.encrypt_block_mut(block),
            }
        }
    }

    /// Pad and encrypt the trailing partial block.
    fn finish(self, tail: &[u8]) -> Vec<u8> {
        match self {
            Self::Aes128(enc) => enc.encrypt_padded_vec_mut::<Pkcs7>(tail),
            Self::Aes256(enc) => enc.encrypt_padded_vec_mut::<Pkcs7>(tail),
        }
    }
}

/// CBC decryptor over the configured block cipher.
enum BlockDecryptor {
    Aes128(cbc::Decryptor<Aes128>),
    Aes256(cbc::Decryptor<Aes256>),
}

impl BlockDecryptor {
    fn new(algorithm: CipherAlgorithm, key: &[u8], iv: &[u8]) -> Result<Self> {
        let invalid =
            |e: cbc::cipher::InvalidLength| Error::Crypto(format!("Cipher initialization failed: {}", e));
        Ok(match algorithm {
            CipherAlgorithm::Aes128Cbc => {
                Self::Aes128(cbc::Decryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            CipherAlgorithm::Aes256Cbc => {
                Self::Aes256(cbc::Decryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
        })
    }

    fn decrypt_blocks(&mut self, data: &mut [u8]) {
        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let block = Block::from_mut_slice(chunk);
            match self {
                Self::Aes128(dec) => dec.decrypt_block_mut(block),
                Self::Aes256(dec) => dec.decrypt_block_mut(block),
            }
        }
    }

    /// Decrypt the final block and strip its padding.
    fn finish(self, last: &[u8]) -> Result<Vec<u8>> {
        let unpadded = match self {
            Self::Aes128(dec) => dec.decrypt_padded_vec_mut::<Pkcs7>(last),
            Self::Aes256(dec) => dec.decrypt_padded_vec_mut::<Pkcs7>(last),
        };
        unpadded.map_err(|_| Error::Integrity("Invalid padding".to_string()))
    }
}

/// Running integrity value over plaintext.
enum IntegrityMac {
    Sha256(Hmac<Sha256>),
    Sha512(Hmac<Sha512>),
}

impl IntegrityMac {
    fn new(algorithm: MacAlgorithm, key: &[u8]) -> Result<Self> {
        let invalid =
            |e: hmac::digest::InvalidLength| Error::Crypto(format!("MAC initialization failed: {}", e));
        Ok(match algorithm {
            MacAlgorithm::HmacSha256 => {
                Self::Sha256(<Hmac<Sha256> as Mac>::new_from_slice(key).map_err(invalid)?)
            }
            MacAlgorithm::HmacSha512 => {
                Self::Sha512(<Hmac<Sha512> as Mac>::new_from_slice(key).map_err(invalid)?)
            }
        })
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(mac) => mac.update(data),
            Self::Sha512(mac) => mac.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha256(mac) => mac.finalize().into_bytes().to_vec(),
            Self::Sha512(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }

    /// Constant-time comparison against a stored value.
    fn verify(self, expected: &[u8]) -> bool {
        match self {
            Self::Sha256(mac) => mac.verify_slice(expected).is_ok(),
            Self::Sha512(mac) => mac.verify_slice(expected).is_ok(),
        }
    }
}

/// AES block size in bytes.
const BLOCK_SIZE: usize = 16;

/// Read into `buf`, retrying on interruption.
fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Read an exact-length header field; a short read means a malformed file.
fn read_field<R: Read>(reader: &mut R, len: usize, name: &str) -> Result<Vec<u8>> {
    let mut field = vec![0u8; len];
    match reader.read_exact(&mut field) {
        Ok(()) => Ok(field),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::Integrity(format!(
            "Encrypted data too short to contain the {}",
            name
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Symmetric encrypt/decrypt with tamper detection.
///
/// Holds only immutable parameters; every call is independent.
#[derive(Debug, Clone)]
pub struct FileCipher {
    params: CryptoParams,
}

impl FileCipher {
    /// Create a cipher for the given parameters.
    ///
    /// # Errors
    /// - Returns error if the parameters are inconsistent
    pub fn new(params: CryptoParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &CryptoParams {
        &self.params
    }

    fn check_key(&self, key: &SymmetricKey) -> Result<()> {
        let expected = self.params.cipher.key_length();
        if key.len() != expected {
            return Err(Error::Crypto(format!(
                "Invalid key length: expected {}, got {}",
                expected,
                key.len()
            )));
        }
        Ok(())
    }

    /// Encrypt everything from `reader` into `writer`.
    ///
    /// The integrity slot is written as zeros first and filled in once the
    /// whole plaintext has been seen, so the writer must be seekable.
    ///
    /// # Returns
    /// Number of plaintext bytes consumed.
    pub fn encrypt_stream<R: Read, W: Write + Seek>(
        &self,
        mut reader: R,
        mut writer: W,
        key: &SymmetricKey,
    ) -> Result<u64> {
        self.check_key(key)?;

        let mut iv = vec![0u8; self.params.cipher.block_size()];
        OsRng.fill_bytes(&mut iv);

        let mut mac = IntegrityMac::new(self.params.mac, key.as_bytes())?;
        let mut encryptor = BlockEncryptor::new(self.params.cipher, key.as_bytes(), &iv)?;

        let start = writer.stream_position()?;
        writer.write_all(&vec![0u8; self.params.mac.output_length()])?;
        writer.write_all(&iv)?;

        let chunk = self.params.buffer_size;
        let mut buffer = vec![0u8; chunk + BLOCK_SIZE];
        let mut pending = 0usize;
        let mut total = 0u64;

        loop {
            let read = read_some(&mut reader, &mut buffer[pending..pending + chunk])?;
            if read == 0 {
                break;
            }
            mac.update(&buffer[pending..pending + read]);
            pending += read;
            total += read as u64;

            let whole = pending - pending % BLOCK_SIZE;
            encryptor.encrypt_blocks(&mut buffer[..whole]);
            writer.write_all(&buffer[..whole])?;
            buffer.copy_within(whole..pending, 0);
            pending -= whole;
        }

        writer.write_all(&encryptor.finish(&buffer[..pending]))?;

        let end = writer.stream_position()?;
        writer.seek(SeekFrom::Start(start))?;
        writer.write_all(&mac.finalize())?;
        writer.seek(SeekFrom::Start(end))?;
        writer.flush()?;

        Ok(total)
    }

    /// Decrypt everything from `reader` into `writer`.
    ///
    /// Plaintext is written as it is recovered; the caller must discard the
    /// output unless this returns `Ok`.
    ///
    /// # Errors
    /// - `Integrity` if the stored value does not match the recovered
    ///   plaintext, or the data is truncated or badly padded
    /// - `Io` on read/write failures
    pub fn decrypt_stream<R: Read, W: Write>(
        &self,
        mut reader: R,
        mut writer: W,
        key: &SymmetricKey,
    ) -> Result<u64> {
        self.check_key(key)?;

        let stored_mac = read_field(&mut reader, self.params.mac.output_length(), "integrity value")?;
        let iv = read_field(&mut reader, self.params.cipher.block_size(), "IV")?;

        let mut mac = IntegrityMac::new(self.params.mac, key.as_bytes())?;
        let mut decryptor = BlockDecryptor::new(self.params.cipher, key.as_bytes(), &iv)?;

        let chunk = self.params.buffer_size;
        let mut buffer = vec![0u8; chunk + 2 * BLOCK_SIZE];
        let mut pending = 0usize;
        let mut total = 0u64;

        loop {
            let read = read_some(&mut reader, &mut buffer[pending..pending + chunk])?;
            if read == 0 {
                break;
            }
            pending += read;

            // Always hold back the final block until end of input: it carries padding.
            if pending > BLOCK_SIZE {
                let mut ready = pending - BLOCK_SIZE;
                ready -= ready % BLOCK_SIZE;
                decryptor.decrypt_blocks(&mut buffer[..ready]);
                mac.update(&buffer[..ready]);
                writer.write_all(&buffer[..ready])?;
                total += ready as u64;
                buffer.copy_within(ready..pending, 0);
                pending -= ready;
            }
        }

        if pending != BLOCK_SIZE {
            return Err(Error::Integrity(
                "Ciphertext is truncated or not block aligned".to_string(),
            ));
        }

        let last = decryptor.finish(&buffer[..pending])?;
        mac.update(&last);
        writer.write_all(&last)?;
        writer.flush()?;
        total += last.len() as u64;

        if !mac.verify(&stored_mac) {
            return Err(Error::Integrity(
                "Integrity value does not match, data is corrupted or was tampered with"
                    .to_string(),
            ));
        }

        Ok(total)
    }

    /// Encrypt `source` into `dest`.
    ///
    /// Output goes to a temporary file next to `dest` and is renamed into
    /// place only on success. `source` and `dest` may be the same path.
    pub fn encrypt_file(&self, source: &Path, dest: &Path, key: &SymmetricKey) -> Result<()> {
        let input = File::open(source)?;
        let mut staged = temp_beside(dest)?;
        let bytes = self.encrypt_stream(input, staged.as_file_mut(), key)?;
        staged.as_file().sync_all()?;
        staged.persist(dest).map_err(|e| Error::Io(e.error))?;

        debug!(path = %dest.display(), bytes, "Encrypted file");
        Ok(())
    }

    /// Decrypt `source` into `dest`.
    ///
    /// Nothing is written to `dest` unless the integrity check passes; a
    /// failed attempt leaves no partial output behind.
    pub fn decrypt_file(&self, source: &Path, dest: &Path, key: &SymmetricKey) -> Result<()> {
        let input = File::open(source)?;
        let mut staged = temp_beside(dest)?;
        let bytes = self.decrypt_stream(input, staged.as_file_mut(), key)?;
        staged.as_file().sync_all()?;
        staged.persist(dest).map_err(|e| Error::Io(e.error))?;

        debug!(path = %dest.display(), bytes, "Decrypted file");
        Ok(())
    }

    /// Encrypt an in-memory buffer into the same layout as a file.
    pub fn seal(&self, plaintext: &[u8], key: &SymmetricKey) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::with_capacity(
            self.params.header_length() + plaintext.len() + BLOCK_SIZE,
        ));
        self.encrypt_stream(plaintext, &mut out, key)?;
        Ok(out.into_inner())
    }

    /// Decrypt an in-memory buffer produced by [`FileCipher::seal`].
    pub fn open(&self, sealed: &[u8], key: &SymmetricKey) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(sealed.len());
        self.decrypt_stream(sealed, &mut out, key)?;
        Ok(out)
    }
}

/// Temporary file in the destination's directory, removed on drop unless persisted.
fn temp_beside(dest: &Path) -> Result<NamedTempFile> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(tempfile::Builder::new()
        .prefix(".sealshare-")
        .suffix(".tmp")
        .tempfile_in(dir)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn cipher() -> FileCipher {
        FileCipher::new(CryptoParams::for_tests()).unwrap()
    }

    fn key(byte: u8) -> SymmetricKey {
        SymmetricKey::from_bytes(vec![byte; 32]).unwrap()
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = cipher();
        let plaintext = b"Hello, encrypted world!";

        let sealed = cipher.seal(plaintext, &key(42)).unwrap();
        let opened = cipher.open(&sealed, &key(42)).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_layout_sizes() {
        let cipher = cipher();
        let header = cipher.params().header_length();

        // Padding always adds between 1 and 16 bytes.
        assert_eq!(cipher.seal(b"", &key(1)).unwrap().len(), header + 16);
        assert_eq!(cipher.seal(&[0u8; 15], &key(1)).unwrap().len(), header + 16);
        assert_eq!(cipher.seal(&[0u8; 16], &key(1)).unwrap().len(), header + 32);
    }

    #[test]
    fn test_fresh_iv_each_time() {
        let cipher = cipher();
        let mac_len = cipher.params().mac.output_length();

        let ct1 = cipher.seal(b"same plaintext", &key(3)).unwrap();
        let ct2 = cipher.seal(b"same plaintext", &key(3)).unwrap();

        // Same plaintext and key give the same integrity value but a new IV.
        assert_eq!(ct1[..mac_len], ct2[..mac_len]);
        assert_ne!(ct1[mac_len..mac_len + 16], ct2[mac_len..mac_len + 16]);
    }

    #[test]
    fn test_small_buffer_spans_many_chunks() {
        let params = CryptoParams {
            buffer_size: 7,
            ..CryptoParams::for_tests()
        };
        let cipher = FileCipher::new(params).unwrap();
        let plaintext: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        let sealed = cipher.seal(&plaintext, &key(9)).unwrap();
        assert_eq!(cipher.open(&sealed, &key(9)).unwrap(), plaintext);
    }

    #[test]
    fn test_aes128_and_sha512() {
        let mut params = CryptoParams::for_tests();
        params.cipher = CipherAlgorithm::Aes128Cbc;
        params.kdf.key_length = 16;
        params.mac = MacAlgorithm::HmacSha512;
        let cipher = FileCipher::new(params).unwrap();
        let key = SymmetricKey::from_bytes(vec![5u8; 16]).unwrap();

        let sealed = cipher.seal(b"short key", &key).unwrap();
        assert_eq!(sealed.len(), 64 + 16 + 16);
        assert_eq!(cipher.open(&sealed, &key).unwrap(), b"short key");
    }

    #[test]
    fn test_wrong_key_is_integrity_error() {
        let cipher = cipher();
        let sealed = cipher.seal(b"Secret data", &key(1)).unwrap();

        let err = cipher.open(&sealed, &key(2)).unwrap_err();
        assert!(err.is_integrity(), "unexpected error: {err}");
    }

    #[test]
    fn test_key_length_mismatch_rejected() {
        let cipher = cipher();
        let short = SymmetricKey::from_bytes(vec![0u8; 16]).unwrap();
        assert!(matches!(cipher.seal(b"data", &short), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_truncated_input_is_integrity_error() {
        let cipher = cipher();
        let sealed = cipher.seal(b"some bytes", &key(4)).unwrap();

        assert!(cipher.open(&sealed[..10], &key(4)).unwrap_err().is_integrity());
        assert!(cipher
            .open(&sealed[..sealed.len() - 1], &key(4))
            .unwrap_err()
            .is_integrity());
    }

    #[test]
    fn test_encrypt_decrypt_file_in_place() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.txt");
        std::fs::write(&path, b"plaintext on disk").unwrap();

        let cipher = cipher();
        cipher.encrypt_file(&path, &path, &key(6)).unwrap();
        assert_ne!(std::fs::read(&path).unwrap(), b"plaintext on disk");

        cipher.decrypt_file(&path, &path, &key(6)).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"plaintext on disk");
    }

    #[test]
    fn test_failed_decrypt_leaves_no_output() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("closed.bin");
        let dest = temp.path().join("opened.txt");
        std::fs::write(&source, cipher().seal(b"content", &key(1)).unwrap()).unwrap();

        let err = cipher().decrypt_file(&source, &dest, &key(2)).unwrap_err();
        assert!(err.is_integrity());
        assert!(!dest.exists());

        // Only the source remains: the staged temp file was removed.
        let entries: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let cipher = cipher();
            let sealed = cipher.seal(&plaintext, &key(11)).unwrap();
            prop_assert_eq!(cipher.open(&sealed, &key(11)).unwrap(), plaintext);
        }

        #[test]
        fn prop_single_byte_tamper_detected(
            plaintext in proptest::collection::vec(any::<u8>(), 0..256),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let cipher = cipher();
            let mut sealed = cipher.seal(&plaintext, &key(12)).unwrap();
            let i = index.index(sealed.len());
            sealed[i] ^= flip;

            let result = cipher.open(&sealed, &key(12));
            prop_assert!(matches!(result, Err(Error::Integrity(_))));
        }
    }
}
