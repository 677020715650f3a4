//! Open/closed state machine for vault files.
//!
//! Every tracked file is either CLOSED (ciphertext on disk) or OPEN
//! (plaintext on disk, member of the open set). Files start CLOSED. Each
//! transition rewrites the file through a temporary file and an atomic
//! rename, so a failed transition leaves the previous content in place.
//!
//! Local layout: `<root>/<namespace>/<owner>/<filename>`. An OPEN file has
//! an empty marker `.sealshare-open-<filename>` beside it, so plaintext left
//! behind by a process that never closed it is found again at login.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::record::FileRecord;
use sealshare_common::{AggregateError, Error, FileId, Namespace, Result, Username};
use sealshare_crypto::{FileCipher, SymmetricKey};

/// Prefix of temporary files written inside the vault.
const TEMP_PREFIX: &str = ".sealshare-";

/// Marker sitting next to the content of an OPEN file.
fn open_marker(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}open-{}", TEMP_PREFIX, name))
}

fn clear_open_marker(file: &FileId, path: &Path) {
    match fs::remove_file(open_marker(path)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            warn!(file = %file, error = %e, "Failed to remove open marker");
        }
        _ => {}
    }
}

/// Tracks vault files and which of them are open.
pub struct VaultFileTracker {
    root: PathBuf,
    cipher: FileCipher,
    records: BTreeMap<FileId, FileRecord>,
    open: BTreeSet<FileId>,
}

impl VaultFileTracker {
    pub fn new(root: impl Into<PathBuf>, cipher: FileCipher) -> Self {
        Self {
            root: root.into(),
            cipher,
            records: BTreeMap::new(),
            open: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cipher(&self) -> &FileCipher {
        &self.cipher
    }

    /// Where `file` lives locally when stored in `namespace`.
    pub fn local_path(&self, file: &FileId, namespace: Namespace) -> PathBuf {
        self.root
            .join(namespace.as_str())
            .join(file.owner().as_str())
            .join(file.filename())
    }

    /// Start tracking a CLOSED file at its layout path.
    ///
    /// # Errors
    /// - `AlreadyExists` if the file is already tracked
    pub fn track(&mut self, file: FileId, namespace: Namespace) -> Result<&FileRecord> {
        if self.records.contains_key(&file) {
            return Err(Error::AlreadyExists(format!("{} is already tracked", file)));
        }
        let path = self.local_path(&file, namespace);
        debug!(file = %file, namespace = %namespace, "Tracking file");
        Ok(self
            .records
            .entry(file.clone())
            .or_insert_with(|| FileRecord::new(file, namespace, path)))
    }

    pub fn record(&self, file: &FileId) -> Option<&FileRecord> {
        self.records.get(file)
    }

    fn record_or_err(&self, file: &FileId) -> Result<&FileRecord> {
        self.records
            .get(file)
            .ok_or_else(|| Error::NotFound(format!("{} is not in the vault", file)))
    }

    fn record_mut_or_err(&mut self, file: &FileId) -> Result<&mut FileRecord> {
        self.records
            .get_mut(file)
            .ok_or_else(|| Error::NotFound(format!("{} is not in the vault", file)))
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    pub fn is_open(&self, file: &FileId) -> bool {
        self.open.contains(file)
    }

    pub fn open_files(&self) -> Vec<FileId> {
        self.open.iter().cloned().collect()
    }

    /// Move a CLOSED file's record to another namespace, dropping the old
    /// local copy. Used when the server reports the file now lives elsewhere.
    pub fn retarget(&mut self, file: &FileId, namespace: Namespace) -> Result<()> {
        if self.is_open(file) {
            return Err(Error::FileState(format!("{} is open", file)));
        }
        let path = self.local_path(file, namespace);
        let record = self.record_mut_or_err(file)?;
        if record.namespace() != namespace {
            record.relocate(namespace, path);
            record.commit()?;
        }
        Ok(())
    }

    /// Write fetched ciphertext to a CLOSED file's record path.
    pub fn store_ciphertext(&self, file: &FileId, data: &[u8]) -> Result<PathBuf> {
        if self.is_open(file) {
            return Err(Error::FileState(format!("{} is open", file)));
        }
        let path = self.record_or_err(file)?.path().to_path_buf();
        let dir = path
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("No directory for {}", file)))?;
        fs::create_dir_all(dir)?;

        let mut staged = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".tmp")
            .tempfile_in(dir)?;
        staged.write_all(data)?;
        staged.as_file().sync_all()?;
        staged.persist(&path).map_err(|e| Error::Io(e.error))?;
        debug!(file = %file, bytes = data.len(), "Stored ciphertext");
        Ok(path)
    }

    /// Decrypt a CLOSED file in place.
    ///
    /// # Preconditions
    /// - File is tracked, CLOSED and present locally
    ///
    /// # Postconditions
    /// - Plaintext is at the record path and the file is OPEN
    ///
    /// # Errors
    /// - `FileState` if already open
    /// - `NotFound` if the ciphertext is missing
    /// - `Integrity` if the ciphertext does not authenticate; nothing changes
    pub fn open(&mut self, file: &FileId, key: &SymmetricKey) -> Result<()> {
        if self.is_open(file) {
            return Err(Error::FileState(format!("{} is already open", file)));
        }
        let path = self.record_or_err(file)?.path().to_path_buf();
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "No local copy of {} at {}",
                file,
                path.display()
            )));
        }

        fs::write(open_marker(&path), b"")?;
        if let Err(e) = self.cipher.decrypt_file(&path, &path, key) {
            clear_open_marker(file, &path);
            return Err(e);
        }
        self.open.insert(file.clone());
        info!(file = %file, "Opened");
        Ok(())
    }

    /// Encrypt an OPEN file in place.
    ///
    /// # Errors
    /// - `FileState` if not open
    /// - I/O failure; the file stays OPEN with its plaintext untouched
    pub fn close(&mut self, file: &FileId, key: &SymmetricKey) -> Result<()> {
        if !self.is_open(file) {
            return Err(Error::FileState(format!("{} is not open", file)));
        }
        let path = self.record_or_err(file)?.path().to_path_buf();

        self.cipher.encrypt_file(&path, &path, key)?;
        self.open.remove(file);
        clear_open_marker(file, &path);
        info!(file = %file, "Closed");
        Ok(())
    }

    /// Close every open file.
    ///
    /// Each file is attempted independently with the key `key_for` returns
    /// for it. Every file leaves the open set whatever the outcome.
    ///
    /// # Errors
    /// - `Aggregate` holding one error per file that failed
    pub fn close_all<F>(&mut self, mut key_for: F) -> Result<()>
    where
        F: FnMut(&FileRecord) -> Result<SymmetricKey>,
    {
        let mut failures = AggregateError::new();

        for file in std::mem::take(&mut self.open) {
            let result = self.record_or_err(&file).and_then(|record| {
                let key = key_for(record)?;
                self.cipher.encrypt_file(record.path(), record.path(), &key)?;
                clear_open_marker(&file, record.path());
                Ok(())
            });
            match result {
                Ok(()) => info!(file = %file, "Closed"),
                Err(e) => {
                    warn!(file = %file, error = %e, "Failed to close file");
                    failures.push(e);
                }
            }
        }

        failures.into_result()
    }

    /// Encrypt an OPEN file under `key` into a staged file for `namespace`.
    ///
    /// The file stays OPEN with its plaintext untouched until
    /// [`VaultFileTracker::commit_close`]; [`VaultFileTracker::rollback_close`]
    /// discards the staged ciphertext.
    ///
    /// # Returns
    /// Path of the staged ciphertext.
    pub fn stage_close(
        &mut self,
        file: &FileId,
        key: &SymmetricKey,
        namespace: Namespace,
    ) -> Result<PathBuf> {
        if !self.is_open(file) {
            return Err(Error::FileState(format!("{} is not open", file)));
        }
        let target = self.local_path(file, namespace);
        let dir = target
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("No directory for {}", file)))?
            .to_path_buf();
        fs::create_dir_all(&dir)?;

        let source = self.record_or_err(file)?.path().to_path_buf();
        let mut staged = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        self.cipher
            .encrypt_stream(File::open(&source)?, staged.as_file_mut(), key)?;
        staged.as_file().sync_all()?;
        let (_, staged_path) = staged.keep().map_err(|e| Error::Io(e.error))?;

        let record = self.record_mut_or_err(file)?;
        record.relocate(namespace, target);
        record.stage(staged_path.clone());
        debug!(file = %file, namespace = %namespace, "Staged close");
        Ok(staged_path)
    }

    /// Finish a staged close: the staged ciphertext replaces the plaintext.
    pub fn commit_close(&mut self, file: &FileId) -> Result<()> {
        let record = self.record_mut_or_err(file)?;
        let opened_at = record.committed_path().to_path_buf();
        record.commit()?;
        self.open.remove(file);
        clear_open_marker(file, &opened_at);
        info!(file = %file, "Closed");
        Ok(())
    }

    /// Abandon a staged close; the file remains OPEN where it was.
    pub fn rollback_close(&mut self, file: &FileId) -> Result<()> {
        self.record_mut_or_err(file)?.rollback();
        Ok(())
    }

    /// Track the CLOSED files already present in the local layout for `user`.
    ///
    /// Picks up `<root>/personal/<user>/*` and every `<root>/shared/<owner>/*`.
    ///
    /// # Returns
    /// Number of files newly tracked.
    pub fn restore(&mut self, user: &Username) -> Result<usize> {
        let mut restored = 0;

        let personal = self.root.join(Namespace::Personal.as_str()).join(user.as_str());
        restored += self.restore_dir(&personal, user, Namespace::Personal)?;

        let shared = self.root.join(Namespace::Shared.as_str());
        if shared.is_dir() {
            for entry in fs::read_dir(&shared)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let Some(owner) = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| Username::new(name).ok())
                else {
                    continue;
                };
                restored += self.restore_dir(&entry.path(), &owner, Namespace::Shared)?;
            }
        }

        if restored > 0 {
            info!(user = %user, count = restored, "Restored vault files");
        }
        Ok(restored)
    }

    /// CLOSED records whose open marker survived, meaning a previous process
    /// may have left their plaintext on disk.
    pub fn interrupted(&self) -> Vec<FileId> {
        self.records
            .values()
            .filter(|record| !self.is_open(record.file()))
            .filter(|record| open_marker(record.path()).exists())
            .map(|record| record.file().clone())
            .collect()
    }

    /// Settle an interrupted record by checking its content against `key`.
    ///
    /// Content that authenticates is ciphertext: the marker is dropped and
    /// the file stays CLOSED. Anything else is plaintext and the file
    /// rejoins the open set.
    ///
    /// # Returns
    /// `true` if the file is now OPEN.
    pub fn recover(&mut self, file: &FileId, key: &SymmetricKey) -> Result<bool> {
        if self.is_open(file) {
            return Err(Error::FileState(format!("{} is already open", file)));
        }
        let path = self.record_or_err(file)?.path().to_path_buf();
        if !path.exists() {
            clear_open_marker(file, &path);
            return Ok(false);
        }

        match self.cipher.decrypt_stream(File::open(&path)?, io::sink(), key) {
            Ok(_) => {
                clear_open_marker(file, &path);
                Ok(false)
            }
            Err(e) if e.is_integrity() => {
                self.open.insert(file.clone());
                warn!(file = %file, "Found plaintext left open by an earlier session");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    fn restore_dir(&mut self, dir: &Path, owner: &Username, namespace: Namespace) -> Result<usize> {
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut restored = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            let Ok(file) = FileId::new(name, owner.clone()) else {
                continue;
            };
            if !self.records.contains_key(&file) {
                self.track(file, namespace)?;
                restored += 1;
            }
        }
        Ok(restored)
    }

    /// Forget all records. Open files must have been closed first.
    pub fn clear(&mut self) {
        if !self.open.is_empty() {
            warn!(count = self.open.len(), "Clearing tracker with open files");
        }
        self.records.clear();
        self.open.clear();
    }
}
