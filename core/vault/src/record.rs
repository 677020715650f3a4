//! Transactional file records.
//!
//! A record carries its current fields next to the last committed ones.
//! Multi-step operations change the current fields and stage a replacement
//! ciphertext, then either `commit` (move the staged file into place and
//! advance the baseline) or `rollback` (discard the staged file and restore
//! the baseline).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use sealshare_common::{FileId, Namespace, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
struct RecordFields {
    namespace: Namespace,
    path: PathBuf,
}

/// Local bookkeeping for one vault file.
#[derive(Debug, Clone)]
pub struct FileRecord {
    file: FileId,
    current: RecordFields,
    committed: RecordFields,
    staged: Option<PathBuf>,
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl FileRecord {
    pub fn new(file: FileId, namespace: Namespace, path: PathBuf) -> Self {
        let fields = RecordFields { namespace, path };
        Self {
            file,
            current: fields.clone(),
            committed: fields,
            staged: None,
        }
    }

    pub fn file(&self) -> &FileId {
        &self.file
    }

    pub fn namespace(&self) -> Namespace {
        self.current.namespace
    }

    /// Local path of the file's content.
    pub fn path(&self) -> &Path {
        &self.current.path
    }

    pub fn committed_path(&self) -> &Path {
        &self.committed.path
    }

    /// Whether there are uncommitted changes.
    pub fn is_dirty(&self) -> bool {
        self.current != self.committed || self.staged.is_some()
    }

    /// Point the record at a new namespace and local path.
    pub fn relocate(&mut self, namespace: Namespace, path: PathBuf) {
        self.current = RecordFields { namespace, path };
    }

    /// Register a file that should replace the content at commit time.
    ///
    /// A previously staged file is discarded.
    pub fn stage(&mut self, staged: PathBuf) {
        if let Some(old) = self.staged.replace(staged) {
            if let Err(e) = remove_if_exists(&old) {
                warn!(file = %self.file, error = %e, "Failed to discard staged file");
            }
        }
    }

    pub fn staged(&self) -> Option<&Path> {
        self.staged.as_deref()
    }

    /// Apply pending changes.
    ///
    /// # Postconditions
    /// - The staged file, if any, is at `path()`
    /// - Content at a previous committed path is removed
    /// - The baseline equals the current fields
    ///
    /// # Errors
    /// - I/O failure moving the staged file; the record is left unchanged
    pub fn commit(&mut self) -> Result<()> {
        if let Some(staged) = self.staged.as_deref() {
            if let Some(parent) = self.current.path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(staged, &self.current.path)?;
            self.staged = None;
        }

        if self.committed.path != self.current.path {
            if let Err(e) = remove_if_exists(&self.committed.path) {
                warn!(
                    file = %self.file,
                    path = %self.committed.path.display(),
                    error = %e,
                    "Failed to remove previous copy"
                );
            }
        }

        self.committed = self.current.clone();
        debug!(file = %self.file, path = %self.current.path.display(), "Record committed");
        Ok(())
    }

    /// Discard pending changes and restore the baseline.
    pub fn rollback(&mut self) {
        if let Some(staged) = self.staged.take() {
            if let Err(e) = remove_if_exists(&staged) {
                warn!(file = %self.file, error = %e, "Failed to discard staged file");
            }
        }
        self.current = self.committed.clone();
        debug!(file = %self.file, "Record rolled back");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealshare_common::Username;
    use tempfile::TempDir;

    fn record(dir: &Path) -> FileRecord {
        let file = FileId::new("a.txt", Username::new("alice").unwrap()).unwrap();
        FileRecord::new(file, Namespace::Personal, dir.join("personal").join("a.txt"))
    }

    #[test]
    fn test_commit_moves_staged_file() {
        let temp = TempDir::new().unwrap();
        let mut record = record(temp.path());
        fs::create_dir_all(record.path().parent().unwrap()).unwrap();
        fs::write(record.path(), b"old").unwrap();
        let old_path = record.path().to_path_buf();

        let staged = temp.path().join("staged.tmp");
        fs::write(&staged, b"new").unwrap();
        let new_path = temp.path().join("shared").join("a.txt");
        record.relocate(Namespace::Shared, new_path.clone());
        record.stage(staged.clone());
        assert!(record.is_dirty());

        record.commit().unwrap();

        assert!(!record.is_dirty());
        assert_eq!(record.namespace(), Namespace::Shared);
        assert_eq!(fs::read(&new_path).unwrap(), b"new");
        assert!(!old_path.exists());
        assert!(!staged.exists());
    }

    #[test]
    fn test_rollback_restores_baseline() {
        let temp = TempDir::new().unwrap();
        let mut record = record(temp.path());
        let original = record.path().to_path_buf();

        let staged = temp.path().join("staged.tmp");
        fs::write(&staged, b"new").unwrap();
        record.relocate(Namespace::Shared, temp.path().join("elsewhere"));
        record.stage(staged.clone());

        record.rollback();

        assert!(!record.is_dirty());
        assert_eq!(record.path(), original);
        assert_eq!(record.namespace(), Namespace::Personal);
        assert!(!staged.exists());
    }

    #[test]
    fn test_commit_in_place_overwrites() {
        let temp = TempDir::new().unwrap();
        let mut record = record(temp.path());
        fs::create_dir_all(record.path().parent().unwrap()).unwrap();
        fs::write(record.path(), b"plaintext").unwrap();

        let staged = temp.path().join("staged.tmp");
        fs::write(&staged, b"ciphertext").unwrap();
        record.stage(staged);
        record.commit().unwrap();

        assert_eq!(fs::read(record.path()).unwrap(), b"ciphertext");
    }
}
