//! Engine directory layout and locking.
//!
//! ```text
//! <path>/
//! ├─ LOCK          # exclusive advisory lock, held while open
//! ├─ journal.log   # commit journal
//! └─ backups/      # default location of backup artifacts
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.log";
const BACKUP_DIR: &str = "backups";

/// An open engine directory. Holds the directory lock until dropped.
#[derive(Debug)]
pub struct EngineDir {
    path: PathBuf,
    _lock: File,
}

impl EngineDir {
    /// Opens (or creates) the directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - not-found error: the directory is missing and `create_if_missing` is false
    /// - validation error: the path is not a directory
    /// - [`CoreError::DatabaseLocked`]: another process holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(CoreError::not_found(format!(
                    "engine directory {} does not exist",
                    path.display()
                )));
            }
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(CoreError::validation(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the journal file path.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Returns the default backup artifact directory.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.path.join(BACKUP_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn second_open_is_locked_out() {
        let tmp = tempfile::tempdir().unwrap();
        let first = EngineDir::open(tmp.path(), true).unwrap();
        assert!(matches!(
            EngineDir::open(tmp.path(), true),
            Err(CoreError::DatabaseLocked)
        ));
        drop(first);
        assert!(EngineDir::open(tmp.path(), true).is_ok());
    }

    #[test]
    fn missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db");
        let err = EngineDir::open(&path, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let dir = EngineDir::open(&path, true).unwrap();
        assert_eq!(dir.journal_path(), path.join("journal.log"));
        assert_eq!(dir.backup_dir(), path.join("backups"));
    }
}
