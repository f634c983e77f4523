//! Filesystem access used by the indexer and backup artifacts.

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Size and modification time of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Length in bytes.
    pub size: u64,
    /// Last modification, milliseconds since the epoch.
    pub modified: Timestamp,
}

/// The file operations the engine needs.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Lists every file below `root`, recursively, sorted by path.
    fn list_files(&self, root: &Path) -> CoreResult<Vec<PathBuf>>;

    /// Reads a whole file.
    fn read_file(&self, path: &Path) -> CoreResult<Vec<u8>>;

    /// Creates or replaces a file, creating parent directories.
    fn write_file(&self, path: &Path, contents: &[u8]) -> CoreResult<()>;

    /// Returns size and modification time.
    fn stat(&self, path: &Path) -> CoreResult<FileStat>;
}

/// The host filesystem. Entries whose name starts with `.` are skipped
/// when listing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> CoreResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let kind = entry.file_type()?;
            if kind.is_dir() {
                Self::walk(&entry.path(), out)?;
            } else if kind.is_file() {
                out.push(entry.path());
            }
        }
        Ok(())
    }
}

impl FileSystem for LocalFileSystem {
    fn list_files(&self, root: &Path) -> CoreResult<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(CoreError::not_found(format!(
                "project root {} is not a directory",
                root.display()
            )));
        }
        let mut files = Vec::new();
        Self::walk(root, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn read_file(&self, path: &Path) -> CoreResult<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(fs::write(path, contents)?)
    }

    fn stat(&self, path: &Path) -> CoreResult<FileStat> {
        let meta = fs::metadata(path)?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        Ok(FileStat {
            size: meta.len(),
            modified,
        })
    }
}

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Vec<u8>,
    modified: Timestamp,
}

/// An in-memory filesystem. Clones share the same files.
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    files: Arc<RwLock<BTreeMap<PathBuf, MemoryFile>>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    /// Creates an empty filesystem stamped by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty filesystem stamped by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            files: Arc::new(RwLock::new(BTreeMap::new())),
            clock,
        }
    }

    /// Adds a file, for test setup.
    #[must_use]
    pub fn with_file(self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        let modified = self.clock.now();
        self.files.write().insert(
            path.into(),
            MemoryFile {
                data: contents.into(),
                modified,
            },
        );
        self
    }

    /// Returns true if `path` exists.
    #[must_use]
    pub fn exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    fn missing(path: &Path) -> CoreError {
        CoreError::not_found(format!("no such file {}", path.display()))
    }
}

impl FileSystem for MemoryFileSystem {
    fn list_files(&self, root: &Path) -> CoreResult<Vec<PathBuf>> {
        Ok(self
            .files
            .read()
            .keys()
            .filter(|path| path.starts_with(root))
            .cloned()
            .collect())
    }

    fn read_file(&self, path: &Path) -> CoreResult<Vec<u8>> {
        self.files
            .read()
            .get(path)
            .map(|f| f.data.clone())
            .ok_or_else(|| Self::missing(path))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> CoreResult<()> {
        let modified = self.clock.now();
        self.files.write().insert(
            path.to_path_buf(),
            MemoryFile {
                data: contents.to_vec(),
                modified,
            },
        );
        Ok(())
    }

    fn stat(&self, path: &Path) -> CoreResult<FileStat> {
        self.files
            .read()
            .get(path)
            .map(|f| FileStat {
                size: f.data.len() as u64,
                modified: f.modified,
            })
            .ok_or_else(|| Self::missing(path))
    }
}
