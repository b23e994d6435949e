//! File system abstraction for testability.
//!
//! The orchestrator only needs to probe the working directory, stat files and
//! delete premux files. Those operations go through the [`FileSystem`] trait
//! so runs can be exercised against an in-memory tree.
//!
//! # Example
//!
//! ```rust,ignore
//! use ytmux_core::fs::{FileSystem, RealFileSystem};
//!
//! fn newest<F: FileSystem>(fs: &F, dir: &Path) -> Result<Vec<PathBuf>> {
//!     fs.read_dir(dir)
//! }
//! ```

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Error, FileSystemError, Result};

/// Converts an I/O error for read operations.
fn read_error(path: &Path, e: io::Error) -> Error {
    Error::FileSystem(FileSystemError::ReadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Converts an I/O error for delete operations.
fn delete_error(path: &Path, e: io::Error) -> Error {
    Error::FileSystem(FileSystemError::DeleteFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Abstraction over file system operations for testability.
pub trait FileSystem: Send + Sync {
    /// Check if a path is a file.
    fn is_file(&self, path: &Path) -> bool;

    /// Check if a path is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// List entries in a directory.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Get file metadata (size, modified time).
    fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Remove a file.
    fn remove_file(&self, path: &Path) -> Result<()>;
}

/// Simplified metadata structure for cross-platform compatibility.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes.
    pub len: u64,
    /// Whether this is a file.
    pub is_file: bool,
    /// Last modified time.
    pub modified: Option<SystemTime>,
}

impl FileMetadata {
    /// Create metadata from std::fs::Metadata.
    pub fn from_std(meta: Metadata) -> Self {
        Self {
            len: meta.len(),
            is_file: meta.is_file(),
            modified: meta.modified().ok(),
        }
    }
}

/// Real file system implementation using std::fs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileSystem;

impl RealFileSystem {
    /// Create a new real file system instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFileSystem {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(path).map_err(|e| read_error(path, e))?;

        let paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        Ok(paths)
    }

    fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let meta = fs::metadata(path).map_err(|e| read_error(path, e))?;
        Ok(FileMetadata::from_std(meta))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| delete_error(path, e))
    }
}
