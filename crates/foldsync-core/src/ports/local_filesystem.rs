//! Local filesystem port (driven/secondary port)
//!
//! This module defines the interface for reading, hashing and mutating the
//! local tree of a synced folder. Change notification is handled separately
//! by the watcher in the sync crate.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific;
//!   `std::io::Error`s are kept in the chain so they can be classified.
//! - `commit_file` must be atomic with respect to readers of the target.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::domain::{FileHash, RelativePath};

/// Snapshot of a path's state on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemState {
    /// Whether the file/directory exists on disk
    pub exists: bool,
    /// Whether this is a directory
    pub is_dir: bool,
    /// Size in bytes (0 for directories or non-existent files)
    pub size: u64,
    /// Last modification time (None if not available or file doesn't exist)
    pub modified: Option<DateTime<Utc>>,
}

impl FileSystemState {
    /// Returns a state representing a non-existent path
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_dir: false,
            size: 0,
            modified: None,
        }
    }

    /// Returns true if the path exists and is a regular file
    pub fn is_regular_file(&self) -> bool {
        self.exists && !self.is_dir
    }

    /// Returns true if the path exists and is a directory
    pub fn is_directory(&self) -> bool {
        self.exists && self.is_dir
    }
}

/// One entry found while walking a local tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub path: RelativePath,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Port trait for local filesystem operations
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Walks `root` recursively, skipping entries whose relative path matches
    /// one of `ignore` (glob patterns)
    async fn list_tree(&self, root: &Path, ignore: &[String]) -> anyhow::Result<Vec<LocalEntry>>;

    /// Gets the current state of a path
    async fn stat(&self, path: &Path) -> anyhow::Result<FileSystemState>;

    /// Computes the content hash of a file
    async fn hash_file(&self, path: &Path) -> anyhow::Result<FileHash>;

    async fn create_dir_all(&self, path: &Path) -> anyhow::Result<()>;

    /// Renames `from` to `to`, creating missing parents of `to`
    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()>;

    async fn remove_file(&self, path: &Path) -> anyhow::Result<()>;

    /// Removes an empty directory; fails with `DirectoryNotEmpty` otherwise
    async fn remove_empty_dir(&self, path: &Path) -> anyhow::Result<()>;

    /// Sibling path used to stage content before it replaces `target`
    fn staging_path(&self, target: &Path) -> PathBuf;

    /// Atomically replaces `target` with the staged file
    async fn commit_file(&self, staged: &Path, target: &Path) -> anyhow::Result<()>;
}
