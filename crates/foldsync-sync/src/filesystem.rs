//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs` for async file operations.
//!
//! ## Design Decisions
//!
//! - **Staged writes**: downloads land in a sibling `<name>.foldsync-partial`
//!   file and are renamed over the target, so readers never see a partial
//!   file and a crash leaves at most an ignored partial file behind.
//! - **SHA-256**: content hashes are lowercase hex SHA-256, computed in
//!   fixed-size chunks so large files are never held in memory.
//! - **Non-recursive directory removal**: a directory with children is
//!   reported as [`TransferError::DirectoryNotEmpty`] instead of being
//!   cleared.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use glob::Pattern;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument, warn};

use foldsync_core::config::PARTIAL_SUFFIX;
use foldsync_core::domain::{DomainError, FileHash, RelativePath, TransferError};
use foldsync_core::ports::{FileSystemState, ILocalFileSystem, LocalEntry};

use crate::SyncError;

/// Read buffer used while hashing
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem.
///
/// This is a zero-sized struct because all operations derive their context
/// from the path arguments. The folder roots live at a higher layer.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    /// Create a new `LocalFileSystemAdapter`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Compiles ignore globs
///
/// # Errors
/// Returns [`SyncError::InvalidPattern`] for the first glob that fails to parse
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>, SyncError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| SyncError::InvalidPattern {
                pattern: p.clone(),
                message: e.msg.to_string(),
            })
        })
        .collect()
}

/// True when the relative path or its final component matches a pattern
pub fn is_ignored(patterns: &[Pattern], path: &RelativePath) -> bool {
    patterns
        .iter()
        .any(|p| p.matches(path.as_str()) || p.matches(path.file_name()))
}

/// Lowercase hex SHA-256 of an in-memory buffer
pub fn hash_bytes(data: &[u8]) -> Result<FileHash, DomainError> {
    FileHash::new(format!("{:x}", Sha256::digest(data)))
}

fn to_utc(time: std::io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self, ignore), fields(root = %root.display()))]
    async fn list_tree(&self, root: &Path, ignore: &[String]) -> anyhow::Result<Vec<LocalEntry>> {
        let patterns = compile_patterns(ignore)?;

        let root_meta = tokio::fs::metadata(root).await;
        if !root_meta.as_ref().is_ok_and(|m| m.is_dir()) {
            return Err(SyncError::RootUnavailable(root.to_path_buf()).into());
        }

        let mut entries = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                // Removed between listing the parent and descending into it
                Err(e) if e.kind() == ErrorKind::NotFound && dir != root => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = read_dir.next_entry().await? {
                let path = entry.path();
                let rel = match RelativePath::from_local(root, &path) {
                    Ok(rel) => rel,
                    Err(err) => {
                        warn!(path = %path.display(), %err, "Skipping unrepresentable path");
                        continue;
                    }
                };
                if is_ignored(&patterns, &rel) {
                    debug!(path = %rel, "Ignored");
                    continue;
                }

                let meta = match tokio::fs::symlink_metadata(&path).await {
                    Ok(m) => m,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                if meta.file_type().is_symlink() {
                    debug!(path = %rel, "Skipping symlink");
                    continue;
                }

                let is_dir = meta.is_dir();
                entries.push(LocalEntry {
                    path: rel,
                    is_dir,
                    size: if is_dir { 0 } else { meta.len() },
                    modified: to_utc(meta.modified()),
                });
                if is_dir {
                    pending.push(path);
                }
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(count = entries.len(), "Local tree listed");
        Ok(entries)
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn stat(&self, path: &Path) -> anyhow::Result<FileSystemState> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("path not found");
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(e.into()),
        };

        let is_dir = metadata.is_dir();
        Ok(FileSystemState {
            exists: true,
            is_dir,
            size: if is_dir { 0 } else { metadata.len() },
            modified: to_utc(metadata.modified()),
        })
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn hash_file(&self, path: &Path) -> anyhow::Result<FileHash> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        let hash = FileHash::new(format!("{:x}", hasher.finalize()))?;
        debug!(hash = hash.short(), "hash computed");
        Ok(hash)
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn create_dir_all(&self, path: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from.display(), to = %to.display()))]
    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(from, to).await?;
        debug!("rename complete");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn remove_file(&self, path: &Path) -> anyhow::Result<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn remove_empty_dir(&self, path: &Path) -> anyhow::Result<()> {
        match tokio::fs::remove_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut children = tokio::fs::read_dir(path).await?;
                if children.next_entry().await?.is_some() {
                    Err(TransferError::DirectoryNotEmpty(path.display().to_string()).into())
                } else {
                    Err(e.into())
                }
            }
        }
    }

    fn staging_path(&self, target: &Path) -> PathBuf {
        let mut staged = target.as_os_str().to_owned();
        staged.push(PARTIAL_SUFFIX);
        PathBuf::from(staged)
    }

    #[instrument(skip(self), fields(target = %target.display()))]
    async fn commit_file(&self, staged: &Path, target: &Path) -> anyhow::Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(staged, target).await?;
        debug!("staged file committed");
        Ok(())
    }
}
