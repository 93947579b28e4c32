//! Local and remote scanners
//!
//! Each scanner lists one side of a folder and produces a complete
//! [`Snapshot`](foldsync_core::ports::Snapshot) for the journal. The
//! snapshot's `started_at` is taken before listing begins, so observations
//! written by operations that complete mid-scan are never overwritten.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use glob::Pattern;
use tracing::{debug, instrument, warn};

use foldsync_core::domain::{
    FileHash, FileRecord, LocalState, RelativePath, RemoteState, SyncedFolder,
};
use foldsync_core::ports::{
    ILocalFileSystem, IRemoteStore, LocalSnapshot, RemoteEntry, RemoteSnapshot,
};

use crate::filesystem::{compile_patterns, is_ignored};
use crate::SyncError;

/// Remote state described by a listing entry
///
/// Files without a reported hash cannot be compared and yield `None`.
pub fn remote_state_of(entry: &RemoteEntry) -> Option<RemoteState> {
    let hash = if entry.is_dir {
        FileHash::directory()
    } else {
        FileHash::new(entry.hash.as_deref()?).ok()?
    };
    Some(RemoteState::new(
        hash,
        entry.version.clone(),
        if entry.is_dir { 0 } else { entry.size },
        entry.mtime,
    ))
}

/// Walks and hashes the local tree of a folder
pub struct LocalScanner {
    local_filesystem: Arc<dyn ILocalFileSystem>,
    ignore: Vec<String>,
}

impl LocalScanner {
    pub fn new(local_filesystem: Arc<dyn ILocalFileSystem>, ignore: Vec<String>) -> Self {
        Self {
            local_filesystem,
            ignore,
        }
    }

    /// Scans the local root of `folder`
    ///
    /// Files whose size and mtime match the recorded local state keep the
    /// recorded hash instead of being read again.
    #[instrument(skip_all, fields(folder = %folder.name))]
    pub async fn scan(
        &self,
        folder: &SyncedFolder,
        known: &[FileRecord],
    ) -> anyhow::Result<LocalSnapshot> {
        let mut snapshot = LocalSnapshot::new(Utc::now());
        let known: HashMap<&RelativePath, &LocalState> = known
            .iter()
            .filter_map(|r| r.local.as_ref().map(|l| (&r.relative_path, l)))
            .collect();

        let entries = self
            .local_filesystem
            .list_tree(&folder.local_root, &self.ignore)
            .await?;

        let mut hashed = 0usize;
        for entry in entries {
            if entry.is_dir {
                snapshot.push(entry.path, true, LocalState::directory(entry.modified));
                continue;
            }

            let previous = known.get(&entry.path).copied();
            if let Some(prev) = previous {
                if !prev.hash.is_directory()
                    && prev.size == entry.size
                    && prev.mtime.is_some()
                    && prev.mtime == entry.modified
                {
                    snapshot.push(entry.path, false, prev.clone());
                    continue;
                }
            }

            let abs = entry.path.to_local(&folder.local_root);
            match self.local_filesystem.hash_file(&abs).await {
                Ok(hash) => {
                    hashed += 1;
                    snapshot.push(
                        entry.path,
                        false,
                        LocalState::new(hash, entry.size, entry.modified),
                    );
                }
                Err(err) if is_not_found(&err) => {
                    debug!(path = %entry.path, "File vanished while scanning");
                }
                Err(err) => {
                    // Unreadable files keep their last known state instead of
                    // looking deleted
                    warn!(path = %entry.path, error = %err, "Could not hash file");
                    if let Some(prev) = previous {
                        snapshot.push(entry.path, false, prev.clone());
                    }
                }
            }
        }

        debug!(entries = snapshot.len(), hashed, "Local scan complete");
        Ok(snapshot)
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound)
}

/// Fetches the remote tree of a folder
pub struct RemoteScanner {
    remote: Arc<dyn IRemoteStore>,
    ignore: Vec<Pattern>,
}

impl RemoteScanner {
    /// # Errors
    /// Returns [`SyncError::InvalidPattern`] if an ignore glob does not parse
    pub fn new(remote: Arc<dyn IRemoteStore>, ignore: &[String]) -> Result<Self, SyncError> {
        Ok(Self {
            remote,
            ignore: compile_patterns(ignore)?,
        })
    }

    /// Lists the remote root of `folder`
    #[instrument(skip_all, fields(folder = %folder.name))]
    pub async fn scan(&self, folder: &SyncedFolder) -> anyhow::Result<RemoteSnapshot> {
        let mut snapshot = RemoteSnapshot::new(Utc::now());
        let entries = self.remote.list(&folder.remote_root).await?;

        for entry in &entries {
            let path = match RelativePath::from_remote(&folder.remote_root, &entry.path) {
                Ok(path) => path,
                Err(_) if is_root(&folder.remote_root, &entry.path) => continue,
                Err(err) => {
                    warn!(path = %entry.path, %err, "Skipping remote entry outside the folder");
                    continue;
                }
            };
            if is_ignored(&self.ignore, &path)
                || path
                    .parent()
                    .is_some_and(|p| is_ignored_ancestor(&self.ignore, &p))
            {
                continue;
            }
            let Some(state) = remote_state_of(entry) else {
                warn!(path = %path, "Skipping remote file without a content hash");
                continue;
            };
            snapshot.push(path, entry.is_dir, state);
        }

        snapshot.entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(entries = snapshot.len(), "Remote scan complete");
        Ok(snapshot)
    }
}

fn is_root(remote_root: &str, path: &str) -> bool {
    path.trim_end_matches('/') == remote_root.trim_end_matches('/')
}

/// True when `dir` or any of its ancestors is ignored
fn is_ignored_ancestor(patterns: &[Pattern], dir: &RelativePath) -> bool {
    let mut current = Some(dir.clone());
    while let Some(p) = current {
        if is_ignored(patterns, &p) {
            return true;
        }
        current = p.parent();
    }
    false
}
