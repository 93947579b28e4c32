//! Synced folder pairs and their runtime activity

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::FolderId;

/// A configured local root paired with a remote root
///
/// Owns its [`FileRecord`](super::FileRecord)s, pending operations and
/// conflicts; removing the folder cascades to all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedFolder {
    pub id: FolderId,
    /// Unique human-readable label, used by the IPC protocol
    pub name: String,
    pub local_root: PathBuf,
    /// Remote root, always starting with `/`
    pub remote_root: String,
    /// Persisted pause flag; a paused folder stops dequeuing operations
    pub paused: bool,
    pub created_at: DateTime<Utc>,
    pub last_scan_at: Option<DateTime<Utc>>,
}

/// Parameters for registering a folder pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFolder {
    pub name: String,
    pub local_root: PathBuf,
    pub remote_root: String,
}

impl NewFolder {
    pub fn new(
        name: impl Into<String>,
        local_root: impl Into<PathBuf>,
        remote_root: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            local_root: local_root.into(),
            remote_root: remote_root.into(),
        }
    }
}

/// What the engine is currently doing for a folder
///
/// This is runtime state only; the pause flag itself lives in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum FolderActivity {
    #[default]
    Idle,
    Scanning,
    Syncing,
    Paused,
    /// Folder halted after a fatal failure
    Error(String),
}

impl FolderActivity {
    /// Lowercase status name used in `sync_stats` messages
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderActivity::Idle => "idle",
            FolderActivity::Scanning => "scanning",
            FolderActivity::Syncing => "syncing",
            FolderActivity::Paused => "paused",
            FolderActivity::Error(_) => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FolderActivity::Error(_))
    }
}

impl fmt::Display for FolderActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FolderActivity::Error(msg) => write!(f, "error: {msg}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Per-folder counts derived from the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FolderStats {
    /// Operations queued or in progress
    pub pending: u64,
    /// Operations currently in progress (subset of `pending`)
    pub in_progress: u64,
    /// Operations in the failed state
    pub failed: u64,
    /// Unresolved conflicts
    pub conflicts: u64,
}
