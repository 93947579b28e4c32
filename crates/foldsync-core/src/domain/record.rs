//! Per-path tracked state
//!
//! A [`FileRecord`] holds what the engine last observed on each side of a
//! folder pair plus the hash both sides agreed on at the last successful
//! sync. An absent side state means the path does not exist on that side.
//!
//! ## Invariants
//!
//! - `last_synced_hash` only changes when an operation completes or when a
//!   scan observes both sides holding identical content.
//! - Observations carry a timestamp; the journal never overwrites a newer
//!   observation with one taken earlier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{FileHash, FolderId, RecordId, RelativePath};

/// Local side of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    pub hash: FileHash,
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
}

impl LocalState {
    pub fn new(hash: FileHash, size: u64, mtime: Option<DateTime<Utc>>) -> Self {
        Self { hash, size, mtime }
    }

    /// Local state of a directory
    pub fn directory(mtime: Option<DateTime<Utc>>) -> Self {
        Self {
            hash: FileHash::directory(),
            size: 0,
            mtime,
        }
    }
}

/// Remote side of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteState {
    pub hash: FileHash,
    /// Optimistic concurrency token returned by the server
    pub version: String,
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
}

impl RemoteState {
    pub fn new(
        hash: FileHash,
        version: impl Into<String>,
        size: u64,
        mtime: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            hash,
            version: version.into(),
            size,
            mtime,
        }
    }
}

/// One tracked path within a synced folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: RecordId,
    pub folder_id: FolderId,
    pub relative_path: RelativePath,
    pub is_dir: bool,
    pub local: Option<LocalState>,
    pub local_observed_at: Option<DateTime<Utc>>,
    pub remote: Option<RemoteState>,
    pub remote_observed_at: Option<DateTime<Utc>>,
    /// Content both sides agreed on at the last successful sync
    pub last_synced_hash: Option<FileHash>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn local_hash(&self) -> Option<&FileHash> {
        self.local.as_ref().map(|l| &l.hash)
    }

    pub fn remote_hash(&self) -> Option<&FileHash> {
        self.remote.as_ref().map(|r| &r.hash)
    }

    pub fn remote_version(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.version.as_str())
    }

    /// True when the local side differs from the last agreed state
    pub fn local_changed(&self) -> bool {
        self.local_hash() != self.last_synced_hash.as_ref()
    }

    /// True when the remote side differs from the last agreed state
    pub fn remote_changed(&self) -> bool {
        self.remote_hash() != self.last_synced_hash.as_ref()
    }

    /// True when the path exists on neither side
    pub fn is_absent(&self) -> bool {
        self.local.is_none() && self.remote.is_none()
    }

    /// True when both sides hold the agreed content
    pub fn is_in_sync(&self) -> bool {
        !self.local_changed() && !self.remote_changed()
    }
}
