//! Pending reconciliation work
//!
//! A [`PendingOperation`] is one unit of work against one [`FileRecord`]
//! (upload, download, delete or move). Its lifecycle is an explicit state
//! machine persisted in the journal so that crash recovery only has to
//! re-read rows:
//!
//! ```text
//! queued ──► in_progress ──► completed (row removed)
//!   ▲             │
//!   ├─────────────┤ transient failure (backoff) / crash recovery
//!   │             ▼
//!   └──────── failed   (manual retry only)
//! ```
//!
//! Retry bookkeeping (`retry_count`, `next_attempt_at`) lives on the row,
//! never in process memory, so restarts cannot reset backoff.
//!
//! [`FileRecord`]: super::FileRecord

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{FileHash, FolderId, OperationId, RecordId, RelativePath};
use super::record::{LocalState, RemoteState};

// ============================================================================
// OperationKind
// ============================================================================

/// What an operation does
///
/// For directory records `Upload` and `Download` create the directory on the
/// remote and local side respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
    MoveLocal,
    MoveRemote,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Upload => "upload",
            OperationKind::Download => "download",
            OperationKind::DeleteLocal => "delete_local",
            OperationKind::DeleteRemote => "delete_remote",
            OperationKind::MoveLocal => "move_local",
            OperationKind::MoveRemote => "move_remote",
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, OperationKind::DeleteLocal | OperationKind::DeleteRemote)
    }

    pub fn is_move(&self) -> bool {
        matches!(self, OperationKind::MoveLocal | OperationKind::MoveRemote)
    }

    /// True when the operation modifies the local tree
    pub fn writes_local(&self) -> bool {
        matches!(
            self,
            OperationKind::Download | OperationKind::DeleteLocal | OperationKind::MoveLocal
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(OperationKind::Upload),
            "download" => Ok(OperationKind::Download),
            "delete_local" => Ok(OperationKind::DeleteLocal),
            "delete_remote" => Ok(OperationKind::DeleteRemote),
            "move_local" => Ok(OperationKind::MoveLocal),
            "move_remote" => Ok(OperationKind::MoveRemote),
            other => Err(DomainError::UnknownValue {
                kind: "operation kind",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// OperationStatus
// ============================================================================

/// Persisted lifecycle state of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Queued => "queued",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }

    /// Queued and in-progress operations block new plans for their record
    pub fn is_active(&self) -> bool {
        matches!(self, OperationStatus::Queued | OperationStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Checks whether a transition is allowed by the lifecycle
    pub fn can_transition_to(&self, target: OperationStatus) -> bool {
        matches!(
            (self, target),
            (OperationStatus::Queued, OperationStatus::InProgress)
                | (OperationStatus::InProgress, OperationStatus::Completed)
                | (OperationStatus::InProgress, OperationStatus::Queued)
                | (OperationStatus::InProgress, OperationStatus::Failed)
                | (OperationStatus::Failed, OperationStatus::Queued)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(OperationStatus::Queued),
            "in_progress" => Ok(OperationStatus::InProgress),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            other => Err(DomainError::UnknownValue {
                kind: "operation status",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// PendingOperation
// ============================================================================

/// A persisted unit of reconciliation work
///
/// Guards describe the state the operation was planned against:
///
/// - `local_guard`: for operations that overwrite or remove a local path
///   (`download`, `delete_local`, `move_local`), the local hash expected at
///   execution time. `None` means the path is expected to be absent.
/// - `remote_guard`: for operations that overwrite or remove a remote path
///   (`upload`, `delete_remote`, `move_remote`), the remote version token.
///   `None` means the path is expected to be absent.
/// - `content_hash`: the content the operation transfers, verified after a
///   download and against the server's report after an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub folder_id: FolderId,
    pub record_id: RecordId,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub relative_path: RelativePath,
    pub destination: Option<RelativePath>,
    pub content_hash: Option<FileHash>,
    pub local_guard: Option<FileHash>,
    pub remote_guard: Option<String>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingOperation {
    /// Move to `target`, rejecting transitions the lifecycle does not allow
    pub fn transition_to(&mut self, target: OperationStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::InvalidState {
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// True when this operation reads or writes `path` or anything above or below it
    pub fn touches(&self, path: &RelativePath) -> bool {
        self.relative_path.is_related_to(path)
            || self
                .destination
                .as_ref()
                .is_some_and(|d| d.is_related_to(path))
    }

    /// True when the operation is queued and its backoff has elapsed
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Queued && self.next_attempt_at <= now
    }
}

/// An operation to enqueue, addressed by path
///
/// The journal resolves the record for `relative_path` inside the enqueue
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOperation {
    pub kind: OperationKind,
    pub relative_path: RelativePath,
    pub destination: Option<RelativePath>,
    pub content_hash: Option<FileHash>,
    pub local_guard: Option<FileHash>,
    pub remote_guard: Option<String>,
}

impl NewOperation {
    pub fn new(kind: OperationKind, relative_path: RelativePath) -> Self {
        Self {
            kind,
            relative_path,
            destination: None,
            content_hash: None,
            local_guard: None,
            remote_guard: None,
        }
    }

    pub fn with_destination(mut self, destination: RelativePath) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_content_hash(mut self, hash: Option<FileHash>) -> Self {
        self.content_hash = hash;
        self
    }

    pub fn with_local_guard(mut self, guard: Option<FileHash>) -> Self {
        self.local_guard = guard;
        self
    }

    pub fn with_remote_guard(mut self, guard: Option<String>) -> Self {
        self.remote_guard = guard;
        self
    }

    /// True when `other` would do the same work (used to avoid re-planning failed work)
    pub fn same_work_as(&self, other: &PendingOperation) -> bool {
        self.kind == other.kind
            && self.relative_path == other.relative_path
            && self.destination == other.destination
            && self.content_hash == other.content_hash
    }
}

/// Effect of a successfully executed operation on its record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Both sides now hold `hash`
    Synced {
        local: LocalState,
        remote: RemoteState,
    },
    /// The path no longer exists on either side
    Deleted,
    /// The record now lives at `destination`
    ///
    /// `remote: None` keeps the remote observation already recorded for the
    /// destination path.
    Moved {
        destination: RelativePath,
        local: Option<LocalState>,
        remote: Option<RemoteState>,
    },
}
