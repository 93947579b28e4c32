//! IPC message types
//!
//! Every message is `{"type": <snake_case name>, "data": {...}}` on one
//! line. Clients send [`Request`]s; the daemon answers with [`Message`]s,
//! which also carry notifications after a `subscribe`.
//!
//! ```text
//! → {"type":"resolve_conflict","data":{"conflict_id":123,"resolution":"keep_local"}}
//! ← {"type":"ack","data":{"command":"resolve_conflict","outcome":"applied"}}
//! ```
//!
//! `get_status` is answered with one `sync_stats` message per folder followed
//! by an `ack`; every other request is answered with exactly one message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use foldsync_core::domain::{
    Conflict, ConflictId, ConflictKind, FailureClass, FolderActivity, FolderStats, OperationId,
    OperationKind, OperationStatus, PendingOperation, RelativePath, Resolution, VersionInfo,
};

/// Client to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Request {
    GetStatus,
    ListConflicts {
        #[serde(default)]
        folder: Option<String>,
    },
    ListFailed {
        #[serde(default)]
        folder: Option<String>,
    },
    Pause {
        folder: String,
    },
    Resume {
        folder: String,
    },
    RetryOperation {
        operation_id: OperationId,
    },
    ResolveConflict {
        conflict_id: ConflictId,
        resolution: Resolution,
    },
    ForceRescan {
        folder: String,
    },
    /// Streams notifications on this connection until it closes
    Subscribe,
}

impl Request {
    /// Wire name of the request, echoed in `ack` messages
    pub fn command(&self) -> &'static str {
        match self {
            Request::GetStatus => "get_status",
            Request::ListConflicts { .. } => "list_conflicts",
            Request::ListFailed { .. } => "list_failed",
            Request::Pause { .. } => "pause",
            Request::Resume { .. } => "resume",
            Request::RetryOperation { .. } => "retry_operation",
            Request::ResolveConflict { .. } => "resolve_conflict",
            Request::ForceRescan { .. } => "force_rescan",
            Request::Subscribe => "subscribe",
        }
    }
}

/// Whether a command changed anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckOutcome {
    Applied,
    /// The requested state already held
    NoOp,
}

impl AckOutcome {
    pub fn from_changed(changed: bool) -> Self {
        if changed {
            AckOutcome::Applied
        } else {
            AckOutcome::NoOp
        }
    }
}

/// Status line of one folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub folder: String,
    /// `idle`, `scanning`, `syncing`, `paused` or `error`
    pub status: String,
    pub pending: u64,
    pub failed: u64,
    pub conflicts: u64,
    pub paused: bool,
    /// Why the folder halted, when `status` is `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncStats {
    pub fn new(folder: impl Into<String>, activity: &FolderActivity, stats: FolderStats, paused: bool) -> Self {
        let error = match activity {
            FolderActivity::Error(message) => Some(message.clone()),
            _ => None,
        };
        Self {
            folder: folder.into(),
            status: activity.as_str().to_string(),
            pending: stats.pending,
            failed: stats.failed,
            conflicts: stats.conflicts,
            paused,
            error,
        }
    }
}

/// A conflict as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub conflict_id: ConflictId,
    pub folder: String,
    pub path: RelativePath,
    pub kind: ConflictKind,
    pub local: VersionInfo,
    pub remote: VersionInfo,
    pub detected_at: DateTime<Utc>,
}

impl ConflictInfo {
    pub fn new(folder: impl Into<String>, conflict: Conflict) -> Self {
        Self {
            conflict_id: conflict.id,
            folder: folder.into(),
            path: conflict.relative_path,
            kind: conflict.kind,
            local: conflict.local,
            remote: conflict.remote,
            detected_at: conflict.detected_at,
        }
    }
}

/// An operation as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub operation_id: OperationId,
    pub folder: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub path: RelativePath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<RelativePath>,
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl OperationInfo {
    pub fn new(folder: impl Into<String>, op: PendingOperation) -> Self {
        Self {
            operation_id: op.id,
            folder: folder.into(),
            kind: op.kind,
            status: op.status,
            path: op.relative_path,
            destination: op.destination,
            retry_count: op.retry_count,
            last_error: op.last_error,
            updated_at: op.updated_at,
        }
    }
}

/// Daemon to client: responses and notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    SyncStats(SyncStats),
    Conflicts {
        conflicts: Vec<ConflictInfo>,
    },
    Operations {
        operations: Vec<OperationInfo>,
    },
    Ack {
        command: String,
        outcome: AckOutcome,
    },
    Error {
        message: String,
    },
    ConflictDetected {
        folder: String,
        path: RelativePath,
    },
    OperationFailed {
        folder: String,
        operation_id: OperationId,
        kind: OperationKind,
        path: RelativePath,
        class: FailureClass,
        error: String,
    },
    FolderError {
        folder: String,
        message: String,
    },
}

impl Message {
    pub fn ack(command: &str, outcome: AckOutcome) -> Self {
        Message::Ack {
            command: command.to_string(),
            outcome,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Message::Error {
            message: message.into(),
        }
    }

    /// True for messages only sent to subscribed connections
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            Message::ConflictDetected { .. }
                | Message::OperationFailed { .. }
                | Message::FolderError { .. }
        )
    }
}
