//! State-change events published by the engine

use serde::{Deserialize, Serialize};

use super::errors::FailureClass;
use super::folder::FolderActivity;
use super::newtypes::{FolderId, OperationId, RelativePath};
use super::operation::OperationKind;

/// Something observers (the IPC server, logs) may want to know about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A folder changed activity
    ActivityChanged {
        folder_id: FolderId,
        activity: FolderActivity,
    },
    /// Planning recorded a new conflict
    ConflictDetected {
        folder_id: FolderId,
        path: RelativePath,
    },
    /// An operation reached the failed state
    OperationFailed {
        folder_id: FolderId,
        operation_id: OperationId,
        kind: OperationKind,
        path: RelativePath,
        class: FailureClass,
        error: String,
    },
    /// An operation completed and its row was removed
    OperationCompleted {
        folder_id: FolderId,
        operation_id: OperationId,
        kind: OperationKind,
        path: RelativePath,
    },
    /// The folder halted after a fatal failure
    FolderHalted { folder_id: FolderId, message: String },
}

impl SyncEvent {
    pub fn folder_id(&self) -> FolderId {
        match self {
            SyncEvent::ActivityChanged { folder_id, .. }
            | SyncEvent::ConflictDetected { folder_id, .. }
            | SyncEvent::OperationFailed { folder_id, .. }
            | SyncEvent::OperationCompleted { folder_id, .. }
            | SyncEvent::FolderHalted { folder_id, .. } => *folder_id,
        }
    }
}
