//! Domain entities and business logic
//!
//! This module contains the core domain types for foldsync:
//! - Newtypes for row identifiers, relative paths and content hashes
//! - Synced folder pairs and per-path file records
//! - Pending operations and their lifecycle state machine
//! - Conflict records and resolutions
//! - The failure taxonomy shared by every component
//! - Planning output and engine events

pub mod conflict;
pub mod errors;
pub mod event;
pub mod folder;
pub mod newtypes;
pub mod operation;
pub mod plan;
pub mod record;

// Re-export commonly used types
pub use conflict::{Conflict, ConflictKind, ConflictState, NewConflict, Resolution, VersionInfo};
pub use errors::{DomainError, FailureClass, StorageError, TransferError};
pub use event::SyncEvent;
pub use folder::{FolderActivity, FolderStats, NewFolder, SyncedFolder};
pub use newtypes::*;
pub use operation::{
    NewOperation, OperationKind, OperationOutcome, OperationStatus, PendingOperation,
};
pub use plan::{Plan, PlanReport};
pub use record::{FileRecord, LocalState, RemoteState};
