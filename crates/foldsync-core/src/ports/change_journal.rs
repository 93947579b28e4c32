//! Change journal port (driven/secondary port)
//!
//! The journal is the durable, transactional store behind the engine and
//! its single point of mutual exclusion: every component reads and writes
//! shared state through it instead of sharing memory.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result`; storage failures travel as
//!   [`StorageError`](crate::domain::StorageError) inside the `anyhow::Error`
//!   so callers can classify them.
//! - Every method that reads and then writes a row does so inside one
//!   transaction.
//! - "At most one active operation per record" is enforced at write time:
//!   enqueueing against a record with queued or in-progress work reports
//!   [`EnqueueOutcome::AlreadyActive`] instead of inserting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    Conflict, ConflictId, FolderId, FolderStats, LocalState, NewFolder, NewOperation,
    OperationId, OperationOutcome, OperationStatus, PendingOperation, Plan, PlanReport,
    RelativePath, RemoteState, Resolution, FileRecord, SyncedFolder,
};

// ============================================================================
// Scan observations
// ============================================================================

/// One path seen by a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation<S> {
    pub path: RelativePath,
    pub is_dir: bool,
    pub state: S,
}

/// A complete listing of one side of a folder
///
/// Paths missing from `entries` are absent on that side. `started_at` is
/// taken before listing begins; observations already newer than it are left
/// alone when the snapshot is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot<S> {
    pub started_at: DateTime<Utc>,
    pub entries: Vec<Observation<S>>,
}

impl<S> Snapshot<S> {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, path: RelativePath, is_dir: bool, state: S) {
        self.entries.push(Observation {
            path,
            is_dir,
            state,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type LocalSnapshot = Snapshot<LocalState>;
pub type RemoteSnapshot = Snapshot<RemoteState>;

/// What applying a snapshot changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationReport {
    pub inserted: u64,
    pub updated: u64,
    /// Records whose side was marked absent
    pub cleared: u64,
    /// Records skipped because a newer observation already existed
    pub skipped_stale: u64,
    /// Records deleted because the path is gone on both sides
    pub purged: u64,
}

// ============================================================================
// Operation and conflict outcomes
// ============================================================================

/// Result of enqueueing one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnqueueOutcome {
    Enqueued(OperationId),
    /// The record already has queued or in-progress work; nothing was written
    AlreadyActive(OperationId),
}

/// Result of a manual retry request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryOutcome {
    /// A failed operation was requeued with its backoff reset
    Requeued,
    /// The operation is already queued or running; the backoff was cleared if queued
    AlreadyActive,
    NotFound,
}

/// A local-side observation written while applying a resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSeed {
    pub path: RelativePath,
    pub is_dir: bool,
    pub local: Option<LocalState>,
}

/// Journal writes implementing a conflict decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionPlan {
    pub resolution: Resolution,
    pub records: Vec<RecordSeed>,
    pub operations: Vec<NewOperation>,
}

/// Result of applying a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolveOutcome {
    Applied,
    /// The conflict was already resolved; nothing was written
    AlreadyResolved,
    NotFound,
}

// ============================================================================
// IChangeJournal trait
// ============================================================================

/// Port trait for the durable change journal
#[async_trait::async_trait]
pub trait IChangeJournal: Send + Sync {
    // ----- Folders -----

    /// Registers a folder pair, returning the existing row if the name is known
    async fn add_folder(&self, folder: &NewFolder) -> anyhow::Result<SyncedFolder>;

    async fn get_folder(&self, id: FolderId) -> anyhow::Result<Option<SyncedFolder>>;

    async fn get_folder_by_name(&self, name: &str) -> anyhow::Result<Option<SyncedFolder>>;

    async fn list_folders(&self) -> anyhow::Result<Vec<SyncedFolder>>;

    /// Removes a folder pair with its records, operations and conflicts
    async fn remove_folder(&self, id: FolderId) -> anyhow::Result<bool>;

    /// Sets the pause flag, returning true if it changed
    async fn set_folder_paused(&self, id: FolderId, paused: bool) -> anyhow::Result<bool>;

    async fn mark_scanned(&self, id: FolderId, at: DateTime<Utc>) -> anyhow::Result<()>;

    // ----- Records -----

    async fn get_record(
        &self,
        folder: FolderId,
        path: &RelativePath,
    ) -> anyhow::Result<Option<FileRecord>>;

    async fn list_records(&self, folder: FolderId) -> anyhow::Result<Vec<FileRecord>>;

    /// Writes a local scan into the records of `folder`
    async fn apply_local_snapshot(
        &self,
        folder: FolderId,
        snapshot: &LocalSnapshot,
    ) -> anyhow::Result<ObservationReport>;

    /// Writes a remote scan into the records of `folder` and purges paths
    /// gone from both sides
    async fn apply_remote_snapshot(
        &self,
        folder: FolderId,
        snapshot: &RemoteSnapshot,
    ) -> anyhow::Result<ObservationReport>;

    // ----- Planning -----

    /// Writes a plan in one transaction
    async fn apply_plan(&self, folder: FolderId, plan: &Plan) -> anyhow::Result<PlanReport>;

    // ----- Operations -----

    async fn enqueue_operation(
        &self,
        folder: FolderId,
        op: &NewOperation,
    ) -> anyhow::Result<EnqueueOutcome>;

    async fn get_operation(&self, id: OperationId) -> anyhow::Result<Option<PendingOperation>>;

    /// Lists operations, optionally filtered by folder and status, oldest first
    async fn list_operations(
        &self,
        folder: Option<FolderId>,
        status: Option<OperationStatus>,
    ) -> anyhow::Result<Vec<PendingOperation>>;

    /// Moves up to `limit` ready operations of `folder` to `in_progress`
    ///
    /// Ready means queued with `next_attempt_at <= now`, taken in FIFO order
    /// by creation time. An operation is skipped while an earlier active
    /// operation touches an ancestor or descendant of its path.
    async fn claim_ready_operations(
        &self,
        folder: FolderId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<PendingOperation>>;

    /// Applies the outcome to the record and removes the operation row
    async fn complete_operation(
        &self,
        id: OperationId,
        outcome: &OperationOutcome,
    ) -> anyhow::Result<()>;

    /// Returns an in-progress operation to the queue after a transient failure
    async fn reschedule_operation(
        &self,
        id: OperationId,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> anyhow::Result<()>;

    /// Marks an operation failed; it is not retried automatically
    async fn fail_operation(&self, id: OperationId, retry_count: u32, error: &str)
        -> anyhow::Result<()>;

    /// Removes an operation superseded by a divergence
    async fn abandon_operation(&self, id: OperationId, reason: &str) -> anyhow::Result<()>;

    /// Requeues a failed operation immediately, keeping its retry count
    async fn retry_operation(&self, id: OperationId) -> anyhow::Result<RetryOutcome>;

    /// Requeues operations left in progress by a previous process
    async fn recover_interrupted(&self) -> anyhow::Result<u64>;

    // ----- Conflicts -----

    async fn get_conflict(&self, id: ConflictId) -> anyhow::Result<Option<Conflict>>;

    async fn list_conflicts(
        &self,
        folder: Option<FolderId>,
        pending_only: bool,
    ) -> anyhow::Result<Vec<Conflict>>;

    /// Records a decision and writes its follow-up work in one transaction
    async fn resolve_conflict(
        &self,
        id: ConflictId,
        plan: &ResolutionPlan,
    ) -> anyhow::Result<ResolveOutcome>;

    /// Deletes resolved conflicts resolved before `before`
    async fn prune_resolved_conflicts(&self, before: DateTime<Utc>) -> anyhow::Result<u64>;

    // ----- Status -----

    async fn folder_stats(&self, folder: FolderId) -> anyhow::Result<FolderStats>;
}
