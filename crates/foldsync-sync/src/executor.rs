//! Transfer executor
//!
//! Claims ready operations from the journal and carries them out against the
//! local tree and the remote store. Every operation re-checks the guards it
//! was planned against before it writes anything, so work planned on stale
//! observations is abandoned instead of overwriting newer data.
//!
//! ## Failure handling
//!
//! | Class       | Effect                                                    |
//! |-------------|-----------------------------------------------------------|
//! | transient   | rescheduled with backoff until attempts are exhausted     |
//! | conflict    | operation abandoned, folder rescanned and re-planned      |
//! | permanent   | operation marked failed and surfaced to observers         |
//! | fatal       | returned to the caller, which halts the folder            |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use foldsync_core::domain::{
    FailureClass, FileHash, LocalState, OperationKind, OperationOutcome, PendingOperation,
    RemoteState, SyncEvent, SyncedFolder, TransferError,
};
use foldsync_core::ports::{FileSystemState, IChangeJournal, ILocalFileSystem, IRemoteStore};

use crate::registry::{FolderControl, SyncRegistry};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::scanner::remote_state_of;

/// How often the run loop looks for operations whose backoff elapsed
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What happened to one executed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Rescheduled,
    Failed,
    Abandoned,
}

/// Counts of a [`TransferExecutor::drain`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub rescheduled: usize,
    pub failed: usize,
    pub abandoned: usize,
}

impl DrainReport {
    fn record(&mut self, outcome: ExecutionOutcome) {
        match outcome {
            ExecutionOutcome::Completed => self.completed += 1,
            ExecutionOutcome::Rescheduled => self.rescheduled += 1,
            ExecutionOutcome::Failed => self.failed += 1,
            ExecutionOutcome::Abandoned => self.abandoned += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.rescheduled + self.failed + self.abandoned
    }
}

/// Executes pending operations with bounded concurrency per folder
pub struct TransferExecutor {
    journal: Arc<dyn IChangeJournal>,
    local_filesystem: Arc<dyn ILocalFileSystem>,
    remote: Arc<dyn IRemoteStore>,
    registry: Arc<SyncRegistry>,
    retry: RetryPolicy,
    operation_timeout: Duration,
    max_concurrent: usize,
}

impl TransferExecutor {
    pub fn new(
        journal: Arc<dyn IChangeJournal>,
        local_filesystem: Arc<dyn ILocalFileSystem>,
        remote: Arc<dyn IRemoteStore>,
        registry: Arc<SyncRegistry>,
        retry: RetryPolicy,
        operation_timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            journal,
            local_filesystem,
            remote,
            registry,
            retry,
            operation_timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Executes one claimed (`in_progress`) operation and records its result
    ///
    /// # Errors
    /// Returns an error only when the journal cannot record the result or
    /// the failure is fatal; the folder must halt in that case.
    #[instrument(skip_all, fields(op_id = %op.id, kind = %op.kind, path = %op.relative_path))]
    pub async fn execute(
        &self,
        folder: &SyncedFolder,
        op: &PendingOperation,
    ) -> anyhow::Result<ExecutionOutcome> {
        let result = match tokio::time::timeout(self.operation_timeout, self.perform(folder, op))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(TransferError::Timeout(format!(
                "{} did not finish within {}s",
                op.kind,
                self.operation_timeout.as_secs()
            ))
            .into()),
        };

        match result {
            Ok(outcome) => {
                self.journal.complete_operation(op.id, &outcome).await?;
                info!(attempt = op.retry_count + 1, "Operation completed");
                self.registry.publish(SyncEvent::OperationCompleted {
                    folder_id: op.folder_id,
                    operation_id: op.id,
                    kind: op.kind,
                    path: op.relative_path.clone(),
                });
                Ok(ExecutionOutcome::Completed)
            }
            Err(err) => self.handle_failure(op, err).await,
        }
    }

    async fn handle_failure(
        &self,
        op: &PendingOperation,
        err: anyhow::Error,
    ) -> anyhow::Result<ExecutionOutcome> {
        let class = FailureClass::of(&err);
        let message = format!("{err:#}");

        match class {
            FailureClass::Transient => {
                let retry_after = err
                    .downcast_ref::<TransferError>()
                    .and_then(TransferError::retry_after_secs)
                    .map(Duration::from_secs);

                match self.retry.decide(op.retry_count, retry_after, Utc::now()) {
                    RetryDecision::Retry {
                        retry_count,
                        next_attempt_at,
                        delay,
                    } => {
                        self.journal
                            .reschedule_operation(op.id, retry_count, next_attempt_at, &message)
                            .await?;
                        warn!(
                            retry_count,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "Transient failure, retrying"
                        );
                        Ok(ExecutionOutcome::Rescheduled)
                    }
                    RetryDecision::GiveUp { retry_count } => {
                        self.journal
                            .fail_operation(op.id, retry_count, &message)
                            .await?;
                        error!(retry_count, error = %message, "Retries exhausted");
                        self.publish_failure(op, class, message);
                        Ok(ExecutionOutcome::Failed)
                    }
                }
            }
            FailureClass::Conflict => {
                self.journal.abandon_operation(op.id, &message).await?;
                info!(reason = %message, "Operation abandoned, path will be re-planned");
                self.registry.request_rescan(op.folder_id).await;
                Ok(ExecutionOutcome::Abandoned)
            }
            FailureClass::Permanent => {
                self.journal
                    .fail_operation(op.id, op.retry_count.saturating_add(1), &message)
                    .await?;
                error!(error = %message, "Operation failed");
                self.publish_failure(op, class, message);
                Ok(ExecutionOutcome::Failed)
            }
            FailureClass::Fatal => {
                Err(err.context(format!("fatal failure executing operation {}", op.id)))
            }
        }
    }

    fn publish_failure(&self, op: &PendingOperation, class: FailureClass, error: String) {
        self.registry.publish(SyncEvent::OperationFailed {
            folder_id: op.folder_id,
            operation_id: op.id,
            kind: op.kind,
            path: op.relative_path.clone(),
            class,
            error,
        });
    }

    /// Claims and executes ready operations until none are left
    ///
    /// Operations rescheduled into the future are left for a later pass.
    pub async fn drain(&self, folder: &SyncedFolder) -> anyhow::Result<DrainReport> {
        let mut report = DrainReport::default();
        loop {
            let batch = self
                .journal
                .claim_ready_operations(folder.id, Utc::now(), self.max_concurrent)
                .await?;
            if batch.is_empty() {
                return Ok(report);
            }
            for op in &batch {
                report.record(self.execute(folder, op).await?);
            }
        }
    }

    /// Runs the executor loop for one folder until `cancel` fires
    ///
    /// At most `max_concurrent` operations run at once. On cancellation the
    /// loop stops claiming and waits for in-flight operations to finish.
    ///
    /// # Errors
    /// Returns the first fatal error after in-flight work has settled.
    pub async fn run(
        self: Arc<Self>,
        folder: Arc<SyncedFolder>,
        control: Arc<FolderControl>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        info!(folder = %folder.name, max_concurrent = self.max_concurrent, "Executor starting");
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks: JoinSet<anyhow::Result<ExecutionOutcome>> = JoinSet::new();
        let mut fatal: Option<anyhow::Error> = None;

        loop {
            if !control.is_paused() && permits.available_permits() > 0 {
                let batch = self
                    .journal
                    .claim_ready_operations(folder.id, Utc::now(), permits.available_permits())
                    .await;
                match batch {
                    Ok(batch) => {
                        for op in batch {
                            let permit = Arc::clone(&permits).acquire_owned().await?;
                            control.operation_started();
                            let executor = Arc::clone(&self);
                            let folder = Arc::clone(&folder);
                            let control = Arc::clone(&control);
                            tasks.spawn(async move {
                                let _permit = permit;
                                let result = executor.execute(&folder, &op).await;
                                control.operation_finished();
                                result
                            });
                        }
                    }
                    Err(e) if FailureClass::of(&e) == FailureClass::Transient => {
                        warn!(error = %e, "Journal busy while claiming operations");
                    }
                    Err(e) => {
                        fatal = Some(e);
                        break;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = control.woken() => {}
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = settle(joined) {
                        fatal = Some(e);
                        break;
                    }
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight operations");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = settle(joined) {
                fatal.get_or_insert(e);
            }
        }

        info!(folder = %folder.name, "Executor stopped");
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Per-kind execution
    // ------------------------------------------------------------------

    async fn perform(
        &self,
        folder: &SyncedFolder,
        op: &PendingOperation,
    ) -> anyhow::Result<OperationOutcome> {
        let local_path = op.relative_path.to_local(&folder.local_root);
        let remote_path = op.relative_path.to_remote(&folder.remote_root);
        debug!(local = %local_path.display(), remote = %remote_path, "Executing");

        match op.kind {
            OperationKind::Upload => self.upload(op, &local_path, &remote_path).await,
            OperationKind::Download => self.download(op, &local_path, &remote_path).await,
            OperationKind::DeleteLocal => self.delete_local(op, &local_path).await,
            OperationKind::DeleteRemote => self.delete_remote(op, &local_path, &remote_path).await,
            OperationKind::MoveLocal => self.move_local(folder, op, &local_path).await,
            OperationKind::MoveRemote => self.move_remote(folder, op, &remote_path).await,
        }
    }

    async fn upload(
        &self,
        op: &PendingOperation,
        local_path: &Path,
        remote_path: &str,
    ) -> anyhow::Result<OperationOutcome> {
        let expected = content_hash(op)?;
        let state = self.local_filesystem.stat(local_path).await?;

        if expected.is_directory() {
            if !state.is_directory() {
                return Err(local_changed(local_path, "directory is gone"));
            }
            let entry = self.remote.create_dir(remote_path).await?;
            return Ok(OperationOutcome::Synced {
                local: LocalState::directory(state.modified),
                remote: RemoteState::new(FileHash::directory(), entry.version, 0, entry.mtime),
            });
        }

        if !state.is_regular_file() {
            return Err(local_changed(local_path, "file is gone"));
        }
        if self.local_filesystem.hash_file(local_path).await? != *expected {
            return Err(local_changed(local_path, "content changed since planning"));
        }

        let entry = self
            .remote
            .upload(remote_path, local_path, op.remote_guard.as_deref())
            .await?;

        if let Some(reported) = entry.hash.as_deref() {
            if !reported.eq_ignore_ascii_case(expected.as_str()) {
                return Err(TransferError::IntegrityMismatch {
                    expected: expected.to_string(),
                    actual: reported.to_string(),
                }
                .into());
            }
        }

        Ok(OperationOutcome::Synced {
            local: LocalState::new(expected.clone(), state.size, state.modified),
            remote: RemoteState::new(expected.clone(), entry.version, entry.size, entry.mtime),
        })
    }

    async fn download(
        &self,
        op: &PendingOperation,
        local_path: &Path,
        remote_path: &str,
    ) -> anyhow::Result<OperationOutcome> {
        let expected = content_hash(op)?;
        self.verify_local_guard(local_path, op.local_guard.as_ref())
            .await?;

        let entry = self
            .remote
            .stat(remote_path)
            .await?
            .ok_or_else(|| TransferError::NotFound(remote_path.to_string()))?;
        let remote = remote_state_of(&entry).ok_or_else(|| {
            TransferError::VersionMismatch(format!("{remote_path} no longer reports a hash"))
        })?;
        if remote.hash != *expected {
            return Err(TransferError::VersionMismatch(format!(
                "{remote_path} changed since planning"
            ))
            .into());
        }

        if expected.is_directory() {
            self.local_filesystem.create_dir_all(local_path).await?;
            let state = self.local_filesystem.stat(local_path).await?;
            return Ok(OperationOutcome::Synced {
                local: LocalState::directory(state.modified),
                remote,
            });
        }

        if let Some(parent) = local_path.parent() {
            self.local_filesystem.create_dir_all(parent).await?;
        }
        let staged = StagedFile::new(self.local_filesystem.staging_path(local_path));

        self.stage_download(remote_path, staged.path(), expected).await?;
        self.verify_local_guard(local_path, op.local_guard.as_ref())
            .await?;
        self.local_filesystem
            .commit_file(staged.path(), local_path)
            .await?;
        staged.committed();

        let state = self.local_filesystem.stat(local_path).await?;

        Ok(OperationOutcome::Synced {
            local: LocalState::new(expected.clone(), state.size, state.modified),
            remote,
        })
    }

    async fn stage_download(
        &self,
        remote_path: &str,
        staged: &Path,
        expected: &FileHash,
    ) -> anyhow::Result<()> {
        let bytes = self.remote.download(remote_path, staged).await?;
        let actual = self.local_filesystem.hash_file(staged).await?;
        if actual != *expected {
            return Err(TransferError::IntegrityMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            }
            .into());
        }
        debug!(bytes, "Download verified");
        Ok(())
    }

    async fn delete_local(
        &self,
        op: &PendingOperation,
        local_path: &Path,
    ) -> anyhow::Result<OperationOutcome> {
        let state = self.local_filesystem.stat(local_path).await?;
        if !state.exists {
            return Ok(OperationOutcome::Deleted);
        }
        self.verify_local_guard(local_path, op.local_guard.as_ref())
            .await?;

        if state.is_dir {
            self.local_filesystem.remove_empty_dir(local_path).await?;
        } else {
            self.local_filesystem.remove_file(local_path).await?;
        }
        Ok(OperationOutcome::Deleted)
    }

    async fn delete_remote(
        &self,
        op: &PendingOperation,
        local_path: &Path,
        remote_path: &str,
    ) -> anyhow::Result<OperationOutcome> {
        if self.local_filesystem.stat(local_path).await?.exists {
            return Err(local_changed(local_path, "path reappeared"));
        }

        match self
            .remote
            .delete(remote_path, op.remote_guard.as_deref())
            .await
        {
            Ok(()) => Ok(OperationOutcome::Deleted),
            Err(e) if matches!(
                e.downcast_ref::<TransferError>(),
                Some(TransferError::NotFound(_))
            ) =>
            {
                debug!("Remote path already gone");
                Ok(OperationOutcome::Deleted)
            }
            Err(e) => Err(e),
        }
    }

    /// Replays a local rename on the remote side
    async fn move_remote(
        &self,
        folder: &SyncedFolder,
        op: &PendingOperation,
        remote_path: &str,
    ) -> anyhow::Result<OperationOutcome> {
        let destination = destination(op)?;
        let expected = content_hash(op)?;
        let local_destination = destination.to_local(&folder.local_root);
        let state = self
            .verify_local_guard(&local_destination, Some(expected))
            .await?;

        let entry = self
            .remote
            .rename(
                remote_path,
                &destination.to_remote(&folder.remote_root),
                op.remote_guard.as_deref(),
            )
            .await?;

        Ok(OperationOutcome::Moved {
            destination: destination.clone(),
            local: Some(local_state_for(expected, &state)),
            remote: remote_state_of(&entry),
        })
    }

    /// Replays a remote rename on the local side
    async fn move_local(
        &self,
        folder: &SyncedFolder,
        op: &PendingOperation,
        local_path: &Path,
    ) -> anyhow::Result<OperationOutcome> {
        let destination = destination(op)?;
        let guard = op
            .local_guard
            .as_ref()
            .ok_or_else(|| anyhow!("move_local operation {} has no local guard", op.id))?;
        self.verify_local_guard(local_path, Some(guard)).await?;

        let local_destination = destination.to_local(&folder.local_root);
        if self.local_filesystem.stat(&local_destination).await?.exists {
            return Err(local_changed(&local_destination, "destination already exists"));
        }

        self.local_filesystem
            .rename(local_path, &local_destination)
            .await?;
        let state = self.local_filesystem.stat(&local_destination).await?;

        Ok(OperationOutcome::Moved {
            destination: destination.clone(),
            local: Some(local_state_for(guard, &state)),
            remote: None,
        })
    }

    /// Checks that `path` still holds what the operation was planned against
    ///
    /// `None` means the path must not exist.
    async fn verify_local_guard(
        &self,
        path: &Path,
        guard: Option<&FileHash>,
    ) -> anyhow::Result<FileSystemState> {
        let state = self.local_filesystem.stat(path).await?;
        match guard {
            None if state.exists => Err(local_changed(path, "path appeared locally")),
            None => Ok(state),
            Some(hash) if hash.is_directory() => {
                if state.is_directory() {
                    Ok(state)
                } else {
                    Err(local_changed(path, "directory is gone"))
                }
            }
            Some(hash) => {
                if !state.is_regular_file() {
                    return Err(local_changed(path, "file is gone"));
                }
                let actual = self
                    .local_filesystem
                    .hash_file(path)
                    .await
                    .with_context(|| format!("hashing {}", path.display()))?;
                if actual == *hash {
                    Ok(state)
                } else {
                    Err(local_changed(path, "content changed since planning"))
                }
            }
        }
    }
}

/// Unwraps a finished task, keeping only fatal errors
fn settle(
    joined: Result<anyhow::Result<ExecutionOutcome>, tokio::task::JoinError>,
) -> anyhow::Result<()> {
    match joined {
        Ok(Ok(outcome)) => {
            debug!(?outcome, "Operation settled");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %format!("{e:#}"), "Fatal executor failure");
            Err(e)
        }
        Err(join_error) => {
            // A panicked task leaves its row in_progress; recovery requeues it on restart.
            error!(error = %join_error, "Operation task panicked");
            Ok(())
        }
    }
}

fn content_hash(op: &PendingOperation) -> anyhow::Result<&FileHash> {
    op.content_hash
        .as_ref()
        .ok_or_else(|| anyhow!("{} operation {} has no content hash", op.kind, op.id))
}

fn destination(op: &PendingOperation) -> anyhow::Result<&foldsync_core::domain::RelativePath> {
    op.destination
        .as_ref()
        .ok_or_else(|| anyhow!("{} operation {} has no destination", op.kind, op.id))
}

fn local_changed(path: &Path, why: &str) -> anyhow::Error {
    TransferError::LocalChanged(format!("{}: {why}", path.display())).into()
}

fn local_state_for(hash: &FileHash, state: &FileSystemState) -> LocalState {
    if hash.is_directory() {
        LocalState::directory(state.modified)
    } else {
        LocalState::new(hash.clone(), state.size, state.modified)
    }
}

/// Partial download removed on drop unless committed
///
/// Covers every early exit from a download, including the operation
/// timeout dropping the future mid-transfer.
struct StagedFile {
    path: PathBuf,
    committed: bool,
}

impl StagedFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Keeps the file, which now lives at its target path
    fn committed(mut self) {
        self.committed = true;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Discarded staged file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Cannot discard staged file"),
        }
    }
}
