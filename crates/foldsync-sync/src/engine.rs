//! Per-folder sync engine
//!
//! A [`FolderEngine`] owns the loops of one folder pair:
//!
//! ```text
//!  FileWatcher ──► DebouncedChangeQueue ──┐
//!                                         ├──► planner task ──► journal ──► executor task
//!  remote scan (interval / rescan) ───────┘    (local scan + plan)
//! ```
//!
//! All loops share one [`FolderControl`] for activity and pause state. A
//! fatal failure in any loop halts the folder: it is marked `error`, a
//! `FolderHalted` event is published and the remaining loops are cancelled.
//! Other folders keep running.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use foldsync_core::config::Config;
use foldsync_core::domain::{FailureClass, PlanReport, SyncEvent, SyncedFolder};
use foldsync_core::ports::{IChangeJournal, ILocalFileSystem, IRemoteStore, ObservationReport};

use crate::executor::{DrainReport, TransferExecutor};
use crate::filesystem::compile_patterns;
use crate::planner::SyncPlanner;
use crate::registry::{FolderControl, SyncRegistry};
use crate::scanner::{LocalScanner, RemoteScanner};
use crate::watcher::{DebouncedChangeQueue, FileWatcher};

/// Upper bound on how long the watch loop sleeps with nothing pending
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Timing and filtering knobs shared by every folder
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub scan_interval: Duration,
    pub debounce: Duration,
    pub ignore_patterns: Vec<String>,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scan_interval: config.sync.scan_interval(),
            debounce: config.sync.debounce(),
            ignore_patterns: config.sync.ignore_patterns.clone(),
        }
    }
}

/// Runs watching, scanning, planning and execution for one folder pair
pub struct FolderEngine {
    folder: Arc<SyncedFolder>,
    journal: Arc<dyn IChangeJournal>,
    local_scanner: LocalScanner,
    remote_scanner: RemoteScanner,
    executor: Arc<TransferExecutor>,
    registry: Arc<SyncRegistry>,
    control: Arc<FolderControl>,
    settings: EngineSettings,
}

impl FolderEngine {
    /// Builds the engine and registers the folder with `registry`
    ///
    /// # Errors
    /// Returns an error if an ignore pattern does not compile
    pub async fn new(
        folder: SyncedFolder,
        journal: Arc<dyn IChangeJournal>,
        local_filesystem: Arc<dyn ILocalFileSystem>,
        remote: Arc<dyn IRemoteStore>,
        executor: Arc<TransferExecutor>,
        registry: Arc<SyncRegistry>,
        settings: EngineSettings,
    ) -> anyhow::Result<Self> {
        let remote_scanner = RemoteScanner::new(remote, &settings.ignore_patterns)?;
        let local_scanner = LocalScanner::new(local_filesystem, settings.ignore_patterns.clone());
        let control = registry.register(folder.id, folder.paused).await;

        Ok(Self {
            folder: Arc::new(folder),
            journal,
            local_scanner,
            remote_scanner,
            executor,
            registry,
            control,
            settings,
        })
    }

    pub fn folder(&self) -> &SyncedFolder {
        &self.folder
    }

    pub fn control(&self) -> &Arc<FolderControl> {
        &self.control
    }

    /// Walks the local tree and records what it finds
    #[instrument(skip_all, fields(folder = %self.folder.name))]
    pub async fn scan_local(&self) -> anyhow::Result<ObservationReport> {
        self.control.set_scanning(true);
        let result = async {
            let records = self.journal.list_records(self.folder.id).await?;
            let snapshot = self.local_scanner.scan(&self.folder, &records).await?;
            self.journal
                .apply_local_snapshot(self.folder.id, &snapshot)
                .await
        }
        .await;
        self.control.set_scanning(false);

        let report = result?;
        debug!(
            inserted = report.inserted,
            updated = report.updated,
            cleared = report.cleared,
            "Local scan applied"
        );
        Ok(report)
    }

    /// Lists the remote tree and records what it finds
    #[instrument(skip_all, fields(folder = %self.folder.name))]
    pub async fn scan_remote(&self) -> anyhow::Result<ObservationReport> {
        self.control.set_scanning(true);
        let result = async {
            let snapshot = self.remote_scanner.scan(&self.folder).await?;
            let report = self
                .journal
                .apply_remote_snapshot(self.folder.id, &snapshot)
                .await?;
            self.journal.mark_scanned(self.folder.id, Utc::now()).await?;
            Ok::<_, anyhow::Error>(report)
        }
        .await;
        self.control.set_scanning(false);

        let report = result?;
        debug!(
            inserted = report.inserted,
            updated = report.updated,
            cleared = report.cleared,
            purged = report.purged,
            "Remote scan applied"
        );
        Ok(report)
    }

    /// Plans pending work from the current records and wakes the executor
    pub async fn plan(&self) -> anyhow::Result<PlanReport> {
        let (plan, report) = SyncPlanner::plan_folder(self.journal.as_ref(), self.folder.id).await?;

        for conflict in &plan.conflicts {
            warn!(path = %conflict.relative_path, kind = conflict.kind.as_str(), "Conflict detected");
            self.registry.publish(SyncEvent::ConflictDetected {
                folder_id: self.folder.id,
                path: conflict.relative_path.clone(),
            });
        }
        if report.enqueued > 0 {
            self.control.wake();
        }
        Ok(report)
    }

    /// One full pass: scan both sides, plan, and execute everything ready
    pub async fn sync_once(&self) -> anyhow::Result<DrainReport> {
        self.scan_remote().await?;
        self.scan_local().await?;
        self.plan().await?;

        self.control.operation_started();
        let report = self.executor.drain(&self.folder).await;
        self.control.operation_finished();
        report
    }

    /// Runs the folder's loops until `cancel` fires or the folder halts
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let cancel = cancel.child_token();
        let plan_needed = Arc::new(Notify::new());
        info!(folder = %self.folder.name, root = %self.folder.local_root.display(), "Folder engine starting");

        if !self.control.is_paused() {
            if let Err(e) = self.initial_pass().await {
                if self.check_fatal(e, &cancel) {
                    return;
                }
            }
        }

        let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();
        tasks.spawn(Arc::clone(&self).watch_loop(Arc::clone(&plan_needed), cancel.clone()));
        tasks.spawn(Arc::clone(&self).remote_loop(Arc::clone(&plan_needed), cancel.clone()));
        tasks.spawn(Arc::clone(&self).plan_loop(plan_needed, cancel.clone()));
        tasks.spawn(Arc::clone(&self.executor).run(
            Arc::clone(&self.folder),
            Arc::clone(&self.control),
            cancel.clone(),
        ));

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.halt(&e, &cancel);
                }
                Err(join_error) => {
                    error!(folder = %self.folder.name, error = %join_error, "Folder task panicked");
                    cancel.cancel();
                }
            }
        }
        info!(folder = %self.folder.name, "Folder engine stopped");
    }

    async fn initial_pass(&self) -> anyhow::Result<()> {
        self.scan_remote().await?;
        self.scan_local().await?;
        self.plan().await?;
        Ok(())
    }

    /// Logs a loop error; returns true if it halted the folder
    fn check_fatal(&self, err: anyhow::Error, cancel: &CancellationToken) -> bool {
        if FailureClass::of(&err) == FailureClass::Fatal {
            self.halt(&err, cancel);
            true
        } else {
            warn!(folder = %self.folder.name, error = %format!("{err:#}"), "Sync pass failed, will retry");
            false
        }
    }

    fn halt(&self, err: &anyhow::Error, cancel: &CancellationToken) {
        let message = format!("{err:#}");
        error!(folder = %self.folder.name, error = %message, "Folder halted");
        self.control.halt(message);
        cancel.cancel();
    }

    /// Feeds settled watcher events into planning passes
    ///
    /// Without a watcher the folder still syncs on the remote scan interval.
    async fn watch_loop(
        self: Arc<Self>,
        plan_needed: Arc<Notify>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let ignore = compile_patterns(&self.settings.ignore_patterns)?;
        let (watcher, mut rx) = match FileWatcher::start(&self.folder.local_root, ignore) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Local root not watched, relying on periodic scans");
                return Ok(());
            }
        };

        let mut queue = DebouncedChangeQueue::new(self.settings.debounce);
        loop {
            let deadline = queue
                .next_deadline()
                .unwrap_or_else(|| tokio::time::Instant::now() + IDLE_WAIT);

            tokio::select! {
                _ = cancel.cancelled() => break,
                touched = rx.recv() => match touched {
                    Some(path) => queue.touch(path),
                    None => {
                        warn!("Watcher channel closed");
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    let settled = queue.settled();
                    if !settled.is_empty() {
                        debug!(count = settled.len(), first = %settled[0], "Local changes settled");
                        plan_needed.notify_one();
                    }
                }
            }
        }

        watcher.stop();
        Ok(())
    }

    /// Rescans the remote side on an interval or on request
    async fn remote_loop(
        self: Arc<Self>,
        plan_needed: Arc<Notify>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.settings.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {}
                _ = self.control.rescan_requested() => {
                    debug!("Rescan requested");
                }
            }

            if self.control.is_paused() {
                continue;
            }
            match self.scan_remote().await {
                Ok(_) => plan_needed.notify_one(),
                Err(e) if FailureClass::of(&e) == FailureClass::Fatal => return Err(e),
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Remote scan failed");
                }
            }
        }
    }

    /// Rescans the local side and plans whenever something changed
    async fn plan_loop(
        self: Arc<Self>,
        plan_needed: Arc<Notify>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = plan_needed.notified() => {}
            }

            if self.control.is_paused() {
                continue;
            }
            let pass = async {
                self.scan_local().await?;
                self.plan().await
            }
            .await;

            match pass {
                Ok(report) => debug!(enqueued = report.enqueued, "Planning pass finished"),
                Err(e) if FailureClass::of(&e) == FailureClass::Fatal => return Err(e),
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Planning pass failed");
                }
            }
        }
    }
}
