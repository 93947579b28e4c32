//! Request execution
//!
//! Commands are checked against journal state before anything is written,
//! so repeating a command is harmless: pausing a paused folder or resolving
//! a resolved conflict answers `ack` with `no_op`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use foldsync_conflict::ConflictResolver;
use foldsync_core::domain::{
    ConflictId, FolderActivity, FolderId, OperationId, OperationStatus, Resolution, SyncEvent,
    SyncedFolder,
};
use foldsync_core::ports::{IChangeJournal, ResolveOutcome, RetryOutcome};
use foldsync_sync::SyncRegistry;

use crate::protocol::{AckOutcome, ConflictInfo, Message, OperationInfo, Request, SyncStats};

/// Executes IPC requests for all connections
pub struct RequestHandler {
    journal: Arc<dyn IChangeJournal>,
    resolver: ConflictResolver,
    registry: Arc<SyncRegistry>,
}

impl RequestHandler {
    pub fn new(
        journal: Arc<dyn IChangeJournal>,
        resolver: ConflictResolver,
        registry: Arc<SyncRegistry>,
    ) -> Self {
        Self {
            journal,
            resolver,
            registry,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.registry.subscribe()
    }

    /// Answers one request
    ///
    /// Failures are reported as `error` messages; the connection stays usable.
    pub async fn handle(&self, request: Request) -> Vec<Message> {
        let command = request.command();
        debug!(command, "Handling IPC request");
        match self.dispatch(request).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(command, error = %format!("{e:#}"), "IPC request failed");
                vec![Message::error(format!("{e:#}"))]
            }
        }
    }

    async fn dispatch(&self, request: Request) -> anyhow::Result<Vec<Message>> {
        let command = request.command();
        let single = |message: Message| -> anyhow::Result<Vec<Message>> { Ok(vec![message]) };

        match request {
            Request::GetStatus => {
                let mut messages = self.status_all().await?;
                messages.push(Message::ack(command, AckOutcome::Applied));
                Ok(messages)
            }
            Request::ListConflicts { folder } => single(self.list_conflicts(folder).await?),
            Request::ListFailed { folder } => single(self.list_failed(folder).await?),
            Request::Pause { folder } => single(self.set_paused(command, &folder, true).await?),
            Request::Resume { folder } => single(self.set_paused(command, &folder, false).await?),
            Request::RetryOperation { operation_id } => {
                single(self.retry(command, operation_id).await?)
            }
            Request::ResolveConflict {
                conflict_id,
                resolution,
            } => single(self.resolve(command, conflict_id, resolution).await?),
            Request::ForceRescan { folder } => single(self.rescan(command, &folder).await?),
            // Subscriptions belong to the connection, see `server`
            Request::Subscribe => single(Message::ack(command, AckOutcome::Applied)),
        }
    }

    /// Current `sync_stats` of a folder
    pub async fn folder_status(&self, folder: &SyncedFolder) -> anyhow::Result<SyncStats> {
        let stats = self.journal.folder_stats(folder.id).await?;
        let activity = match self.registry.activity(folder.id).await {
            Some(activity) => activity,
            None if folder.paused => FolderActivity::Paused,
            None => FolderActivity::Idle,
        };
        Ok(SyncStats::new(folder.name.clone(), &activity, stats, folder.paused))
    }

    /// `sync_stats` of every folder
    pub async fn status_all(&self) -> anyhow::Result<Vec<Message>> {
        let mut messages = Vec::new();
        for folder in self.journal.list_folders().await? {
            messages.push(Message::SyncStats(self.folder_status(&folder).await?));
        }
        Ok(messages)
    }

    /// Translates an engine event into the notification subscribers receive
    pub async fn notification_for(&self, event: &SyncEvent) -> Option<Message> {
        let folder = match self.journal.get_folder(event.folder_id()).await {
            Ok(Some(folder)) => folder,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Cannot look up folder for notification");
                return None;
            }
        };

        match event {
            SyncEvent::ActivityChanged { .. } => match self.folder_status(&folder).await {
                Ok(stats) => Some(Message::SyncStats(stats)),
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Cannot build status notification");
                    None
                }
            },
            SyncEvent::ConflictDetected { path, .. } => Some(Message::ConflictDetected {
                folder: folder.name,
                path: path.clone(),
            }),
            SyncEvent::OperationFailed {
                operation_id,
                kind,
                path,
                class,
                error,
                ..
            } => Some(Message::OperationFailed {
                folder: folder.name,
                operation_id: *operation_id,
                kind: *kind,
                path: path.clone(),
                class: *class,
                error: error.clone(),
            }),
            SyncEvent::FolderHalted { message, .. } => Some(Message::FolderError {
                folder: folder.name,
                message: message.clone(),
            }),
            SyncEvent::OperationCompleted { .. } => None,
        }
    }

    async fn folder_by_name(&self, name: &str) -> anyhow::Result<SyncedFolder> {
        self.journal
            .get_folder_by_name(name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("unknown folder: {name}"))
    }

    async fn folder_filter(&self, name: Option<String>) -> anyhow::Result<Option<FolderId>> {
        match name {
            Some(name) => Ok(Some(self.folder_by_name(&name).await?.id)),
            None => Ok(None),
        }
    }

    async fn folder_names(&self) -> anyhow::Result<HashMap<FolderId, String>> {
        Ok(self
            .journal
            .list_folders()
            .await?
            .into_iter()
            .map(|f| (f.id, f.name))
            .collect())
    }

    async fn list_conflicts(&self, folder: Option<String>) -> anyhow::Result<Message> {
        let filter = self.folder_filter(folder).await?;
        let names = self.folder_names().await?;
        let conflicts = self
            .resolver
            .list_pending(filter)
            .await?
            .into_iter()
            .map(|c| {
                let name = names.get(&c.folder_id).cloned().unwrap_or_default();
                ConflictInfo::new(name, c)
            })
            .collect();
        Ok(Message::Conflicts { conflicts })
    }

    async fn list_failed(&self, folder: Option<String>) -> anyhow::Result<Message> {
        let filter = self.folder_filter(folder).await?;
        let names = self.folder_names().await?;
        let operations = self
            .journal
            .list_operations(filter, Some(OperationStatus::Failed))
            .await?
            .into_iter()
            .map(|op| {
                let name = names.get(&op.folder_id).cloned().unwrap_or_default();
                OperationInfo::new(name, op)
            })
            .collect();
        Ok(Message::Operations { operations })
    }

    async fn set_paused(&self, command: &str, name: &str, paused: bool) -> anyhow::Result<Message> {
        let folder = self.folder_by_name(name).await?;
        let changed = self.journal.set_folder_paused(folder.id, paused).await?;
        // The engine may lag behind the journal after a restart, so always sync it
        self.registry.set_paused(folder.id, paused).await;

        if changed {
            info!(folder = %folder.name, paused, "Folder pause state changed");
        }
        Ok(Message::ack(command, AckOutcome::from_changed(changed)))
    }

    async fn retry(&self, command: &str, id: OperationId) -> anyhow::Result<Message> {
        let outcome = self.journal.retry_operation(id).await?;
        if outcome == RetryOutcome::NotFound {
            return Ok(Message::error(format!("unknown operation: {id}")));
        }

        if let Some(op) = self.journal.get_operation(id).await? {
            self.registry.wake(op.folder_id).await;
        }
        info!(operation_id = %id, outcome = ?outcome, "Retry requested");
        Ok(Message::ack(
            command,
            AckOutcome::from_changed(outcome == RetryOutcome::Requeued),
        ))
    }

    async fn resolve(
        &self,
        command: &str,
        id: ConflictId,
        resolution: Resolution,
    ) -> anyhow::Result<Message> {
        match self.resolver.resolve(id, resolution).await? {
            ResolveOutcome::Applied => {
                if let Some(conflict) = self.journal.get_conflict(id).await? {
                    self.registry.wake(conflict.folder_id).await;
                }
                Ok(Message::ack(command, AckOutcome::Applied))
            }
            ResolveOutcome::AlreadyResolved => Ok(Message::ack(command, AckOutcome::NoOp)),
            ResolveOutcome::NotFound => Ok(Message::error(format!("unknown conflict: {id}"))),
        }
    }

    async fn rescan(&self, command: &str, name: &str) -> anyhow::Result<Message> {
        let folder = self.folder_by_name(name).await?;
        if !self.registry.request_rescan(folder.id).await {
            return Ok(Message::error(format!("folder {name} is not running")));
        }
        Ok(Message::ack(command, AckOutcome::Applied))
    }
}
