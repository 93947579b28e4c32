//! Conflict resolution
//!
//! Turns a user decision into journal work:
//! - `KeepLocal`: push the local version (upload, or delete the remote copy)
//! - `KeepRemote`: pull the remote version (download, or delete the local copy)
//! - `KeepBoth`: rename the local file to a conflict copy, upload the copy
//!   and download the remote version to the original path
//!
//! Every operation carries guards built from the versions recorded on the
//! conflict, so a side that changed again after the conflict was shown is
//! detected by the executor instead of being overwritten.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use foldsync_core::domain::{
    Conflict, ConflictId, ConflictKind, FolderId, LocalState, NewOperation, OperationKind,
    RelativePath, Resolution, SyncedFolder,
};
use foldsync_core::ports::{
    IChangeJournal, ILocalFileSystem, RecordSeed, ResolutionPlan, ResolveOutcome,
};

use crate::{error::ConflictError, namer::ConflictNamer};

/// Local file moved to a conflict copy by `KeepBoth`
struct RenamedAside {
    original: PathBuf,
    copy: PathBuf,
}

/// Applies user resolutions through the change journal
pub struct ConflictResolver {
    journal: Arc<dyn IChangeJournal>,
    local_filesystem: Arc<dyn ILocalFileSystem>,
}

impl ConflictResolver {
    pub fn new(journal: Arc<dyn IChangeJournal>, local_filesystem: Arc<dyn ILocalFileSystem>) -> Self {
        Self {
            journal,
            local_filesystem,
        }
    }

    /// Pending conflicts, optionally restricted to one folder
    pub async fn list_pending(&self, folder: Option<FolderId>) -> Result<Vec<Conflict>, ConflictError> {
        Ok(self.journal.list_conflicts(folder, true).await?)
    }

    /// Applies `resolution` to a conflict
    ///
    /// Resolving an unknown conflict reports `NotFound`; resolving one that
    /// is already resolved reports `AlreadyResolved` and touches nothing.
    #[tracing::instrument(skip_all, fields(conflict_id = %id, resolution = %resolution))]
    pub async fn resolve(
        &self,
        id: ConflictId,
        resolution: Resolution,
    ) -> Result<ResolveOutcome, ConflictError> {
        let Some(conflict) = self.journal.get_conflict(id).await? else {
            return Ok(ResolveOutcome::NotFound);
        };
        if !conflict.is_pending() {
            debug!("Conflict already resolved, nothing to do");
            return Ok(ResolveOutcome::AlreadyResolved);
        }

        let (plan, aside) = match resolution {
            Resolution::KeepBoth if conflict.kind == ConflictKind::Content => {
                let folder = self
                    .journal
                    .get_folder(conflict.folder_id)
                    .await?
                    .ok_or(ConflictError::FolderNotFound(conflict.folder_id))?;
                let (plan, aside) = self.keep_both(&folder, &conflict).await?;
                (plan, Some(aside))
            }
            other => (Self::plan_for(&conflict, other), None),
        };

        let outcome = match self.journal.resolve_conflict(id, &plan).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some(aside) = &aside {
                    self.restore(aside).await;
                }
                return Err(e.into());
            }
        };
        if outcome != ResolveOutcome::Applied {
            if let Some(aside) = &aside {
                self.restore(aside).await;
            }
        }
        match outcome {
            ResolveOutcome::Applied => info!(
                path = %conflict.relative_path,
                operations = plan.operations.len(),
                "Conflict resolution applied"
            ),
            other => warn!(
                path = %conflict.relative_path,
                outcome = ?other,
                "Conflict changed while resolving"
            ),
        }
        Ok(outcome)
    }

    /// Journal work for every resolution that needs no local file operation
    ///
    /// `KeepBoth` on a content conflict renames a file first and is handled
    /// by [`ConflictResolver::resolve`]; here it restores the surviving side
    /// of a delete-vs-edit conflict.
    pub fn plan_for(conflict: &Conflict, resolution: Resolution) -> ResolutionPlan {
        let path = conflict.relative_path.clone();
        let local_hash = conflict.local.hash.clone();
        let remote_hash = conflict.remote.hash.clone();
        let remote_version = conflict.remote.version.clone();

        let keep_local = || match &local_hash {
            Some(hash) => NewOperation::new(OperationKind::Upload, path.clone())
                .with_content_hash(Some(hash.clone()))
                .with_remote_guard(remote_version.clone()),
            None => NewOperation::new(OperationKind::DeleteRemote, path.clone())
                .with_remote_guard(remote_version.clone()),
        };
        let keep_remote = || match &remote_hash {
            Some(hash) => NewOperation::new(OperationKind::Download, path.clone())
                .with_content_hash(Some(hash.clone()))
                .with_local_guard(local_hash.clone()),
            None => NewOperation::new(OperationKind::DeleteLocal, path.clone())
                .with_local_guard(local_hash.clone()),
        };

        let operation = match resolution {
            Resolution::KeepLocal => keep_local(),
            Resolution::KeepRemote => keep_remote(),
            // Keep whichever side still has content
            Resolution::KeepBoth if local_hash.is_some() => keep_local(),
            Resolution::KeepBoth => keep_remote(),
        };

        ResolutionPlan {
            resolution,
            records: Vec::new(),
            operations: vec![operation],
        }
    }

    /// Renames the local version aside and plans one operation per path
    ///
    /// The rename is undone here if the copy cannot be described, and by
    /// the caller if the journal does not take the plan.
    async fn keep_both(
        &self,
        folder: &SyncedFolder,
        conflict: &Conflict,
    ) -> Result<(ResolutionPlan, RenamedAside), ConflictError> {
        let original = &conflict.relative_path;
        let copy = self.free_copy_path(folder, original).await?;

        let from = original.to_local(&folder.local_root);
        let to = copy.to_local(&folder.local_root);
        self.local_filesystem
            .rename(&from, &to)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("rename {original} aside: {e:#}")))?;
        info!(from = %original, to = %copy, "Local version renamed to conflict copy");
        let aside = RenamedAside { original: from, copy: to };

        // Describe what is actually on disk now
        let described = async {
            let hash = self
                .local_filesystem
                .hash_file(&aside.copy)
                .await
                .map_err(|e| ConflictError::ResolutionFailed(format!("hash {copy}: {e:#}")))?;
            let state = self
                .local_filesystem
                .stat(&aside.copy)
                .await
                .map_err(|e| ConflictError::ResolutionFailed(format!("stat {copy}: {e:#}")))?;
            Ok::<_, ConflictError>((hash, state))
        }
        .await;
        let (hash, state) = match described {
            Ok(described) => described,
            Err(e) => {
                self.restore(&aside).await;
                return Err(e);
            }
        };

        let plan = ResolutionPlan {
            resolution: Resolution::KeepBoth,
            records: vec![
                RecordSeed {
                    path: copy.clone(),
                    is_dir: false,
                    local: Some(LocalState::new(hash.clone(), state.size, state.modified)),
                },
                RecordSeed {
                    path: original.clone(),
                    is_dir: false,
                    local: None,
                },
            ],
            operations: vec![
                NewOperation::new(OperationKind::Upload, copy)
                    .with_content_hash(Some(hash))
                    .with_remote_guard(None),
                NewOperation::new(OperationKind::Download, original.clone())
                    .with_content_hash(conflict.remote.hash.clone())
                    .with_local_guard(None),
            ],
        };
        Ok((plan, aside))
    }

    /// Moves a conflict copy back to the original path
    async fn restore(&self, aside: &RenamedAside) {
        match self.local_filesystem.rename(&aside.copy, &aside.original).await {
            Ok(()) => info!(path = %aside.original.display(), "Conflict copy moved back"),
            Err(e) => warn!(
                copy = %aside.copy.display(),
                error = %format!("{e:#}"),
                "Cannot move conflict copy back"
            ),
        }
    }

    async fn free_copy_path(
        &self,
        folder: &SyncedFolder,
        original: &RelativePath,
    ) -> Result<RelativePath, ConflictError> {
        let taken: HashSet<String> = self
            .journal
            .list_records(folder.id)
            .await?
            .into_iter()
            .map(|r| r.relative_path.file_name().to_string())
            .collect();

        let name = ConflictNamer::generate_unique(original.file_name(), Utc::now(), |candidate| {
            taken.contains(candidate)
        })
        .ok_or_else(|| ConflictError::NameExhausted(original.clone()))?;
        let copy = original
            .with_file_name(&name)
            .map_err(|e| ConflictError::ResolutionFailed(e.to_string()))?;

        let on_disk = self
            .local_filesystem
            .stat(&copy.to_local(&folder.local_root))
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("stat {copy}: {e:#}")))?;
        if on_disk.exists {
            return Err(ConflictError::NameExhausted(original.clone()));
        }
        Ok(copy)
    }

    /// Deletes resolved conflicts older than the retention window
    pub async fn prune_resolved(&self, retention_days: u32) -> Result<u64, ConflictError> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let pruned = self.journal.prune_resolved_conflicts(cutoff).await?;
        if pruned > 0 {
            info!(pruned, retention_days, "Pruned resolved conflicts");
        }
        Ok(pruned)
    }
}
