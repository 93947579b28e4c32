//! Sync planner
//!
//! Turns the journal's file records into a [`Plan`]: the operations,
//! conflicts and convergences needed to reconcile both sides of a folder.
//!
//! Scans are written into the records before planning, so the planner only
//! compares each record's local, remote and last-synced states. It is a pure
//! function of the records, the folder's operations and its pending
//! conflicts: running it twice over the same inputs yields the same plan,
//! and the journal drops anything that would duplicate active work.
//!
//! ## Ordering
//!
//! ```text
//! 1. directory creates      ascending depth
//! 2. transfers and moves    path order
//! 3. deletes                descending depth
//! ```

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, instrument};

use foldsync_conflict::{ConflictDetector, Divergence, RenameDetector};
use foldsync_core::domain::{
    Conflict, FileHash, FileRecord, FolderId, NewConflict, NewOperation, OperationKind,
    OperationStatus, PendingOperation, Plan, PlanReport, RelativePath,
};
use foldsync_core::ports::IChangeJournal;

/// Execution phase of a planned operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    CreateDir,
    Transfer,
    Delete,
}

#[derive(Debug)]
struct Planned {
    op: NewOperation,
    is_dir: bool,
}

impl Planned {
    fn phase(&self) -> Phase {
        if self.op.kind.is_delete() {
            Phase::Delete
        } else if self.is_dir && !self.op.kind.is_move() {
            Phase::CreateDir
        } else {
            Phase::Transfer
        }
    }
}

/// Three-way planner over file records
pub struct SyncPlanner;

impl SyncPlanner {
    /// Computes the plan for one folder
    ///
    /// `operations` are all operation rows of the folder (any status) and
    /// `pending_conflicts` its unresolved conflicts.
    pub fn plan(
        records: &[FileRecord],
        operations: &[PendingOperation],
        pending_conflicts: &[Conflict],
    ) -> Plan {
        let mut blocked: HashSet<&RelativePath> = HashSet::new();
        let mut failed: HashMap<&RelativePath, &PendingOperation> = HashMap::new();
        let mut active_paths: Vec<&RelativePath> = Vec::new();

        for op in operations {
            if op.status.is_active() {
                blocked.insert(&op.relative_path);
                active_paths.push(&op.relative_path);
                if let Some(dest) = &op.destination {
                    blocked.insert(dest);
                    active_paths.push(dest);
                }
            } else if op.status == OperationStatus::Failed {
                failed.insert(&op.relative_path, op);
            }
        }
        for conflict in pending_conflicts {
            blocked.insert(&conflict.relative_path);
        }

        let candidates: Vec<&FileRecord> = records
            .iter()
            .filter(|r| !blocked.contains(&r.relative_path))
            .collect();

        let mut plan = Plan::default();
        let mut planned: Vec<Planned> = Vec::new();
        let mut consumed: HashSet<&RelativePath> = HashSet::new();

        for rename in RenameDetector::detect(&candidates) {
            let source_failed = failed.get(&rename.from).copied();
            let target_failed = failed.get(&rename.to).copied();

            if source_failed.is_some_and(|f| rename.operation.same_work_as(f)) {
                debug!(from = %rename.from, "Rename already failed, leaving it for manual retry");
            } else {
                plan.superseded
                    .extend(source_failed.into_iter().chain(target_failed).map(|f| f.id));
                planned.push(Planned {
                    op: rename.operation,
                    is_dir: false,
                });
            }

            for record in candidates
                .iter()
                .copied()
                .filter(|r| r.relative_path == rename.from || r.relative_path == rename.to)
            {
                consumed.insert(&record.relative_path);
            }
        }

        for record in candidates
            .iter()
            .copied()
            .filter(|r| !consumed.contains(&r.relative_path))
        {
            let failed_op = failed.get(&record.relative_path).copied();

            let op = match ConflictDetector::classify(record) {
                Divergence::InSync | Divergence::BothAbsent => None,
                Divergence::Converged(hash) => {
                    plan.converged.push((record.id, hash));
                    None
                }
                Divergence::LocalChanged => Some(push_local(record)),
                Divergence::RemoteChanged => Some(pull_remote(record)),
                Divergence::Conflict(conflict) => {
                    plan.conflicts.push(conflict);
                    None
                }
            };

            match (op, failed_op) {
                (Some(op), Some(f)) if op.same_work_as(f) => {
                    debug!(path = %record.relative_path, op_id = %f.id, "Identical work already failed");
                }
                (op, f) => {
                    if let Some(f) = f {
                        plan.superseded.push(f.id);
                    }
                    if let Some(op) = op {
                        planned.push(Planned {
                            op,
                            is_dir: record.is_dir,
                        });
                    }
                }
            }
        }

        keep_needed_directories(&mut planned, &plan.conflicts, &active_paths);

        planned.sort_by(|a, b| {
            let (pa, pb) = (a.phase(), b.phase());
            pa.cmp(&pb).then_with(|| match pa {
                Phase::CreateDir => a
                    .op
                    .relative_path
                    .depth()
                    .cmp(&b.op.relative_path.depth())
                    .then_with(|| a.op.relative_path.cmp(&b.op.relative_path)),
                Phase::Transfer => a.op.relative_path.cmp(&b.op.relative_path),
                Phase::Delete => b
                    .op
                    .relative_path
                    .depth()
                    .cmp(&a.op.relative_path.depth())
                    .then_with(|| a.op.relative_path.cmp(&b.op.relative_path)),
            })
        });
        plan.operations = planned.into_iter().map(|p| p.op).collect();
        plan.superseded.sort();
        plan.superseded.dedup();
        plan
    }

    /// Loads the folder's state from the journal, plans, and writes the plan
    #[instrument(skip_all, fields(folder_id = %folder))]
    pub async fn plan_folder(
        journal: &dyn IChangeJournal,
        folder: FolderId,
    ) -> anyhow::Result<(Plan, PlanReport)> {
        let records = journal.list_records(folder).await?;
        let operations = journal.list_operations(Some(folder), None).await?;
        let conflicts = journal.list_conflicts(Some(folder), true).await?;

        let plan = Self::plan(&records, &operations, &conflicts);
        if plan.is_empty() {
            return Ok((plan, PlanReport::default()));
        }

        let report = journal.apply_plan(folder, &plan).await?;
        info!(
            enqueued = report.enqueued,
            conflicts = report.conflicts_created,
            converged = report.converged,
            superseded = report.superseded,
            "Planning pass complete"
        );
        Ok((plan, report))
    }
}

/// Local side moved away from the agreed state: push it
fn push_local(record: &FileRecord) -> NewOperation {
    let remote_guard = record.remote_version().map(str::to_string);
    match &record.local {
        Some(local) => NewOperation::new(OperationKind::Upload, record.relative_path.clone())
            .with_content_hash(Some(local.hash.clone()))
            .with_remote_guard(remote_guard),
        None => NewOperation::new(OperationKind::DeleteRemote, record.relative_path.clone())
            .with_remote_guard(remote_guard),
    }
}

/// Remote side moved away from the agreed state: pull it
fn pull_remote(record: &FileRecord) -> NewOperation {
    let local_guard = record.local_hash().cloned();
    match &record.remote {
        Some(remote) => NewOperation::new(OperationKind::Download, record.relative_path.clone())
            .with_content_hash(Some(remote.hash.clone()))
            .with_local_guard(local_guard),
        None => NewOperation::new(OperationKind::DeleteLocal, record.relative_path.clone())
            .with_local_guard(local_guard),
    }
}

/// Replaces directory deletes whose subtree still receives work with a
/// re-creation on the side the directory vanished from
fn keep_needed_directories(
    planned: &mut [Planned],
    conflicts: &[NewConflict],
    active_paths: &[&RelativePath],
) {
    let mut work: Vec<RelativePath> = planned
        .iter()
        .filter(|p| !p.op.kind.is_delete())
        .flat_map(|p| std::iter::once(p.op.relative_path.clone()).chain(p.op.destination.clone()))
        .chain(conflicts.iter().map(|c| c.relative_path.clone()))
        .chain(active_paths.iter().map(|p| (*p).clone()))
        .collect();

    let mut dir_deletes: Vec<usize> = planned
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_dir && p.op.kind.is_delete())
        .map(|(i, _)| i)
        .collect();
    // Deepest first, so a recreated child keeps its ancestors too
    dir_deletes.sort_by_key(|&i| std::cmp::Reverse(planned[i].op.relative_path.depth()));

    for i in dir_deletes {
        let path = planned[i].op.relative_path.clone();
        if !work.iter().any(|w| path.is_ancestor_of(w)) {
            continue;
        }

        let recreate = match planned[i].op.kind {
            // Local directory vanished: bring it back locally
            OperationKind::DeleteRemote => {
                NewOperation::new(OperationKind::Download, path.clone()).with_local_guard(None)
            }
            // Remote directory vanished: bring it back remotely
            _ => NewOperation::new(OperationKind::Upload, path.clone()).with_remote_guard(None),
        }
        .with_content_hash(Some(FileHash::directory()));

        debug!(path = %path, "Directory delete replaced by re-creation, subtree still has work");
        planned[i].op = recreate;
        work.push(path);
    }
}
