//! Integration tests for SqliteChangeJournal
//!
//! These tests exercise the IChangeJournal methods against an in-memory
//! SQLite database. Each test creates a fresh database for isolation.

use chrono::{Duration, Utc};

use foldsync_cache::{DatabasePool, SqliteChangeJournal};
use foldsync_core::domain::{
    ConflictKind, ConflictState, FileHash, FolderId, LocalState, NewConflict, NewFolder,
    NewOperation, OperationKind, OperationOutcome, OperationStatus, Plan, RelativePath,
    RemoteState, Resolution, SyncedFolder,
};
use foldsync_core::ports::{
    EnqueueOutcome, IChangeJournal, LocalSnapshot, RecordSeed, RemoteSnapshot, ResolutionPlan,
    ResolveOutcome, RetryOutcome,
};

// ============================================================================
// Test helpers
// ============================================================================

async fn setup() -> SqliteChangeJournal {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteChangeJournal::new(pool.pool().clone())
}

async fn setup_with_folder() -> (SqliteChangeJournal, SyncedFolder) {
    let journal = setup().await;
    let folder = journal
        .add_folder(&NewFolder::new("docs", "/home/user/Docs", "/shares/user/docs"))
        .await
        .unwrap();
    (journal, folder)
}

fn path(p: &str) -> RelativePath {
    RelativePath::new(p).unwrap()
}

fn hash(h: &str) -> FileHash {
    FileHash::new(h).unwrap()
}

fn local(h: &str) -> LocalState {
    LocalState::new(hash(h), 10, None)
}

fn remote(h: &str, version: &str) -> RemoteState {
    RemoteState::new(hash(h), version, 10, None)
}

fn local_snapshot(entries: &[(&str, &str)]) -> LocalSnapshot {
    let mut snapshot = LocalSnapshot::new(Utc::now());
    for (p, h) in entries {
        snapshot.push(path(p), false, local(h));
    }
    snapshot
}

fn remote_snapshot(entries: &[(&str, &str, &str)]) -> RemoteSnapshot {
    let mut snapshot = RemoteSnapshot::new(Utc::now());
    for (p, h, v) in entries {
        snapshot.push(path(p), false, remote(h, v));
    }
    snapshot
}

fn upload(p: &str) -> NewOperation {
    NewOperation::new(OperationKind::Upload, path(p))
}

async fn enqueue(journal: &SqliteChangeJournal, folder: FolderId, op: NewOperation) {
    match journal.enqueue_operation(folder, &op).await.unwrap() {
        EnqueueOutcome::Enqueued(_) => {}
        other => panic!("expected enqueue, got {other:?}"),
    }
}

// ============================================================================
// Folders
// ============================================================================

#[tokio::test]
async fn test_add_folder_is_idempotent_by_name() {
    let journal = setup().await;
    let new = NewFolder::new("docs", "/home/user/Docs", "/docs");
    let first = journal.add_folder(&new).await.unwrap();
    let second = journal.add_folder(&new).await.unwrap();
    assert_eq!(first.id, second.id);
    assert!(!first.paused);
    assert_eq!(journal.list_folders().await.unwrap().len(), 1);
    assert_eq!(
        journal.get_folder_by_name("docs").await.unwrap().unwrap().id,
        first.id
    );
}

#[tokio::test]
async fn test_pause_flag_reports_changes() {
    let (journal, folder) = setup_with_folder().await;
    assert!(journal.set_folder_paused(folder.id, true).await.unwrap());
    assert!(!journal.set_folder_paused(folder.id, true).await.unwrap());
    assert!(journal.get_folder(folder.id).await.unwrap().unwrap().paused);
    assert!(journal.set_folder_paused(folder.id, false).await.unwrap());
}

#[tokio::test]
async fn test_remove_folder_cascades() {
    let (journal, folder) = setup_with_folder().await;
    journal
        .apply_local_snapshot(folder.id, &local_snapshot(&[("a.txt", "aa")]))
        .await
        .unwrap();
    enqueue(&journal, folder.id, upload("a.txt")).await;

    assert!(journal.remove_folder(folder.id).await.unwrap());
    assert!(journal.get_folder(folder.id).await.unwrap().is_none());
    assert!(journal.list_records(folder.id).await.unwrap().is_empty());
    assert!(journal
        .list_operations(Some(folder.id), None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_mark_scanned() {
    let (journal, folder) = setup_with_folder().await;
    assert!(folder.last_scan_at.is_none());
    journal.mark_scanned(folder.id, Utc::now()).await.unwrap();
    assert!(journal
        .get_folder(folder.id)
        .await
        .unwrap()
        .unwrap()
        .last_scan_at
        .is_some());
}

// ============================================================================
// Snapshots
// ============================================================================

#[tokio::test]
async fn test_local_snapshot_inserts_updates_and_clears() {
    let (journal, folder) = setup_with_folder().await;

    let report = journal
        .apply_local_snapshot(folder.id, &local_snapshot(&[("a.txt", "aa"), ("b.txt", "bb")]))
        .await
        .unwrap();
    assert_eq!(report.inserted, 2);

    let report = journal
        .apply_local_snapshot(folder.id, &local_snapshot(&[("a.txt", "a2")]))
        .await
        .unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.cleared, 1);
    // b.txt is now absent on both sides and nothing refers to it
    assert_eq!(report.purged, 1);

    let records = journal.list_records(folder.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].local_hash().unwrap().as_str(), "a2");
}

#[tokio::test]
async fn test_unchanged_snapshot_is_a_noop() {
    let (journal, folder) = setup_with_folder().await;
    let snapshot = local_snapshot(&[("a.txt", "aa")]);
    journal.apply_local_snapshot(folder.id, &snapshot).await.unwrap();
    let report = journal
        .apply_local_snapshot(folder.id, &local_snapshot(&[("a.txt", "aa")]))
        .await
        .unwrap();
    assert_eq!(report, Default::default());
}

#[tokio::test]
async fn test_remote_snapshot_keeps_local_side() {
    let (journal, folder) = setup_with_folder().await;
    journal
        .apply_local_snapshot(folder.id, &local_snapshot(&[("a.txt", "aa")]))
        .await
        .unwrap();
    journal
        .apply_remote_snapshot(folder.id, &remote_snapshot(&[("a.txt", "bb", "v1")]))
        .await
        .unwrap();

    let record = journal.get_record(folder.id, &path("a.txt")).await.unwrap().unwrap();
    assert_eq!(record.local_hash().unwrap().as_str(), "aa");
    assert_eq!(record.remote_hash().unwrap().as_str(), "bb");
    assert_eq!(record.remote_version(), Some("v1"));
}

#[tokio::test]
async fn test_stale_snapshot_does_not_overwrite_newer_observation() {
    let (journal, folder) = setup_with_folder().await;
    let stale = RemoteSnapshot::new(Utc::now() - Duration::seconds(30));

    journal
        .apply_local_snapshot(folder.id, &local_snapshot(&[("a.txt", "aa")]))
        .await
        .unwrap();
    enqueue(&journal, folder.id, upload("a.txt")).await;
    let claimed = journal
        .claim_ready_operations(folder.id, Utc::now(), 10)
        .await
        .unwrap();
    journal
        .complete_operation(
            claimed[0].id,
            &OperationOutcome::Synced {
                local: local("aa"),
                remote: remote("aa", "v1"),
            },
        )
        .await
        .unwrap();

    // A listing that started before the upload completed misses the file
    let report = journal.apply_remote_snapshot(folder.id, &stale).await.unwrap();
    assert_eq!(report.skipped_stale, 1);
    assert_eq!(report.cleared, 0);

    let record = journal.get_record(folder.id, &path("a.txt")).await.unwrap().unwrap();
    assert_eq!(record.remote_version(), Some("v1"));
    assert!(record.is_in_sync());
}

// ============================================================================
// Plans and operations
// ============================================================================

#[tokio::test]
async fn test_at_most_one_active_operation_per_record() {
    let (journal, folder) = setup_with_folder().await;
    let first = journal
        .enqueue_operation(folder.id, &upload("a.txt"))
        .await
        .unwrap();
    let second = journal
        .enqueue_operation(folder.id, &upload("a.txt"))
        .await
        .unwrap();

    let EnqueueOutcome::Enqueued(id) = first else {
        panic!("first enqueue should insert");
    };
    assert_eq!(second, EnqueueOutcome::AlreadyActive(id));
}

#[tokio::test]
async fn test_apply_plan_writes_everything_once() {
    let (journal, folder) = setup_with_folder().await;
    journal
        .apply_local_snapshot(folder.id, &local_snapshot(&[("a.txt", "aa"), ("c.txt", "cc")]))
        .await
        .unwrap();
    journal
        .apply_remote_snapshot(
            folder.id,
            &remote_snapshot(&[("c.txt", "dd", "v1"), ("e.txt", "ee", "v1")]),
        )
        .await
        .unwrap();
    let c = journal.get_record(folder.id, &path("c.txt")).await.unwrap().unwrap();

    let plan = Plan {
        converged: vec![],
        operations: vec![upload("a.txt"), NewOperation::new(OperationKind::Download, path("e.txt"))],
        conflicts: vec![NewConflict::from_record(&c)],
        superseded: vec![],
    };
    let report = journal.apply_plan(folder.id, &plan).await.unwrap();
    assert_eq!(report.enqueued, 2);
    assert_eq!(report.conflicts_created, 1);

    let again = journal.apply_plan(folder.id, &plan).await.unwrap();
    assert_eq!(again.enqueued, 0);
    assert_eq!(again.already_active, 2);
    assert_eq!(again.conflicts_created, 0);

    let conflicts = journal.list_conflicts(Some(folder.id), true).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].kind, ConflictKind::Content);
    assert_eq!(conflicts[0].remote.version.as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_apply_plan_converges_and_supersedes() {
    let (journal, folder) = setup_with_folder().await;
    journal
        .apply_local_snapshot(folder.id, &local_snapshot(&[("a.txt", "aa")]))
        .await
        .unwrap();
    journal
        .apply_remote_snapshot(folder.id, &remote_snapshot(&[("a.txt", "aa", "v1")]))
        .await
        .unwrap();
    let record = journal.get_record(folder.id, &path("a.txt")).await.unwrap().unwrap();
    assert!(!record.is_in_sync());

    enqueue(&journal, folder.id, upload("b.txt")).await;
    let claimed = journal
        .claim_ready_operations(folder.id, Utc::now(), 1)
        .await
        .unwrap();
    journal
        .fail_operation(claimed[0].id, 8, "boom")
        .await
        .unwrap();

    let plan = Plan {
        converged: vec![(record.id, hash("aa"))],
        operations: vec![],
        conflicts: vec![],
        superseded: vec![claimed[0].id],
    };
    let report = journal.apply_plan(folder.id, &plan).await.unwrap();
    assert_eq!(report.converged, 1);
    assert_eq!(report.superseded, 1);

    let record = journal.get_record(folder.id, &path("a.txt")).await.unwrap().unwrap();
    assert!(record.is_in_sync());
    assert!(journal.get_operation(claimed[0].id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_claim_is_fifo_and_respects_path_order() {
    let (journal, folder) = setup_with_folder().await;
    enqueue(
        &journal,
        folder.id,
        NewOperation::new(OperationKind::Upload, path("docs")),
    )
    .await;
    enqueue(&journal, folder.id, upload("docs/a.txt")).await;
    enqueue(&journal, folder.id, upload("music.mp3")).await;

    let claimed = journal
        .claim_ready_operations(folder.id, Utc::now(), 10)
        .await
        .unwrap();
    let paths: Vec<&str> = claimed.iter().map(|o| o.relative_path.as_str()).collect();
    assert_eq!(paths, vec!["docs", "music.mp3"]);
    assert!(claimed.iter().all(|o| o.status == OperationStatus::InProgress));

    // The child becomes ready once the directory operation is gone
    journal
        .complete_operation(
            claimed[0].id,
            &OperationOutcome::Synced {
                local: LocalState::directory(None),
                remote: RemoteState::new(FileHash::directory(), "d1", 0, None),
            },
        )
        .await
        .unwrap();
    let next = journal
        .claim_ready_operations(folder.id, Utc::now(), 10)
        .await
        .unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].relative_path.as_str(), "docs/a.txt");
}

#[tokio::test]
async fn test_claim_respects_limit_backoff_and_pause() {
    let (journal, folder) = setup_with_folder().await;
    enqueue(&journal, folder.id, upload("a.txt")).await;
    enqueue(&journal, folder.id, upload("b.txt")).await;

    let claimed = journal
        .claim_ready_operations(folder.id, Utc::now(), 1)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    let later = Utc::now() + Duration::seconds(60);
    journal
        .reschedule_operation(claimed[0].id, 1, later, "timeout")
        .await
        .unwrap();
    let rescheduled = journal.get_operation(claimed[0].id).await.unwrap().unwrap();
    assert_eq!(rescheduled.status, OperationStatus::Queued);
    assert_eq!(rescheduled.retry_count, 1);
    assert_eq!(rescheduled.last_error.as_deref(), Some("timeout"));

    journal.set_folder_paused(folder.id, true).await.unwrap();
    assert!(journal
        .claim_ready_operations(folder.id, Utc::now(), 10)
        .await
        .unwrap()
        .is_empty());

    journal.set_folder_paused(folder.id, false).await.unwrap();
    let claimed = journal
        .claim_ready_operations(folder.id, Utc::now(), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].relative_path.as_str(), "b.txt");
}

#[tokio::test]
async fn test_complete_delete_purges_record() {
    let (journal, folder) = setup_with_folder().await;
    journal
        .apply_remote_snapshot(folder.id, &remote_snapshot(&[("a.txt", "aa", "v1")]))
        .await
        .unwrap();
    enqueue(
        &journal,
        folder.id,
        NewOperation::new(OperationKind::DeleteRemote, path("a.txt")),
    )
    .await;
    let claimed = journal
        .claim_ready_operations(folder.id, Utc::now(), 10)
        .await
        .unwrap();
    journal
        .complete_operation(claimed[0].id, &OperationOutcome::Deleted)
        .await
        .unwrap();

    assert!(journal.get_record(folder.id, &path("a.txt")).await.unwrap().is_none());
    assert!(journal.get_operation(claimed[0].id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_complete_move_carries_base_to_destination() {
    let (journal, folder) = setup_with_folder().await;
    journal
        .apply_local_snapshot(folder.id, &local_snapshot(&[("old.txt", "aa")]))
        .await
        .unwrap();
    journal
        .apply_remote_snapshot(folder.id, &remote_snapshot(&[("old.txt", "aa", "v1")]))
        .await
        .unwrap();
    let old = journal.get_record(folder.id, &path("old.txt")).await.unwrap().unwrap();
    journal
        .apply_plan(
            folder.id,
            &Plan {
                converged: vec![(old.id, hash("aa"))],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    enqueue(
        &journal,
        folder.id,
        NewOperation::new(OperationKind::MoveRemote, path("old.txt"))
            .with_destination(path("new.txt")),
    )
    .await;
    let claimed = journal
        .claim_ready_operations(folder.id, Utc::now(), 10)
        .await
        .unwrap();
    journal
        .complete_operation(
            claimed[0].id,
            &OperationOutcome::Moved {
                destination: path("new.txt"),
                local: Some(local("aa")),
                remote: Some(remote("aa", "v2")),
            },
        )
        .await
        .unwrap();

    assert!(journal.get_record(folder.id, &path("old.txt")).await.unwrap().is_none());
    let moved = journal.get_record(folder.id, &path("new.txt")).await.unwrap().unwrap();
    assert!(moved.is_in_sync());
    assert_eq!(moved.remote_version(), Some("v2"));
}

#[tokio::test]
async fn test_failed_operation_retry_and_recovery() {
    let (journal, folder) = setup_with_folder().await;
    enqueue(&journal, folder.id, upload("a.txt")).await;
    let claimed = journal
        .claim_ready_operations(folder.id, Utc::now(), 10)
        .await
        .unwrap();
    let id = claimed[0].id;
    journal.fail_operation(id, 8, "401 unauthorized").await.unwrap();

    let failed = journal
        .list_operations(Some(folder.id), Some(OperationStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(journal.folder_stats(folder.id).await.unwrap().failed, 1);

    assert_eq!(journal.retry_operation(id).await.unwrap(), RetryOutcome::Requeued);
    let requeued = journal.get_operation(id).await.unwrap().unwrap();
    assert_eq!(requeued.status, OperationStatus::Queued);
    assert_eq!(requeued.retry_count, 8);
    assert_eq!(
        journal.retry_operation(id).await.unwrap(),
        RetryOutcome::AlreadyActive
    );

    journal
        .claim_ready_operations(folder.id, Utc::now(), 10)
        .await
        .unwrap();
    assert_eq!(journal.recover_interrupted().await.unwrap(), 1);
    assert_eq!(
        journal.get_operation(id).await.unwrap().unwrap().status,
        OperationStatus::Queued
    );

    assert_eq!(
        journal
            .retry_operation(foldsync_core::domain::OperationId::new(999))
            .await
            .unwrap(),
        RetryOutcome::NotFound
    );
}

#[tokio::test]
async fn test_retry_of_queued_operation_keeps_retry_count() {
    let (journal, folder) = setup_with_folder().await;
    enqueue(&journal, folder.id, upload("a.txt")).await;
    let claimed = journal
        .claim_ready_operations(folder.id, Utc::now(), 10)
        .await
        .unwrap();
    let id = claimed[0].id;
    let later = Utc::now() + chrono::Duration::hours(1);
    journal
        .reschedule_operation(id, 5, later, "503 service unavailable")
        .await
        .unwrap();

    assert_eq!(
        journal.retry_operation(id).await.unwrap(),
        RetryOutcome::AlreadyActive
    );
    let op = journal.get_operation(id).await.unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::Queued);
    assert_eq!(op.retry_count, 5);
    assert!(op.next_attempt_at < later);
}

#[tokio::test]
async fn test_recovery_keeps_retry_count() {
    let (journal, folder) = setup_with_folder().await;
    enqueue(&journal, folder.id, upload("a.txt")).await;
    let claimed = journal
        .claim_ready_operations(folder.id, Utc::now(), 10)
        .await
        .unwrap();
    let id = claimed[0].id;
    journal
        .reschedule_operation(id, 3, Utc::now(), "connection reset")
        .await
        .unwrap();

    // Claimed again, then the process dies mid-transfer
    let reclaimed = journal
        .claim_ready_operations(folder.id, Utc::now() + chrono::Duration::seconds(1), 10)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].retry_count, 3);

    assert_eq!(journal.recover_interrupted().await.unwrap(), 1);
    let recovered = journal.get_operation(id).await.unwrap().unwrap();
    assert_eq!(recovered.status, OperationStatus::Queued);
    assert_eq!(recovered.retry_count, 3);
}

#[tokio::test]
async fn test_abandon_removes_operation() {
    let (journal, folder) = setup_with_folder().await;
    enqueue(&journal, folder.id, upload("a.txt")).await;
    let claimed = journal
        .claim_ready_operations(folder.id, Utc::now(), 10)
        .await
        .unwrap();
    journal
        .abandon_operation(claimed[0].id, "remote version changed")
        .await
        .unwrap();
    assert!(journal.get_operation(claimed[0].id).await.unwrap().is_none());
    assert_eq!(journal.folder_stats(folder.id).await.unwrap(), Default::default());
}

// ============================================================================
// Conflicts
// ============================================================================

async fn conflicted(journal: &SqliteChangeJournal, folder: FolderId) -> foldsync_core::domain::Conflict {
    journal
        .apply_local_snapshot(folder, &local_snapshot(&[("a.txt", "aa")]))
        .await
        .unwrap();
    journal
        .apply_remote_snapshot(folder, &remote_snapshot(&[("a.txt", "bb", "v2")]))
        .await
        .unwrap();
    let record = journal.get_record(folder, &path("a.txt")).await.unwrap().unwrap();
    journal
        .apply_plan(
            folder,
            &Plan {
                conflicts: vec![NewConflict::from_record(&record)],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    journal
        .list_conflicts(Some(folder), true)
        .await
        .unwrap()
        .remove(0)
}

#[tokio::test]
async fn test_resolve_conflict_once() {
    let (journal, folder) = setup_with_folder().await;
    let conflict = conflicted(&journal, folder.id).await;
    assert_eq!(journal.folder_stats(folder.id).await.unwrap().conflicts, 1);

    let plan = ResolutionPlan {
        resolution: Resolution::KeepLocal,
        records: vec![],
        operations: vec![upload("a.txt").with_remote_guard(Some("v2".into()))],
    };
    assert_eq!(
        journal.resolve_conflict(conflict.id, &plan).await.unwrap(),
        ResolveOutcome::Applied
    );
    assert_eq!(
        journal.resolve_conflict(conflict.id, &plan).await.unwrap(),
        ResolveOutcome::AlreadyResolved
    );

    let ops = journal.list_operations(Some(folder.id), None).await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].remote_guard.as_deref(), Some("v2"));

    let stored = journal.get_conflict(conflict.id).await.unwrap().unwrap();
    assert_eq!(stored.state, ConflictState::KeepLocal);
    assert!(stored.resolved_at.is_some());
    assert!(journal.list_conflicts(Some(folder.id), true).await.unwrap().is_empty());
    assert_eq!(journal.list_conflicts(None, false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_resolve_keep_both_seeds_new_record() {
    let (journal, folder) = setup_with_folder().await;
    let conflict = conflicted(&journal, folder.id).await;
    let copy = path("a (conflicted copy).txt");

    let plan = ResolutionPlan {
        resolution: Resolution::KeepBoth,
        records: vec![
            RecordSeed {
                path: copy.clone(),
                is_dir: false,
                local: Some(local("aa")),
            },
            RecordSeed {
                path: path("a.txt"),
                is_dir: false,
                local: None,
            },
        ],
        operations: vec![
            NewOperation::new(OperationKind::Upload, copy.clone()),
            NewOperation::new(OperationKind::Download, path("a.txt")),
        ],
    };
    journal.resolve_conflict(conflict.id, &plan).await.unwrap();

    let seeded = journal.get_record(folder.id, &copy).await.unwrap().unwrap();
    assert_eq!(seeded.local_hash().unwrap().as_str(), "aa");
    let original = journal.get_record(folder.id, &path("a.txt")).await.unwrap().unwrap();
    assert!(original.local.is_none());
    assert_eq!(journal.folder_stats(folder.id).await.unwrap().pending, 2);
}

#[tokio::test]
async fn test_resolve_unknown_conflict() {
    let journal = setup().await;
    let plan = ResolutionPlan {
        resolution: Resolution::KeepRemote,
        records: vec![],
        operations: vec![],
    };
    assert_eq!(
        journal
            .resolve_conflict(foldsync_core::domain::ConflictId::new(42), &plan)
            .await
            .unwrap(),
        ResolveOutcome::NotFound
    );
}

#[tokio::test]
async fn test_prune_resolved_conflicts() {
    let (journal, folder) = setup_with_folder().await;
    let conflict = conflicted(&journal, folder.id).await;

    // Pending conflicts are never pruned
    assert_eq!(
        journal
            .prune_resolved_conflicts(Utc::now() + Duration::days(1))
            .await
            .unwrap(),
        0
    );

    let plan = ResolutionPlan {
        resolution: Resolution::KeepRemote,
        records: vec![],
        operations: vec![],
    };
    journal.resolve_conflict(conflict.id, &plan).await.unwrap();
    assert_eq!(
        journal
            .prune_resolved_conflicts(Utc::now() - Duration::days(1))
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        journal
            .prune_resolved_conflicts(Utc::now() + Duration::days(1))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_conflicted_record_is_not_purged() {
    let (journal, folder) = setup_with_folder().await;
    let conflict = conflicted(&journal, folder.id).await;

    journal
        .apply_local_snapshot(folder.id, &LocalSnapshot::new(Utc::now()))
        .await
        .unwrap();
    journal
        .apply_remote_snapshot(folder.id, &RemoteSnapshot::new(Utc::now()))
        .await
        .unwrap();

    assert!(journal
        .get_record(folder.id, &conflict.relative_path)
        .await
        .unwrap()
        .is_some());
}
