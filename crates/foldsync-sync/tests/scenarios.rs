//! End-to-end reconciliation scenarios
//!
//! Each test runs the real scanners, planner, executor and SQLite journal
//! against a temporary local directory and an in-memory remote store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use foldsync_cache::{DatabasePool, SqliteChangeJournal};
use foldsync_conflict::ConflictResolver;
use foldsync_core::config::SyncConfig;
use foldsync_core::domain::{
    FailureClass, NewFolder, OperationStatus, RelativePath, Resolution, SyncEvent, SyncedFolder,
    TransferError,
};
use foldsync_core::ports::{
    IChangeJournal, IRemoteStore, RemoteEntry, ResolveOutcome, RetryOutcome,
};
use foldsync_sync::engine::EngineSettings;
use foldsync_sync::executor::DrainReport;
use foldsync_sync::filesystem::hash_bytes;
use foldsync_sync::{
    FolderEngine, LocalFileSystemAdapter, RetryPolicy, SyncRegistry, TransferExecutor,
};

const REMOTE_ROOT: &str = "/shares/alice/docs";

// ============================================================================
// In-memory remote store
// ============================================================================

#[derive(Clone)]
struct Item {
    /// `None` for directories
    data: Option<Vec<u8>>,
    version: String,
}

#[derive(Default)]
struct RemoteTree {
    items: BTreeMap<String, Item>,
    next_version: u64,
    failing_uploads: Vec<TransferError>,
    corrupt_downloads: bool,
    /// Paths whose metadata lookup reports nothing, as if deleted after listing
    unstattable: Vec<String>,
    /// Downloads write half their content and then hang
    stall_downloads: bool,
    uploads: usize,
}

impl RemoteTree {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        format!("v{}", self.next_version)
    }

    fn check_version(&self, path: &str, expected: Option<&str>) -> Result<(), TransferError> {
        let current = self.items.get(path).map(|i| i.version.as_str());
        if current == expected {
            Ok(())
        } else {
            Err(TransferError::VersionMismatch(format!(
                "{path}: expected {expected:?}, found {current:?}"
            )))
        }
    }

    fn entry(&self, path: &str) -> Option<RemoteEntry> {
        let item = self.items.get(path)?;
        Some(RemoteEntry {
            path: path.to_string(),
            hash: item
                .data
                .as_ref()
                .map(|d| hash_bytes(d).unwrap().as_str().to_string()),
            size: item.data.as_ref().map_or(0, |d| d.len() as u64),
            version: item.version.clone(),
            mtime: None,
            is_dir: item.data.is_none(),
        })
    }
}

#[derive(Default)]
struct MemoryRemote {
    tree: Mutex<RemoteTree>,
}

impl MemoryRemote {
    fn full(path: &str) -> String {
        format!("{REMOTE_ROOT}/{path}")
    }

    /// Stores a file, creating missing parent directories like the server does
    fn put(&self, path: &str, data: &[u8]) {
        let mut tree = self.tree.lock().unwrap();
        let parts: Vec<&str> = path.split('/').collect();
        for depth in 1..parts.len() {
            let parent = Self::full(&parts[..depth].join("/"));
            if !tree.items.contains_key(&parent) {
                let version = tree.bump();
                tree.items.insert(parent, Item { data: None, version });
            }
        }
        let version = tree.bump();
        tree.items.insert(
            Self::full(path),
            Item {
                data: Some(data.to_vec()),
                version,
            },
        );
    }

    fn remove(&self, path: &str) {
        self.tree.lock().unwrap().items.remove(&Self::full(path));
    }

    fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.tree
            .lock()
            .unwrap()
            .items
            .get(&Self::full(path))
            .and_then(|i| i.data.clone())
    }

    fn is_dir(&self, path: &str) -> bool {
        self.tree
            .lock()
            .unwrap()
            .items
            .get(&Self::full(path))
            .is_some_and(|i| i.data.is_none())
    }

    fn fail_uploads(&self, errors: Vec<TransferError>) {
        self.tree.lock().unwrap().failing_uploads = errors;
    }

    fn corrupt_downloads(&self, corrupt: bool) {
        self.tree.lock().unwrap().corrupt_downloads = corrupt;
    }

    fn vanish_on_stat(&self, path: &str) {
        self.tree.lock().unwrap().unstattable.push(Self::full(path));
    }

    fn stall_downloads(&self, stall: bool) {
        self.tree.lock().unwrap().stall_downloads = stall;
    }

    fn uploads(&self) -> usize {
        self.tree.lock().unwrap().uploads
    }
}

#[async_trait::async_trait]
impl IRemoteStore for MemoryRemote {
    async fn list(&self, root: &str) -> anyhow::Result<Vec<RemoteEntry>> {
        let tree = self.tree.lock().unwrap();
        let prefix = format!("{}/", root.trim_end_matches('/'));
        Ok(tree
            .items
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .filter_map(|p| tree.entry(p))
            .collect())
    }

    async fn stat(&self, path: &str) -> anyhow::Result<Option<RemoteEntry>> {
        let tree = self.tree.lock().unwrap();
        if tree.unstattable.iter().any(|p| p == path) {
            return Ok(None);
        }
        Ok(tree.entry(path))
    }

    async fn download(&self, path: &str, dest: &Path) -> anyhow::Result<u64> {
        let (mut data, corrupt, stall) = {
            let tree = self.tree.lock().unwrap();
            let data = tree
                .items
                .get(path)
                .and_then(|i| i.data.clone())
                .ok_or_else(|| TransferError::NotFound(path.to_string()))?;
            (data, tree.corrupt_downloads, tree.stall_downloads)
        };
        if stall {
            tokio::fs::write(dest, &data[..data.len() / 2]).await?;
            std::future::pending::<()>().await;
        }
        if corrupt {
            data.push(b'!');
        }
        tokio::fs::write(dest, &data).await?;
        Ok(data.len() as u64)
    }

    async fn upload(
        &self,
        path: &str,
        source: &Path,
        expected_version: Option<&str>,
    ) -> anyhow::Result<RemoteEntry> {
        let data = tokio::fs::read(source).await?;
        let mut tree = self.tree.lock().unwrap();
        if !tree.failing_uploads.is_empty() {
            let err = tree.failing_uploads.remove(0);
            return Err(err.into());
        }
        tree.check_version(path, expected_version)?;
        let version = tree.bump();
        tree.uploads += 1;
        tree.items.insert(
            path.to_string(),
            Item {
                data: Some(data),
                version,
            },
        );
        Ok(tree.entry(path).unwrap())
    }

    async fn create_dir(&self, path: &str) -> anyhow::Result<RemoteEntry> {
        let mut tree = self.tree.lock().unwrap();
        if !tree.items.contains_key(path) {
            let version = tree.bump();
            tree.items.insert(
                path.to_string(),
                Item {
                    data: None,
                    version,
                },
            );
        }
        Ok(tree.entry(path).unwrap())
    }

    async fn delete(&self, path: &str, expected_version: Option<&str>) -> anyhow::Result<()> {
        let mut tree = self.tree.lock().unwrap();
        if !tree.items.contains_key(path) {
            return Err(TransferError::NotFound(path.to_string()).into());
        }
        tree.check_version(path, expected_version)?;
        let prefix = format!("{path}/");
        if tree.items.keys().any(|p| p.starts_with(&prefix)) {
            return Err(TransferError::DirectoryNotEmpty(path.to_string()).into());
        }
        tree.items.remove(path);
        Ok(())
    }

    async fn rename(
        &self,
        from: &str,
        to: &str,
        expected_version: Option<&str>,
    ) -> anyhow::Result<RemoteEntry> {
        let mut tree = self.tree.lock().unwrap();
        tree.check_version(from, expected_version)?;
        if tree.items.contains_key(to) {
            return Err(TransferError::VersionMismatch(format!("{to} exists")).into());
        }
        let mut item = tree
            .items
            .remove(from)
            .ok_or_else(|| TransferError::NotFound(from.to_string()))?;
        item.version = tree.bump();
        tree.items.insert(to.to_string(), item);
        Ok(tree.entry(to).unwrap())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    _dir: TempDir,
    root: PathBuf,
    folder: SyncedFolder,
    db: sqlx::SqlitePool,
    journal: Arc<SqliteChangeJournal>,
    local_filesystem: Arc<LocalFileSystemAdapter>,
    remote: Arc<MemoryRemote>,
    registry: Arc<SyncRegistry>,
    engine: Arc<FolderEngine>,
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_millis(1),
        1.0,
        0.0,
        max_attempts,
        Duration::from_millis(1),
    )
}

async fn harness() -> Harness {
    harness_with(fast_retry(3)).await
}

async fn harness_with(retry: RetryPolicy) -> Harness {
    harness_with_timeout(retry, Duration::from_secs(10)).await
}

async fn harness_with_timeout(retry: RetryPolicy, operation_timeout: Duration) -> Harness {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("Docs");
    std::fs::create_dir_all(&root).unwrap();

    let pool = DatabasePool::in_memory().await.unwrap();
    let journal = Arc::new(SqliteChangeJournal::new(pool.pool().clone()));
    let folder = journal
        .add_folder(&NewFolder::new("docs", &root, REMOTE_ROOT))
        .await
        .unwrap();

    let local_filesystem = Arc::new(LocalFileSystemAdapter::new());
    let remote = Arc::new(MemoryRemote::default());
    let registry = Arc::new(SyncRegistry::new());

    let executor = Arc::new(TransferExecutor::new(
        journal.clone(),
        local_filesystem.clone(),
        remote.clone(),
        registry.clone(),
        retry,
        operation_timeout,
        2,
    ));
    let settings = EngineSettings {
        scan_interval: Duration::from_secs(60),
        debounce: Duration::from_millis(20),
        ignore_patterns: SyncConfig::default().ignore_patterns,
    };
    let engine = FolderEngine::new(
        folder.clone(),
        journal.clone(),
        local_filesystem.clone(),
        remote.clone(),
        executor,
        registry.clone(),
        settings,
    )
    .await
    .unwrap();

    Harness {
        _dir: dir,
        root,
        folder,
        db: pool.pool().clone(),
        journal,
        local_filesystem,
        remote,
        registry,
        engine: Arc::new(engine),
    }
}

impl Harness {
    fn write(&self, path: &str, data: &[u8]) {
        let full = self.root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, data).unwrap();
    }

    fn read(&self, path: &str) -> Option<Vec<u8>> {
        std::fs::read(self.root.join(path)).ok()
    }

    fn local_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    async fn operations(&self, status: OperationStatus) -> usize {
        self.journal
            .list_operations(Some(self.folder.id), Some(status))
            .await
            .unwrap()
            .len()
    }

    async fn pending_conflicts(&self) -> usize {
        self.journal
            .list_conflicts(Some(self.folder.id), true)
            .await
            .unwrap()
            .len()
    }
}

/// Runs passes until no queued or in-progress work is left
async fn sync_until_idle(h: &Harness) -> DrainReport {
    let mut total = DrainReport::default();
    for _ in 0..50 {
        let report = h.engine.sync_once().await.unwrap();
        total.completed += report.completed;
        total.rescheduled += report.rescheduled;
        total.failed += report.failed;
        total.abandoned += report.abandoned;
        if h.operations(OperationStatus::Queued).await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    total
}

fn path(p: &str) -> RelativePath {
    RelativePath::new(p).unwrap()
}

// ============================================================================
// Basic propagation
// ============================================================================

#[tokio::test]
async fn test_new_local_file_is_uploaded_and_recorded() {
    let h = harness().await;
    h.write("a.txt", b"hello");

    let report = h.engine.sync_once().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(h.remote.content("a.txt").unwrap(), b"hello");

    let record = h
        .journal
        .get_record(h.folder.id, &path("a.txt"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.last_synced_hash, Some(hash_bytes(b"hello").unwrap()));
    assert!(record.is_in_sync());
}

#[tokio::test]
async fn test_new_remote_file_is_downloaded() {
    let h = harness().await;
    h.remote.put("notes/b.txt", b"from the server");

    let report = h.engine.sync_once().await.unwrap();
    assert_eq!(report.completed, 2, "directory then file");
    assert_eq!(h.read("notes/b.txt").unwrap(), b"from the server");
    assert!(h.root.join("notes").is_dir());
}

#[tokio::test]
async fn test_local_directory_tree_is_created_remotely() {
    let h = harness().await;
    h.write("projects/2026/plan.md", b"# plan");

    h.engine.sync_once().await.unwrap();
    assert!(h.remote.is_dir("projects"));
    assert!(h.remote.is_dir("projects/2026"));
    assert_eq!(h.remote.content("projects/2026/plan.md").unwrap(), b"# plan");
}

#[tokio::test]
async fn test_local_edit_produces_exactly_one_upload() {
    let h = harness().await;
    h.write("a.txt", b"first");
    h.engine.sync_once().await.unwrap();
    let uploads = h.remote.uploads();

    h.write("a.txt", b"second version");
    let report = h.engine.sync_once().await.unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(h.remote.uploads(), uploads + 1);
    assert_eq!(h.remote.content("a.txt").unwrap(), b"second version");
    let record = h
        .journal
        .get_record(h.folder.id, &path("a.txt"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        record.last_synced_hash,
        Some(hash_bytes(b"second version").unwrap())
    );
}

#[tokio::test]
async fn test_replanning_a_synced_folder_does_nothing() {
    let h = harness().await;
    h.write("a.txt", b"one");
    h.remote.put("b.txt", b"two");
    h.engine.sync_once().await.unwrap();

    for _ in 0..3 {
        let report = h.engine.sync_once().await.unwrap();
        assert_eq!(report.total(), 0);
    }
    assert_eq!(h.operations(OperationStatus::Queued).await, 0);
    assert_eq!(h.remote.uploads(), 1);
}

#[tokio::test]
async fn test_remote_deletion_removes_local_file() {
    let h = harness().await;
    h.write("a.txt", b"doomed");
    h.engine.sync_once().await.unwrap();

    h.remote.remove("a.txt");
    let report = h.engine.sync_once().await.unwrap();
    assert_eq!(report.completed, 1);
    assert!(h.read("a.txt").is_none());
}

#[tokio::test]
async fn test_local_deletion_removes_remote_file() {
    let h = harness().await;
    h.write("a.txt", b"doomed");
    h.engine.sync_once().await.unwrap();

    std::fs::remove_file(h.root.join("a.txt")).unwrap();
    h.engine.sync_once().await.unwrap();
    assert!(h.remote.content("a.txt").is_none());
}

#[tokio::test]
async fn test_local_rename_replayed_as_remote_move() {
    let h = harness().await;
    h.write("a.txt", b"moving content");
    h.engine.sync_once().await.unwrap();
    let uploads = h.remote.uploads();

    std::fs::rename(h.root.join("a.txt"), h.root.join("b.txt")).unwrap();
    let report = h.engine.sync_once().await.unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(h.remote.uploads(), uploads, "no content re-uploaded");
    assert!(h.remote.content("a.txt").is_none());
    assert_eq!(h.remote.content("b.txt").unwrap(), b"moving content");

    let report = h.engine.sync_once().await.unwrap();
    assert_eq!(report.total(), 0);
}

// ============================================================================
// Conflicts
// ============================================================================

#[tokio::test]
async fn test_concurrent_edits_create_one_conflict_and_keep_both() {
    let h = harness().await;
    h.write("report.txt", b"original");
    h.engine.sync_once().await.unwrap();

    h.write("report.txt", b"local edit");
    h.remote.put("report.txt", b"remote edit!");

    let report = h.engine.sync_once().await.unwrap();
    assert_eq!(report.total(), 0);
    assert_eq!(h.pending_conflicts().await, 1);

    // Re-planning must not duplicate the conflict
    h.engine.sync_once().await.unwrap();
    assert_eq!(h.pending_conflicts().await, 1);

    let resolver = ConflictResolver::new(h.journal.clone(), h.local_filesystem.clone());
    let conflict = resolver
        .list_pending(Some(h.folder.id))
        .await
        .unwrap()
        .remove(0);
    let outcome = resolver
        .resolve(conflict.id, Resolution::KeepBoth)
        .await
        .unwrap();
    assert_eq!(outcome, ResolveOutcome::Applied);
    assert_eq!(h.operations(OperationStatus::Queued).await, 2);

    let report = h.engine.sync_once().await.unwrap();
    assert_eq!(report.completed, 2);
    assert_eq!(h.pending_conflicts().await, 0);

    assert_eq!(h.read("report.txt").unwrap(), b"remote edit!");
    let names = h.local_names();
    assert_eq!(names.len(), 2);
    let copy = names
        .iter()
        .find(|n| n.contains("conflicted copy"))
        .expect("conflict copy exists");
    assert_eq!(h.read(copy).unwrap(), b"local edit");
    assert_eq!(h.remote.content(copy).unwrap(), b"local edit");

    let report = h.engine.sync_once().await.unwrap();
    assert_eq!(report.total(), 0);
}

#[tokio::test]
async fn test_keep_both_moves_copy_back_when_journal_rejects_resolution() {
    let h = harness().await;
    h.write("report.txt", b"original");
    h.engine.sync_once().await.unwrap();
    h.write("report.txt", b"local edit");
    h.remote.put("report.txt", b"remote edit!");
    h.engine.sync_once().await.unwrap();
    assert_eq!(h.pending_conflicts().await, 1);

    sqlx::query(
        "CREATE TRIGGER reject_resolution BEFORE UPDATE ON conflicts \
         BEGIN SELECT RAISE(ABORT, 'journal unavailable'); END",
    )
    .execute(&h.db)
    .await
    .unwrap();

    let resolver = ConflictResolver::new(h.journal.clone(), h.local_filesystem.clone());
    let conflict = resolver
        .list_pending(Some(h.folder.id))
        .await
        .unwrap()
        .remove(0);
    assert!(resolver
        .resolve(conflict.id, Resolution::KeepBoth)
        .await
        .is_err());

    assert_eq!(h.local_names(), vec!["report.txt".to_string()]);
    assert_eq!(h.read("report.txt").unwrap(), b"local edit");
    assert_eq!(h.pending_conflicts().await, 1);
    assert_eq!(h.operations(OperationStatus::Queued).await, 0);
}

#[tokio::test]
async fn test_local_scan_before_remote_scan_records_one_conflict() {
    let h = harness().await;
    h.write("report.txt", b"original");
    h.engine.sync_once().await.unwrap();

    h.write("report.txt", b"local edit");
    h.remote.put("report.txt", b"remote edit!");

    h.engine.scan_local().await.unwrap();
    h.engine.scan_remote().await.unwrap();
    h.engine.plan().await.unwrap();

    assert_eq!(h.pending_conflicts().await, 1);
    assert_eq!(h.operations(OperationStatus::Queued).await, 0);
    assert_eq!(h.read("report.txt").unwrap(), b"local edit");
    assert_eq!(h.remote.content("report.txt").unwrap(), b"remote edit!");
}

#[tokio::test]
async fn test_keep_local_overwrites_remote() {
    let h = harness().await;
    h.write("a.txt", b"base");
    h.engine.sync_once().await.unwrap();
    h.write("a.txt", b"mine, longer");
    h.remote.put("a.txt", b"theirs");
    h.engine.sync_once().await.unwrap();

    let resolver = ConflictResolver::new(h.journal.clone(), h.local_filesystem.clone());
    let conflict = resolver
        .list_pending(Some(h.folder.id))
        .await
        .unwrap()
        .remove(0);
    resolver
        .resolve(conflict.id, Resolution::KeepLocal)
        .await
        .unwrap();

    h.engine.sync_once().await.unwrap();
    assert_eq!(h.remote.content("a.txt").unwrap(), b"mine, longer");
    assert_eq!(h.pending_conflicts().await, 0);
}

#[tokio::test]
async fn test_local_file_appearing_before_download_is_not_overwritten() {
    let h = harness().await;
    h.remote.put("a.txt", b"server copy");
    h.engine.scan_remote().await.unwrap();
    h.engine.scan_local().await.unwrap();
    h.engine.plan().await.unwrap();

    h.write("a.txt", b"written meanwhile");
    let report = h.engine.sync_once().await.unwrap();

    assert_eq!(report.abandoned, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(h.read("a.txt").unwrap(), b"written meanwhile");

    // The next pass sees both sides and records the divergence
    h.engine.sync_once().await.unwrap();
    assert_eq!(h.pending_conflicts().await, 1);
    assert_eq!(h.read("a.txt").unwrap(), b"written meanwhile");
}

// ============================================================================
// Failures and retries
// ============================================================================

#[tokio::test]
async fn test_corrupted_download_fails_without_touching_local_file() {
    let h = harness().await;
    h.remote.put("a.txt", b"payload");
    h.remote.corrupt_downloads(true);

    let mut events = h.registry.subscribe();
    let report = h.engine.sync_once().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(h.operations(OperationStatus::Failed).await, 1);
    assert!(h.read("a.txt").is_none());
    assert_eq!(h.local_names(), Vec::<String>::new(), "no partial file left");

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::OperationFailed { class, .. } = event {
            assert_eq!(class, FailureClass::Permanent);
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn test_download_of_vanished_remote_file_fails_permanently() {
    let h = harness().await;
    h.remote.put("a.txt", b"listed then deleted");
    h.remote.vanish_on_stat("a.txt");

    let mut events = h.registry.subscribe();
    let report = h.engine.sync_once().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.abandoned, 0);
    assert_eq!(h.operations(OperationStatus::Failed).await, 1);
    assert!(h.read("a.txt").is_none());

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::OperationFailed { class, .. } = event {
            assert_eq!(class, FailureClass::Permanent);
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn test_timed_out_download_leaves_no_partial_file() {
    let slow_retry = RetryPolicy::new(
        Duration::from_secs(60),
        1.0,
        0.0,
        3,
        Duration::from_secs(60),
    );
    let h = harness_with_timeout(slow_retry, Duration::from_millis(200)).await;
    h.remote.put("a.txt", b"this transfer never finishes");
    h.remote.stall_downloads(true);

    let report = h.engine.sync_once().await.unwrap();

    assert_eq!(report.rescheduled, 1);
    assert!(h.read("a.txt").is_none());
    assert_eq!(h.local_names(), Vec::<String>::new(), "no partial file left");
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let h = harness().await;
    h.write("a.txt", b"flaky");
    h.remote.fail_uploads(vec![TransferError::Server {
        status: 503,
        message: "unavailable".into(),
    }]);

    let report = sync_until_idle(&h).await;
    assert_eq!(report.rescheduled, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(h.remote.content("a.txt").unwrap(), b"flaky");
}

#[tokio::test]
async fn test_retries_exhausted_marks_failed_then_manual_retry_succeeds() {
    let h = harness_with(fast_retry(3)).await;
    h.write("a.txt", b"stubborn");
    h.remote.fail_uploads(vec![
        TransferError::Connection("reset".into()),
        TransferError::Timeout("slow".into()),
        TransferError::RateLimited {
            retry_after_secs: None,
        },
    ]);

    let report = sync_until_idle(&h).await;
    assert_eq!(report.rescheduled, 2);
    assert_eq!(report.failed, 1);

    let failed = h
        .journal
        .list_operations(Some(h.folder.id), Some(OperationStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 3);
    assert!(failed[0].last_error.is_some());

    // Failed work is not re-planned on its own
    let report = h.engine.sync_once().await.unwrap();
    assert_eq!(report.total(), 0);

    assert_eq!(
        h.journal.retry_operation(failed[0].id).await.unwrap(),
        RetryOutcome::Requeued
    );
    let report = h.engine.sync_once().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(h.remote.content("a.txt").unwrap(), b"stubborn");
}

#[tokio::test]
async fn test_interrupted_operation_is_recovered() {
    let h = harness().await;
    h.write("a.txt", b"survives a crash");
    h.engine.scan_remote().await.unwrap();
    h.engine.scan_local().await.unwrap();
    h.engine.plan().await.unwrap();

    // Claimed by a process that then died
    let claimed = h
        .journal
        .claim_ready_operations(h.folder.id, Utc::now(), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(h.operations(OperationStatus::InProgress).await, 1);

    assert_eq!(h.journal.recover_interrupted().await.unwrap(), 1);
    let report = h.engine.sync_once().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(h.remote.uploads(), 1);
}

#[tokio::test]
async fn test_paused_folder_executes_nothing() {
    let h = harness().await;
    h.write("a.txt", b"waiting");
    h.journal.set_folder_paused(h.folder.id, true).await.unwrap();

    let report = h.engine.sync_once().await.unwrap();
    assert_eq!(report.total(), 0);
    assert_eq!(h.operations(OperationStatus::Queued).await, 1);

    h.journal.set_folder_paused(h.folder.id, false).await.unwrap();
    let report = h.engine.sync_once().await.unwrap();
    assert_eq!(report.completed, 1);
}

// ============================================================================
// Running engine
// ============================================================================

#[tokio::test]
async fn test_running_engine_syncs_and_stops_on_cancel() {
    let h = harness().await;
    h.write("a.txt", b"background");
    h.remote.put("b.txt", b"remote side");

    let cancel = CancellationToken::new();
    let task = tokio::spawn(Arc::clone(&h.engine).run(cancel.clone()));

    let synced = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if h.remote.content("a.txt").is_some() && h.read("b.txt").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(synced.is_ok(), "engine did not converge");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("engine stops after cancel")
        .unwrap();
}
