//! SQLite implementation of IChangeJournal
//!
//! This module provides the concrete SQLite-based implementation of the
//! change journal port defined in foldsync-core. Every read-modify-write
//! runs inside one transaction, and write transactions are serialized
//! in-process so SQLite never has to upgrade two deferred transactions at
//! once.
//!
//! ## Type Mapping
//!
//! | Domain Type                      | SQL Type | Strategy                                   |
//! |----------------------------------|----------|--------------------------------------------|
//! | FolderId, RecordId, OperationId  | INTEGER  | rowid via `.get()` / `new()`               |
//! | RelativePath                     | TEXT     | String via `.as_str()` / `RelativePath::new()` |
//! | FileHash                         | TEXT     | String via `.as_str()` / `FileHash::new()` |
//! | DateTime<Utc>                    | TEXT     | RFC 3339, microseconds, `Z` suffix         |
//! | OperationKind, OperationStatus   | TEXT     | `.as_str()` / `FromStr`                    |
//! | ConflictKind, ConflictState      | TEXT     | `.as_str()` / `FromStr`                    |
//! | Absent side of a record          | NULL     | `local_hash` / `remote_hash` is NULL       |

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use foldsync_core::domain::{
    Conflict, ConflictId, ConflictKind, ConflictState, FileHash, FileRecord, FolderId,
    FolderStats, LocalState, NewFolder, NewOperation, OperationId, OperationKind,
    OperationOutcome, OperationStatus, PendingOperation, Plan, PlanReport, RecordId,
    RelativePath, RemoteState, SyncedFolder, VersionInfo,
};
use foldsync_core::ports::{
    EnqueueOutcome, IChangeJournal, LocalSnapshot, ObservationReport, RemoteSnapshot,
    ResolutionPlan, ResolveOutcome, RetryOutcome,
};

use crate::{CacheError, StorageResultExt};

/// SQLite-based implementation of the change journal port
pub struct SqliteChangeJournal {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteChangeJournal {
    /// Creates a new journal with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Fixed-width timestamp so string order is time order
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn opt_ts(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(ts)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CacheError::SerializationError(format!("Invalid datetime '{}': {}", s, e)))
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    s.as_deref().map(parse_datetime).transpose()
}

fn parse_optional_hash(s: Option<String>) -> Result<Option<FileHash>, CacheError> {
    Ok(s.map(FileHash::new).transpose()?)
}

fn parse_optional_path(s: Option<String>) -> Result<Option<RelativePath>, CacheError> {
    Ok(s.map(RelativePath::new).transpose()?)
}

fn size_to_db(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn size_from_db(size: Option<i64>) -> u64 {
    size.map(|s| u64::try_from(s).unwrap_or(0)).unwrap_or(0)
}

fn folder_from_row(row: &SqliteRow) -> Result<SyncedFolder, CacheError> {
    let local_root: String = row.try_get("local_root")?;
    Ok(SyncedFolder {
        id: FolderId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        local_root: PathBuf::from(local_root),
        remote_root: row.try_get("remote_root")?,
        paused: row.try_get::<i64, _>("paused")? != 0,
        created_at: parse_datetime(&row.try_get::<String, _>("created_at")?)?,
        last_scan_at: parse_optional_datetime(row.try_get("last_scan_at")?)?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<FileRecord, CacheError> {
    let local = match parse_optional_hash(row.try_get("local_hash")?)? {
        Some(hash) => Some(LocalState {
            hash,
            size: size_from_db(row.try_get("local_size")?),
            mtime: parse_optional_datetime(row.try_get("local_mtime")?)?,
        }),
        None => None,
    };
    let remote = match parse_optional_hash(row.try_get("remote_hash")?)? {
        Some(hash) => Some(RemoteState {
            hash,
            version: row
                .try_get::<Option<String>, _>("remote_version")?
                .unwrap_or_default(),
            size: size_from_db(row.try_get("remote_size")?),
            mtime: parse_optional_datetime(row.try_get("remote_mtime")?)?,
        }),
        None => None,
    };

    Ok(FileRecord {
        id: RecordId::new(row.try_get("id")?),
        folder_id: FolderId::new(row.try_get("folder_id")?),
        relative_path: RelativePath::new(row.try_get::<String, _>("relative_path")?)?,
        is_dir: row.try_get::<i64, _>("is_dir")? != 0,
        local,
        local_observed_at: parse_optional_datetime(row.try_get("local_observed_at")?)?,
        remote,
        remote_observed_at: parse_optional_datetime(row.try_get("remote_observed_at")?)?,
        last_synced_hash: parse_optional_hash(row.try_get("last_synced_hash")?)?,
        last_synced_at: parse_optional_datetime(row.try_get("last_synced_at")?)?,
        updated_at: parse_datetime(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn operation_from_row(row: &SqliteRow) -> Result<PendingOperation, CacheError> {
    Ok(PendingOperation {
        id: OperationId::new(row.try_get("id")?),
        folder_id: FolderId::new(row.try_get("folder_id")?),
        record_id: RecordId::new(row.try_get("record_id")?),
        kind: OperationKind::from_str(&row.try_get::<String, _>("kind")?)?,
        status: OperationStatus::from_str(&row.try_get::<String, _>("status")?)?,
        relative_path: RelativePath::new(row.try_get::<String, _>("relative_path")?)?,
        destination: parse_optional_path(row.try_get("destination")?)?,
        content_hash: parse_optional_hash(row.try_get("content_hash")?)?,
        local_guard: parse_optional_hash(row.try_get("local_guard")?)?,
        remote_guard: row.try_get("remote_guard")?,
        retry_count: u32::try_from(row.try_get::<i64, _>("retry_count")?).unwrap_or(u32::MAX),
        last_error: row.try_get("last_error")?,
        created_at: parse_datetime(&row.try_get::<String, _>("created_at")?)?,
        next_attempt_at: parse_datetime(&row.try_get::<String, _>("next_attempt_at")?)?,
        updated_at: parse_datetime(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn version_from_row(row: &SqliteRow, side: &str) -> Result<VersionInfo, CacheError> {
    let size: Option<i64> = row.try_get(format!("{side}_size").as_str())?;
    let version = if side == "remote" {
        row.try_get("remote_version")?
    } else {
        None
    };
    Ok(VersionInfo {
        hash: parse_optional_hash(row.try_get(format!("{side}_hash").as_str())?)?,
        size: size.map(|s| u64::try_from(s).unwrap_or(0)),
        mtime: parse_optional_datetime(row.try_get(format!("{side}_mtime").as_str())?)?,
        version,
    })
}

fn conflict_from_row(row: &SqliteRow) -> Result<Conflict, CacheError> {
    Ok(Conflict {
        id: ConflictId::new(row.try_get("id")?),
        folder_id: FolderId::new(row.try_get("folder_id")?),
        record_id: RecordId::new(row.try_get("record_id")?),
        relative_path: RelativePath::new(row.try_get::<String, _>("relative_path")?)?,
        kind: ConflictKind::from_str(&row.try_get::<String, _>("kind")?)?,
        local: version_from_row(row, "local")?,
        remote: version_from_row(row, "remote")?,
        state: ConflictState::from_str(&row.try_get::<String, _>("state")?)?,
        detected_at: parse_datetime(&row.try_get::<String, _>("detected_at")?)?,
        resolved_at: parse_optional_datetime(row.try_get("resolved_at")?)?,
    })
}

/// True if the two operations must not run concurrently or out of order
fn overlaps(op: &PendingOperation, earlier: &PendingOperation) -> bool {
    earlier.touches(&op.relative_path)
        || op
            .destination
            .as_ref()
            .is_some_and(|d| earlier.touches(d))
}

fn local_state_equal(is_dir: bool, stored: &FileRecord, observed: &LocalState) -> bool {
    match &stored.local {
        None => false,
        Some(_) if stored.is_dir != is_dir => false,
        Some(current) if is_dir => current.hash == observed.hash,
        Some(current) => current == observed,
    }
}

fn remote_state_equal(is_dir: bool, stored: &FileRecord, observed: &RemoteState) -> bool {
    match &stored.remote {
        None => false,
        Some(_) if stored.is_dir != is_dir => false,
        Some(current) if is_dir => current.hash == observed.hash,
        Some(current) => current == observed,
    }
}

// ============================================================================
// Transaction-scoped building blocks
// ============================================================================

async fn load_records(
    conn: &mut SqliteConnection,
    folder: FolderId,
) -> Result<Vec<FileRecord>, CacheError> {
    let rows = sqlx::query(
        "SELECT * FROM file_records WHERE folder_id = ? ORDER BY relative_path ASC",
    )
    .bind(folder.get())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(record_from_row).collect()
}

/// Returns the id of the record for `path`, inserting an empty one if needed
async fn ensure_record(
    conn: &mut SqliteConnection,
    folder: FolderId,
    path: &RelativePath,
    is_dir: bool,
    now: &str,
) -> Result<RecordId, CacheError> {
    sqlx::query(
        "INSERT INTO file_records (folder_id, relative_path, is_dir, updated_at) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT (folder_id, relative_path) DO NOTHING",
    )
    .bind(folder.get())
    .bind(path.as_str())
    .bind(is_dir)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let id: i64 =
        sqlx::query_scalar("SELECT id FROM file_records WHERE folder_id = ? AND relative_path = ?")
            .bind(folder.get())
            .bind(path.as_str())
            .fetch_one(&mut *conn)
            .await?;
    Ok(RecordId::new(id))
}

async fn write_local(
    conn: &mut SqliteConnection,
    record: RecordId,
    is_dir: Option<bool>,
    local: Option<&LocalState>,
    observed_at: &str,
) -> Result<(), CacheError> {
    sqlx::query(
        "UPDATE file_records SET \
         is_dir = COALESCE(?, is_dir), local_hash = ?, local_size = ?, local_mtime = ?, \
         local_observed_at = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(is_dir)
    .bind(local.map(|l| l.hash.as_str().to_string()))
    .bind(local.map(|l| size_to_db(l.size)))
    .bind(local.and_then(|l| opt_ts(l.mtime)))
    .bind(observed_at)
    .bind(observed_at)
    .bind(record.get())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_remote(
    conn: &mut SqliteConnection,
    record: RecordId,
    is_dir: Option<bool>,
    remote: Option<&RemoteState>,
    observed_at: &str,
) -> Result<(), CacheError> {
    sqlx::query(
        "UPDATE file_records SET \
         is_dir = COALESCE(?, is_dir), remote_hash = ?, remote_version = ?, remote_size = ?, \
         remote_mtime = ?, remote_observed_at = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(is_dir)
    .bind(remote.map(|r| r.hash.as_str().to_string()))
    .bind(remote.map(|r| r.version.clone()))
    .bind(remote.map(|r| size_to_db(r.size)))
    .bind(remote.and_then(|r| opt_ts(r.mtime)))
    .bind(observed_at)
    .bind(observed_at)
    .bind(record.get())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn set_last_synced(
    conn: &mut SqliteConnection,
    record: RecordId,
    hash: Option<&FileHash>,
    now: &str,
) -> Result<(), CacheError> {
    sqlx::query(
        "UPDATE file_records SET last_synced_hash = ?, last_synced_at = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(hash.map(|h| h.as_str().to_string()))
    .bind(hash.map(|_| now.to_string()))
    .bind(now)
    .bind(record.get())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Deletes records absent on both sides that nothing refers to anymore
async fn purge_absent(
    conn: &mut SqliteConnection,
    folder: FolderId,
    only: Option<RecordId>,
) -> Result<u64, CacheError> {
    let result = sqlx::query(
        "DELETE FROM file_records \
         WHERE folder_id = ? AND (? IS NULL OR id = ?) \
           AND local_hash IS NULL AND remote_hash IS NULL \
           AND NOT EXISTS (SELECT 1 FROM pending_operations o \
                           WHERE o.record_id = file_records.id \
                             AND o.status IN ('queued', 'in_progress')) \
           AND NOT EXISTS (SELECT 1 FROM conflicts c WHERE c.record_id = file_records.id)",
    )
    .bind(folder.get())
    .bind(only.map(|r| r.get()))
    .bind(only.map(|r| r.get()))
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

async fn active_operation_for(
    conn: &mut SqliteConnection,
    record: RecordId,
) -> Result<Option<OperationId>, CacheError> {
    let id: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM pending_operations \
         WHERE record_id = ? AND status IN ('queued', 'in_progress')",
    )
    .bind(record.get())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id.map(OperationId::new))
}

async fn enqueue(
    conn: &mut SqliteConnection,
    folder: FolderId,
    op: &NewOperation,
    now: &str,
) -> Result<EnqueueOutcome, CacheError> {
    let record = ensure_record(conn, folder, &op.relative_path, false, now).await?;
    if let Some(existing) = active_operation_for(conn, record).await? {
        return Ok(EnqueueOutcome::AlreadyActive(existing));
    }

    let result = sqlx::query(
        "INSERT INTO pending_operations \
         (folder_id, record_id, kind, status, relative_path, destination, content_hash, \
          local_guard, remote_guard, retry_count, created_at, next_attempt_at, updated_at) \
         VALUES (?, ?, ?, 'queued', ?, ?, ?, ?, ?, 0, ?, ?, ?)",
    )
    .bind(folder.get())
    .bind(record.get())
    .bind(op.kind.as_str())
    .bind(op.relative_path.as_str())
    .bind(op.destination.as_ref().map(|d| d.as_str().to_string()))
    .bind(op.content_hash.as_ref().map(|h| h.as_str().to_string()))
    .bind(op.local_guard.as_ref().map(|h| h.as_str().to_string()))
    .bind(op.remote_guard.as_deref())
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(EnqueueOutcome::Enqueued(OperationId::new(
        result.last_insert_rowid(),
    )))
}

async fn load_operation(
    conn: &mut SqliteConnection,
    id: OperationId,
) -> Result<Option<PendingOperation>, CacheError> {
    let row = sqlx::query("SELECT * FROM pending_operations WHERE id = ?")
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(operation_from_row).transpose()
}

// ============================================================================
// IChangeJournal implementation
// ============================================================================

#[async_trait::async_trait]
impl IChangeJournal for SqliteChangeJournal {
    // ----- Folders -----

    async fn add_folder(&self, folder: &NewFolder) -> anyhow::Result<SyncedFolder> {
        let _guard = self.write_lock.lock().await;
        let now = ts(Utc::now());

        sqlx::query(
            "INSERT INTO synced_folders (name, local_root, remote_root, paused, created_at) \
             VALUES (?, ?, ?, 0, ?) \
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(&folder.name)
        .bind(folder.local_root.to_string_lossy().to_string())
        .bind(&folder.remote_root)
        .bind(&now)
        .execute(&self.pool)
        .await
        .storage()?;

        let row = sqlx::query("SELECT * FROM synced_folders WHERE name = ?")
            .bind(&folder.name)
            .fetch_one(&self.pool)
            .await
            .storage()?;
        let stored = folder_from_row(&row).storage()?;

        tracing::debug!(folder_id = %stored.id, name = %stored.name, "Registered folder");
        Ok(stored)
    }

    async fn get_folder(&self, id: FolderId) -> anyhow::Result<Option<SyncedFolder>> {
        let row = sqlx::query("SELECT * FROM synced_folders WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .storage()?;
        Ok(row.as_ref().map(folder_from_row).transpose().storage()?)
    }

    async fn get_folder_by_name(&self, name: &str) -> anyhow::Result<Option<SyncedFolder>> {
        let row = sqlx::query("SELECT * FROM synced_folders WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .storage()?;
        Ok(row.as_ref().map(folder_from_row).transpose().storage()?)
    }

    async fn list_folders(&self) -> anyhow::Result<Vec<SyncedFolder>> {
        let rows = sqlx::query("SELECT * FROM synced_folders ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .storage()?;
        Ok(rows
            .iter()
            .map(folder_from_row)
            .collect::<Result<Vec<_>, _>>()
            .storage()?)
    }

    async fn remove_folder(&self, id: FolderId) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM synced_folders WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .storage()?;
        let removed = result.rows_affected() > 0;
        if removed {
            tracing::info!(folder_id = %id, "Removed folder and its journal state");
        }
        Ok(removed)
    }

    async fn set_folder_paused(&self, id: FolderId, paused: bool) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE synced_folders SET paused = ? WHERE id = ? AND paused != ?")
            .bind(paused)
            .bind(id.get())
            .bind(paused)
            .execute(&self.pool)
            .await
            .storage()?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_scanned(&self, id: FolderId, at: DateTime<Utc>) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("UPDATE synced_folders SET last_scan_at = ? WHERE id = ?")
            .bind(ts(at))
            .bind(id.get())
            .execute(&self.pool)
            .await
            .storage()?;
        Ok(())
    }

    // ----- Records -----

    async fn get_record(
        &self,
        folder: FolderId,
        path: &RelativePath,
    ) -> anyhow::Result<Option<FileRecord>> {
        let row =
            sqlx::query("SELECT * FROM file_records WHERE folder_id = ? AND relative_path = ?")
                .bind(folder.get())
                .bind(path.as_str())
                .fetch_optional(&self.pool)
                .await
                .storage()?;
        Ok(row.as_ref().map(record_from_row).transpose().storage()?)
    }

    async fn list_records(&self, folder: FolderId) -> anyhow::Result<Vec<FileRecord>> {
        let mut conn = self.pool.acquire().await.storage()?;
        Ok(load_records(&mut conn, folder).await.storage()?)
    }

    async fn apply_local_snapshot(
        &self,
        folder: FolderId,
        snapshot: &LocalSnapshot,
    ) -> anyhow::Result<ObservationReport> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.storage()?;
        let observed_at = ts(snapshot.started_at);
        let mut report = ObservationReport::default();

        let existing: HashMap<RelativePath, FileRecord> = load_records(&mut tx, folder)
            .await
            .storage()?
            .into_iter()
            .map(|r| (r.relative_path.clone(), r))
            .collect();
        let mut seen = HashSet::with_capacity(snapshot.len());

        for entry in &snapshot.entries {
            seen.insert(&entry.path);
            match existing.get(&entry.path) {
                Some(record) => {
                    if record
                        .local_observed_at
                        .is_some_and(|at| at > snapshot.started_at)
                    {
                        report.skipped_stale += 1;
                    } else if !local_state_equal(entry.is_dir, record, &entry.state) {
                        write_local(
                            &mut tx,
                            record.id,
                            Some(entry.is_dir),
                            Some(&entry.state),
                            &observed_at,
                        )
                        .await
                        .storage()?;
                        report.updated += 1;
                    }
                }
                None => {
                    let id = ensure_record(&mut tx, folder, &entry.path, entry.is_dir, &observed_at)
                        .await
                        .storage()?;
                    write_local(&mut tx, id, None, Some(&entry.state), &observed_at)
                        .await
                        .storage()?;
                    report.inserted += 1;
                }
            }
        }

        for record in existing.values() {
            if record.local.is_none() || seen.contains(&record.relative_path) {
                continue;
            }
            if record
                .local_observed_at
                .is_some_and(|at| at > snapshot.started_at)
            {
                report.skipped_stale += 1;
                continue;
            }
            write_local(&mut tx, record.id, None, None, &observed_at)
                .await
                .storage()?;
            report.cleared += 1;
        }

        report.purged = purge_absent(&mut tx, folder, None).await.storage()?;
        tx.commit().await.storage()?;

        tracing::debug!(
            folder_id = %folder,
            inserted = report.inserted,
            updated = report.updated,
            cleared = report.cleared,
            stale = report.skipped_stale,
            purged = report.purged,
            "Applied local snapshot"
        );
        Ok(report)
    }

    async fn apply_remote_snapshot(
        &self,
        folder: FolderId,
        snapshot: &RemoteSnapshot,
    ) -> anyhow::Result<ObservationReport> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.storage()?;
        let observed_at = ts(snapshot.started_at);
        let mut report = ObservationReport::default();

        let existing: HashMap<RelativePath, FileRecord> = load_records(&mut tx, folder)
            .await
            .storage()?
            .into_iter()
            .map(|r| (r.relative_path.clone(), r))
            .collect();
        let mut seen = HashSet::with_capacity(snapshot.len());

        for entry in &snapshot.entries {
            seen.insert(&entry.path);
            match existing.get(&entry.path) {
                Some(record) => {
                    if record
                        .remote_observed_at
                        .is_some_and(|at| at > snapshot.started_at)
                    {
                        report.skipped_stale += 1;
                    } else if !remote_state_equal(entry.is_dir, record, &entry.state) {
                        write_remote(
                            &mut tx,
                            record.id,
                            Some(entry.is_dir),
                            Some(&entry.state),
                            &observed_at,
                        )
                        .await
                        .storage()?;
                        report.updated += 1;
                    }
                }
                None => {
                    let id = ensure_record(&mut tx, folder, &entry.path, entry.is_dir, &observed_at)
                        .await
                        .storage()?;
                    write_remote(&mut tx, id, None, Some(&entry.state), &observed_at)
                        .await
                        .storage()?;
                    report.inserted += 1;
                }
            }
        }

        for record in existing.values() {
            if record.remote.is_none() || seen.contains(&record.relative_path) {
                continue;
            }
            if record
                .remote_observed_at
                .is_some_and(|at| at > snapshot.started_at)
            {
                report.skipped_stale += 1;
                continue;
            }
            write_remote(&mut tx, record.id, None, None, &observed_at)
                .await
                .storage()?;
            report.cleared += 1;
        }

        report.purged = purge_absent(&mut tx, folder, None).await.storage()?;
        tx.commit().await.storage()?;

        tracing::debug!(
            folder_id = %folder,
            inserted = report.inserted,
            updated = report.updated,
            cleared = report.cleared,
            stale = report.skipped_stale,
            purged = report.purged,
            "Applied remote snapshot"
        );
        Ok(report)
    }

    // ----- Planning -----

    async fn apply_plan(&self, folder: FolderId, plan: &Plan) -> anyhow::Result<PlanReport> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.storage()?;
        let now = ts(Utc::now());
        let mut report = PlanReport::default();

        for id in &plan.superseded {
            let result = sqlx::query(
                "DELETE FROM pending_operations WHERE id = ? AND folder_id = ? AND status = 'failed'",
            )
            .bind(id.get())
            .bind(folder.get())
            .execute(&mut *tx)
            .await
            .storage()?;
            report.superseded += result.rows_affected();
        }

        for (record, hash) in &plan.converged {
            set_last_synced(&mut tx, *record, Some(hash), &now)
                .await
                .storage()?;
            report.converged += 1;
        }

        for conflict in &plan.conflicts {
            let record = ensure_record(&mut tx, folder, &conflict.relative_path, false, &now)
                .await
                .storage()?;
            let pending: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM conflicts WHERE record_id = ? AND state = 'pending'",
            )
            .bind(record.get())
            .fetch_optional(&mut *tx)
            .await
            .storage()?;
            if pending.is_some() {
                continue;
            }

            sqlx::query(
                "INSERT INTO conflicts \
                 (folder_id, record_id, relative_path, kind, \
                  local_hash, local_size, local_mtime, \
                  remote_hash, remote_size, remote_mtime, remote_version, \
                  state, detected_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
            )
            .bind(folder.get())
            .bind(record.get())
            .bind(conflict.relative_path.as_str())
            .bind(conflict.kind.as_str())
            .bind(conflict.local.hash.as_ref().map(|h| h.as_str().to_string()))
            .bind(conflict.local.size.map(size_to_db))
            .bind(opt_ts(conflict.local.mtime))
            .bind(conflict.remote.hash.as_ref().map(|h| h.as_str().to_string()))
            .bind(conflict.remote.size.map(size_to_db))
            .bind(opt_ts(conflict.remote.mtime))
            .bind(conflict.remote.version.as_deref())
            .bind(&now)
            .execute(&mut *tx)
            .await
            .storage()?;
            report.conflicts_created += 1;
        }

        for op in &plan.operations {
            match enqueue(&mut tx, folder, op, &now).await.storage()? {
                EnqueueOutcome::Enqueued(_) => report.enqueued += 1,
                EnqueueOutcome::AlreadyActive(_) => report.already_active += 1,
            }
        }

        tx.commit().await.storage()?;

        if report != PlanReport::default() {
            tracing::debug!(
                folder_id = %folder,
                enqueued = report.enqueued,
                already_active = report.already_active,
                superseded = report.superseded,
                conflicts = report.conflicts_created,
                converged = report.converged,
                "Applied plan"
            );
        }
        Ok(report)
    }

    // ----- Operations -----

    async fn enqueue_operation(
        &self,
        folder: FolderId,
        op: &NewOperation,
    ) -> anyhow::Result<EnqueueOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.storage()?;
        let outcome = enqueue(&mut tx, folder, op, &ts(Utc::now()))
            .await
            .storage()?;
        tx.commit().await.storage()?;
        Ok(outcome)
    }

    async fn get_operation(&self, id: OperationId) -> anyhow::Result<Option<PendingOperation>> {
        let mut conn = self.pool.acquire().await.storage()?;
        Ok(load_operation(&mut conn, id).await.storage()?)
    }

    async fn list_operations(
        &self,
        folder: Option<FolderId>,
        status: Option<OperationStatus>,
    ) -> anyhow::Result<Vec<PendingOperation>> {
        let mut sql = String::from("SELECT * FROM pending_operations WHERE 1=1");
        if folder.is_some() {
            sql.push_str(" AND folder_id = ?");
        }
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut query = sqlx::query(&sql);
        if let Some(folder) = folder {
            query = query.bind(folder.get());
        }
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await.storage()?;
        Ok(rows
            .iter()
            .map(operation_from_row)
            .collect::<Result<Vec<_>, _>>()
            .storage()?)
    }

    async fn claim_ready_operations(
        &self,
        folder: FolderId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<PendingOperation>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.storage()?;

        let paused: Option<i64> = sqlx::query_scalar("SELECT paused FROM synced_folders WHERE id = ?")
            .bind(folder.get())
            .fetch_optional(&mut *tx)
            .await
            .storage()?;
        if paused.unwrap_or(1) != 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT * FROM pending_operations \
             WHERE folder_id = ? AND status IN ('queued', 'in_progress') \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(folder.get())
        .fetch_all(&mut *tx)
        .await
        .storage()?;
        let active = rows
            .iter()
            .map(operation_from_row)
            .collect::<Result<Vec<_>, _>>()
            .storage()?;

        let claimed_at = ts(Utc::now());
        let mut claimed = Vec::new();
        for (idx, op) in active.iter().enumerate() {
            if claimed.len() >= limit {
                break;
            }
            if !op.is_ready(now) {
                continue;
            }
            if active[..idx].iter().any(|earlier| overlaps(op, earlier)) {
                continue;
            }

            sqlx::query(
                "UPDATE pending_operations SET status = 'in_progress', updated_at = ? \
                 WHERE id = ? AND status = 'queued'",
            )
            .bind(&claimed_at)
            .bind(op.id.get())
            .execute(&mut *tx)
            .await
            .storage()?;

            let mut op = op.clone();
            op.transition_to(OperationStatus::InProgress)?;
            tracing::trace!(operation_id = %op.id, path = %op.relative_path, "Claimed operation");
            claimed.push(op);
        }

        tx.commit().await.storage()?;
        Ok(claimed)
    }

    async fn complete_operation(
        &self,
        id: OperationId,
        outcome: &OperationOutcome,
    ) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.storage()?;
        let now = ts(Utc::now());

        let Some(op) = load_operation(&mut tx, id).await.storage()? else {
            tracing::warn!(operation_id = %id, "Completed operation no longer in the journal");
            return Ok(());
        };

        match outcome {
            OperationOutcome::Synced { local, remote } => {
                write_local(&mut tx, op.record_id, None, Some(local), &now)
                    .await
                    .storage()?;
                write_remote(&mut tx, op.record_id, None, Some(remote), &now)
                    .await
                    .storage()?;
                set_last_synced(&mut tx, op.record_id, Some(&local.hash), &now)
                    .await
                    .storage()?;
            }
            OperationOutcome::Deleted => {
                write_local(&mut tx, op.record_id, None, None, &now)
                    .await
                    .storage()?;
                write_remote(&mut tx, op.record_id, None, None, &now)
                    .await
                    .storage()?;
                set_last_synced(&mut tx, op.record_id, None, &now)
                    .await
                    .storage()?;
            }
            OperationOutcome::Moved {
                destination,
                local,
                remote,
            } => {
                let source = sqlx::query("SELECT * FROM file_records WHERE id = ?")
                    .bind(op.record_id.get())
                    .fetch_one(&mut *tx)
                    .await
                    .storage()?;
                let source = record_from_row(&source).storage()?;

                let target =
                    ensure_record(&mut tx, op.folder_id, destination, source.is_dir, &now)
                        .await
                        .storage()?;
                if let Some(local) = local {
                    write_local(&mut tx, target, Some(source.is_dir), Some(local), &now)
                        .await
                        .storage()?;
                }
                if let Some(remote) = remote {
                    write_remote(&mut tx, target, Some(source.is_dir), Some(remote), &now)
                        .await
                        .storage()?;
                }
                set_last_synced(&mut tx, target, source.last_synced_hash.as_ref(), &now)
                    .await
                    .storage()?;

                write_local(&mut tx, op.record_id, None, None, &now)
                    .await
                    .storage()?;
                write_remote(&mut tx, op.record_id, None, None, &now)
                    .await
                    .storage()?;
                set_last_synced(&mut tx, op.record_id, None, &now)
                    .await
                    .storage()?;
            }
        }

        sqlx::query("DELETE FROM pending_operations WHERE id = ?")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .storage()?;
        purge_absent(&mut tx, op.folder_id, Some(op.record_id))
            .await
            .storage()?;
        tx.commit().await.storage()?;

        tracing::debug!(
            operation_id = %id,
            kind = %op.kind,
            path = %op.relative_path,
            "Operation completed"
        );
        Ok(())
    }

    async fn reschedule_operation(
        &self,
        id: OperationId,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "UPDATE pending_operations SET status = 'queued', retry_count = ?, \
             next_attempt_at = ?, last_error = ?, updated_at = ? \
             WHERE id = ? AND status = 'in_progress'",
        )
        .bind(i64::from(retry_count))
        .bind(ts(next_attempt_at))
        .bind(error)
        .bind(ts(Utc::now()))
        .bind(id.get())
        .execute(&self.pool)
        .await
        .storage()?;
        tracing::trace!(operation_id = %id, retry_count, %next_attempt_at, "Rescheduled operation");
        Ok(())
    }

    async fn fail_operation(
        &self,
        id: OperationId,
        retry_count: u32,
        error: &str,
    ) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "UPDATE pending_operations SET status = 'failed', retry_count = ?, \
             last_error = ?, updated_at = ? \
             WHERE id = ? AND status = 'in_progress'",
        )
        .bind(i64::from(retry_count))
        .bind(error)
        .bind(ts(Utc::now()))
        .bind(id.get())
        .execute(&self.pool)
        .await
        .storage()?;
        Ok(())
    }

    async fn abandon_operation(&self, id: OperationId, reason: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM pending_operations WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .storage()?;
        if result.rows_affected() > 0 {
            tracing::info!(operation_id = %id, reason, "Abandoned operation");
        }
        Ok(())
    }

    async fn retry_operation(&self, id: OperationId) -> anyhow::Result<RetryOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.storage()?;
        let now = ts(Utc::now());

        let Some(op) = load_operation(&mut tx, id).await.storage()? else {
            return Ok(RetryOutcome::NotFound);
        };

        let outcome = match op.status {
            OperationStatus::Failed => {
                if active_operation_for(&mut tx, op.record_id)
                    .await
                    .storage()?
                    .is_some()
                {
                    RetryOutcome::AlreadyActive
                } else {
                    sqlx::query(
                        "UPDATE pending_operations SET status = 'queued', \
                         next_attempt_at = ?, updated_at = ? WHERE id = ?",
                    )
                    .bind(&now)
                    .bind(&now)
                    .bind(id.get())
                    .execute(&mut *tx)
                    .await
                    .storage()?;
                    RetryOutcome::Requeued
                }
            }
            OperationStatus::Queued => {
                sqlx::query(
                    "UPDATE pending_operations SET next_attempt_at = ?, updated_at = ? \
                     WHERE id = ?",
                )
                .bind(&now)
                .bind(&now)
                .bind(id.get())
                .execute(&mut *tx)
                .await
                .storage()?;
                RetryOutcome::AlreadyActive
            }
            OperationStatus::InProgress | OperationStatus::Completed => RetryOutcome::AlreadyActive,
        };

        tx.commit().await.storage()?;
        tracing::info!(operation_id = %id, outcome = ?outcome, "Manual retry requested");
        Ok(outcome)
    }

    async fn recover_interrupted(&self) -> anyhow::Result<u64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "UPDATE pending_operations SET status = 'queued', updated_at = ? \
             WHERE status = 'in_progress'",
        )
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await
        .storage()?;
        Ok(result.rows_affected())
    }

    // ----- Conflicts -----

    async fn get_conflict(&self, id: ConflictId) -> anyhow::Result<Option<Conflict>> {
        let row = sqlx::query("SELECT * FROM conflicts WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .storage()?;
        Ok(row.as_ref().map(conflict_from_row).transpose().storage()?)
    }

    async fn list_conflicts(
        &self,
        folder: Option<FolderId>,
        pending_only: bool,
    ) -> anyhow::Result<Vec<Conflict>> {
        let mut sql = String::from("SELECT * FROM conflicts WHERE 1=1");
        if folder.is_some() {
            sql.push_str(" AND folder_id = ?");
        }
        if pending_only {
            sql.push_str(" AND state = 'pending'");
        }
        sql.push_str(" ORDER BY detected_at ASC, id ASC");

        let mut query = sqlx::query(&sql);
        if let Some(folder) = folder {
            query = query.bind(folder.get());
        }

        let rows = query.fetch_all(&self.pool).await.storage()?;
        Ok(rows
            .iter()
            .map(conflict_from_row)
            .collect::<Result<Vec<_>, _>>()
            .storage()?)
    }

    async fn resolve_conflict(
        &self,
        id: ConflictId,
        plan: &ResolutionPlan,
    ) -> anyhow::Result<ResolveOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.storage()?;
        let now = ts(Utc::now());

        let row = sqlx::query("SELECT * FROM conflicts WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&mut *tx)
            .await
            .storage()?;
        let Some(conflict) = row.as_ref().map(conflict_from_row).transpose().storage()? else {
            return Ok(ResolveOutcome::NotFound);
        };
        if !conflict.is_pending() {
            return Ok(ResolveOutcome::AlreadyResolved);
        }

        sqlx::query("UPDATE conflicts SET state = ?, resolved_at = ? WHERE id = ?")
            .bind(ConflictState::from(plan.resolution).as_str())
            .bind(&now)
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .storage()?;

        for seed in &plan.records {
            let record = ensure_record(&mut tx, conflict.folder_id, &seed.path, seed.is_dir, &now)
                .await
                .storage()?;
            write_local(&mut tx, record, Some(seed.is_dir), seed.local.as_ref(), &now)
                .await
                .storage()?;
        }

        for op in &plan.operations {
            if let EnqueueOutcome::AlreadyActive(existing) =
                enqueue(&mut tx, conflict.folder_id, op, &now).await.storage()?
            {
                tracing::warn!(
                    conflict_id = %id,
                    operation_id = %existing,
                    path = %op.relative_path,
                    "Resolution work skipped, record already has active work"
                );
            }
        }

        tx.commit().await.storage()?;

        tracing::info!(
            conflict_id = %id,
            path = %conflict.relative_path,
            resolution = %plan.resolution,
            "Conflict resolved"
        );
        Ok(ResolveOutcome::Applied)
    }

    async fn prune_resolved_conflicts(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "DELETE FROM conflicts WHERE state != 'pending' AND resolved_at < ?",
        )
        .bind(ts(before))
        .execute(&self.pool)
        .await
        .storage()?;
        Ok(result.rows_affected())
    }

    // ----- Status -----

    async fn folder_stats(&self, folder: FolderId) -> anyhow::Result<FolderStats> {
        let row = sqlx::query(
            "SELECT \
               (SELECT COUNT(*) FROM pending_operations WHERE folder_id = ?1 AND status = 'queued') AS pending, \
               (SELECT COUNT(*) FROM pending_operations WHERE folder_id = ?1 AND status = 'in_progress') AS in_progress, \
               (SELECT COUNT(*) FROM pending_operations WHERE folder_id = ?1 AND status = 'failed') AS failed, \
               (SELECT COUNT(*) FROM conflicts WHERE folder_id = ?1 AND state = 'pending') AS conflicts",
        )
        .bind(folder.get())
        .fetch_one(&self.pool)
        .await
        .storage()?;

        let count = |name: &str| -> Result<u64, CacheError> {
            let n: i64 = row.try_get(name)?;
            Ok(u64::try_from(n).unwrap_or(0))
        };
        Ok(FolderStats {
            pending: count("pending").storage()?,
            in_progress: count("in_progress").storage()?,
            failed: count("failed").storage()?,
            conflicts: count("conflicts").storage()?,
        })
    }
}
