//! Journal database connection
//!
//! The schema is versioned through `PRAGMA user_version`: each entry of
//! [`MIGRATIONS`] above the stored version is applied in its own
//! transaction and bumps the version, so opening an up-to-date journal
//! runs nothing.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::CacheError;

/// How long a writer waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Readers run alongside the engines' writers thanks to WAL
const MAX_FILE_CONNECTIONS: u32 = 5;

/// Schema migrations as `(version, sql)`, in ascending order
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("migrations/20261019_initial.sql"))];

/// SQLite pool holding the change journal
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (or creates) the journal at `db_path` and brings its schema up to date
    ///
    /// # Errors
    ///
    /// `CacheError::ConnectionFailed` when the file or its directory cannot
    /// be opened, `CacheError::MigrationFailed` when a migration fails.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_FILE_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("cannot open {}: {e}", db_path.display()))
            })?;

        let db = Self { pool };
        let version = db.migrate().await?;
        tracing::info!(path = %db_path.display(), schema_version = version, "Journal opened");
        Ok(db)
    }

    /// Journal that lives as long as the pool, for tests
    ///
    /// An in-memory database belongs to its connection, so the pool keeps
    /// exactly one connection and never recycles it.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| CacheError::ConnectionFailed(format!("in-memory journal: {e}")))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Waits for open connections to finish and closes the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Version of the applied schema
    pub async fn schema_version(&self) -> Result<i64, CacheError> {
        sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))
    }

    /// Applies pending migrations and returns the resulting schema version
    async fn migrate(&self) -> Result<i64, CacheError> {
        let start = self.schema_version().await?;
        let mut current = start;

        for &(version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > start) {
            let failed = |e: sqlx::Error| CacheError::MigrationFailed(format!("version {version}: {e}"));

            let mut tx = self.pool.begin().await.map_err(failed)?;
            sqlx::raw_sql(sql).execute(&mut *tx).await.map_err(failed)?;
            // PRAGMA does not take bind parameters
            sqlx::query(&format!("PRAGMA user_version = {version}"))
                .execute(&mut *tx)
                .await
                .map_err(failed)?;
            tx.commit().await.map_err(failed)?;

            tracing::debug!(version, "Applied journal migration");
            current = version;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_pool_creates_schema() {
        let db = DatabasePool::in_memory().await.unwrap();
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        for table in ["conflicts", "file_records", "pending_operations", "synced_folders"] {
            assert!(tables.iter().any(|t| t == table), "missing table {table}");
        }
        assert_eq!(db.schema_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_pool_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("journal.db");
        let db = DatabasePool::new(&path).await.unwrap();
        db.close().await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_reopening_keeps_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let first = DatabasePool::new(&path).await.unwrap();
        first.close().await;

        let second = DatabasePool::new(&path).await.unwrap();
        assert_eq!(second.schema_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = DatabasePool::in_memory().await.unwrap();
        assert_eq!(db.migrate().await.unwrap(), 1);
        assert_eq!(db.migrate().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_migrate_reapplies_from_older_version() {
        let db = DatabasePool::in_memory().await.unwrap();
        sqlx::query("PRAGMA user_version = 0")
            .execute(db.pool())
            .await
            .unwrap();
        assert_eq!(db.migrate().await.unwrap(), MIGRATIONS[MIGRATIONS.len() - 1].0);
        assert_eq!(db.schema_version().await.unwrap(), 1);
    }
}
