//! foldsync Cache - Durable change journal
//!
//! SQLite-based storage for:
//! - Synced folder pairs and their pause flag
//! - Per-path file records with both sides' last observed state
//! - The pending operation queue
//! - Conflicts, pending and resolved
//!
//! ## Architecture
//!
//! This crate implements the `IChangeJournal` port from `foldsync-core`
//! using SQLite as the storage backend. It is a driven (secondary) adapter
//! in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteChangeJournal`] - Full `IChangeJournal` implementation
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use foldsync_cache::{DatabasePool, SqliteChangeJournal};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/foldsync/journal.db")).await?;
//! let journal = SqliteChangeJournal::new(pool.pool().clone());
//! // Use journal as IChangeJournal...
//! # Ok(())
//! # }
//! ```

pub mod journal;
pub mod pool;

pub use journal::SqliteChangeJournal;
pub use pool::DatabasePool;

use foldsync_core::domain::{DomainError, StorageError};

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The database is locked by another writer
    #[error("Database busy: {0}")]
    Busy(String),

    /// The database file is damaged
    #[error("Database corrupted: {0}")]
    Corrupted(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be decoded into a domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// SQLite result codes worth telling apart
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";
const SQLITE_CORRUPT: &str = "11";
const SQLITE_NOTADB: &str = "26";

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut => CacheError::Busy(e.to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => CacheError::Busy(e.to_string()),
                Some(SQLITE_CORRUPT) | Some(SQLITE_NOTADB) => {
                    CacheError::Corrupted(e.to_string())
                }
                _ => CacheError::QueryFailed(e.to_string()),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                CacheError::SerializationError(e.to_string())
            }
            _ => CacheError::QueryFailed(e.to_string()),
        }
    }
}

impl From<DomainError> for CacheError {
    fn from(e: DomainError) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}

impl From<CacheError> for StorageError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Busy(msg) => StorageError::Busy(msg),
            CacheError::Corrupted(msg) | CacheError::SerializationError(msg) => {
                StorageError::Corrupted(msg)
            }
            other => StorageError::Failed(other.to_string()),
        }
    }
}

/// Converts adapter errors into the classified [`StorageError`] carried
/// across the port boundary
pub(crate) trait StorageResultExt<T> {
    fn storage(self) -> Result<T, StorageError>;
}

impl<T, E: Into<CacheError>> StorageResultExt<T> for Result<T, E> {
    fn storage(self) -> Result<T, StorageError> {
        self.map_err(|e| StorageError::from(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foldsync_core::domain::FailureClass;

    #[test]
    fn test_busy_maps_to_transient_storage_error() {
        let storage = StorageError::from(CacheError::Busy("locked".into()));
        assert_eq!(storage.class(), FailureClass::Transient);
    }

    #[test]
    fn test_corruption_maps_to_fatal_storage_error() {
        let storage = StorageError::from(CacheError::Corrupted("bad page".into()));
        assert_eq!(storage.class(), FailureClass::Fatal);

        let storage = StorageError::from(CacheError::SerializationError("bad hash".into()));
        assert_eq!(storage.class(), FailureClass::Fatal);
    }

    #[test]
    fn test_pool_timeout_is_busy() {
        assert!(matches!(
            CacheError::from(sqlx::Error::PoolTimedOut),
            CacheError::Busy(_)
        ));
    }

    #[test]
    fn test_classified_error_survives_anyhow() {
        let result: Result<(), CacheError> = Err(CacheError::Busy("locked".into()));
        let err: anyhow::Error = result.storage().unwrap_err().into();
        assert_eq!(FailureClass::of(&err), FailureClass::Transient);
    }
}
