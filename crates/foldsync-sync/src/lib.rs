//! foldsync Sync - Reconciliation engine
//!
//! Provides:
//! - Local change detection (filesystem watcher and debounced change queue)
//! - Local and remote scanning into the change journal
//! - Three-way planning of uploads, downloads, deletes, moves and conflicts
//! - Bounded, retrying execution of pending operations
//!
//! ## Modules
//!
//! - [`filesystem`] - Local filesystem adapter (SHA-256 hashing, staged writes)
//! - [`watcher`] - `notify` watcher and debounced change queue
//! - [`scanner`] - Local and remote scanners producing journal snapshots
//! - [`planner`] - Pure planning pass over file records
//! - [`retry`] - Exponential backoff with jitter
//! - [`executor`] - Executes claimed operations against both sides
//! - [`registry`] - Shared per-folder activity and the event bus
//! - [`engine`] - Per-folder watch, scan, plan and execute loops

pub mod engine;
pub mod executor;
pub mod filesystem;
pub mod planner;
pub mod registry;
pub mod retry;
pub mod scanner;
pub mod watcher;

use std::path::PathBuf;

use thiserror::Error;

pub use engine::FolderEngine;
pub use executor::TransferExecutor;
pub use filesystem::LocalFileSystemAdapter;
pub use planner::SyncPlanner;
pub use registry::{FolderControl, SyncRegistry};
pub use retry::RetryPolicy;

/// Errors that can occur during synchronization
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The local root of a folder is missing or not a directory
    #[error("Local root unavailable: {0}")]
    RootUnavailable(PathBuf),

    /// An ignore pattern could not be compiled
    #[error("Invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending glob
        pattern: String,
        /// Parser message
        message: String,
    },

    /// A domain-level error propagated from foldsync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] foldsync_core::domain::DomainError),
}
