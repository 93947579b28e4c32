//! Error types for the conflict engine

use thiserror::Error;

use foldsync_core::domain::{FolderId, RelativePath};

/// Errors that can occur while resolving conflicts
#[derive(Debug, Error)]
pub enum ConflictError {
    /// The folder owning the conflict is no longer registered
    #[error("folder not found: {0}")]
    FolderNotFound(FolderId),

    /// No free conflict copy name could be found next to the file
    #[error("no free conflict copy name for {0}")]
    NameExhausted(RelativePath),

    /// A file operation needed by the resolution failed
    #[error("resolution failed: {0}")]
    ResolutionFailed(String),

    /// Journal error
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
