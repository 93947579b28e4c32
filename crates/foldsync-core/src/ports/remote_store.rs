//! Remote store port (driven/secondary port)
//!
//! Interface to the remote transfer API. All paths are absolute remote
//! paths (`/shares/alice/docs/a.txt`); callers map them to and from
//! [`RelativePath`](crate::domain::RelativePath)s.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result`. Implementations wrap failures in
//!   [`TransferError`](crate::domain::TransferError) so the retry policy can
//!   classify them; untyped errors are classified by message.
//! - Writes take the expected current version as an optimistic concurrency
//!   token. `None` means "the path must not exist yet".
//! - Every call is expected to carry its own timeout.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata of one remote item, as returned by the list/metadata endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub path: String,
    /// Content hash; absent for directories
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub size: u64,
    pub version: String,
    #[serde(default)]
    pub mtime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_dir: bool,
}

/// Port trait for the remote transfer API
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Lists every item below `root`, recursively
    async fn list(&self, root: &str) -> anyhow::Result<Vec<RemoteEntry>>;

    /// Fetches metadata for a single item, `None` if it does not exist
    async fn stat(&self, path: &str) -> anyhow::Result<Option<RemoteEntry>>;

    /// Streams the content of `path` into the local file `dest`
    ///
    /// Returns the number of bytes written. `dest` is created or truncated.
    async fn download(&self, path: &str, dest: &Path) -> anyhow::Result<u64>;

    /// Streams the local file `source` to `path` if its current version is
    /// `expected_version`
    async fn upload(
        &self,
        path: &str,
        source: &Path,
        expected_version: Option<&str>,
    ) -> anyhow::Result<RemoteEntry>;

    /// Creates a directory (and missing parents); succeeds if it already exists
    async fn create_dir(&self, path: &str) -> anyhow::Result<RemoteEntry>;

    /// Deletes `path` if its current version is `expected_version`
    ///
    /// Deleting a directory is non-recursive.
    async fn delete(&self, path: &str, expected_version: Option<&str>) -> anyhow::Result<()>;

    /// Moves `from` to `to` if the source version is `expected_version`
    async fn rename(
        &self,
        from: &str,
        to: &str,
        expected_version: Option<&str>,
    ) -> anyhow::Result<RemoteEntry>;
}
