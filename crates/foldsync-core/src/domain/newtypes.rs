//! Domain newtypes with validation
//!
//! Row identifiers wrap the SQLite integer keys assigned by the journal, so
//! they travel unchanged through the IPC protocol. Paths and hashes validate
//! their content at construction time.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// Row identifiers
// ============================================================================

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw row id
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the raw row id
            #[must_use]
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<i64>()
                    .map(Self)
                    .map_err(|_| DomainError::ValidationFailed(format!(
                        "{} must be an integer: {s}",
                        stringify!($name)
                    )))
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Identifier of a [`SyncedFolder`](super::SyncedFolder)
    FolderId
);
row_id!(
    /// Identifier of a [`FileRecord`](super::FileRecord)
    RecordId
);
row_id!(
    /// Identifier of a [`PendingOperation`](super::PendingOperation)
    OperationId
);
row_id!(
    /// Identifier of a [`Conflict`](super::Conflict)
    ConflictId
);

// ============================================================================
// RelativePath
// ============================================================================

/// A path relative to a synced folder root, always `/`-separated
///
/// Examples: `a.txt`, `docs/report.pdf`. Never empty, never absolute, and
/// never contains `.`/`..` components, so joining it onto either root cannot
/// escape the folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
    /// Create a new RelativePath
    ///
    /// # Errors
    /// Returns error if the path is empty, absolute, or contains empty,
    /// `.` or `..` components
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let path = path.into();
        if path.is_empty() {
            return Err(DomainError::InvalidPath("Path cannot be empty".to_string()));
        }
        if path.starts_with('/') || path.ends_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Path must not start or end with '/': {path}"
            )));
        }
        if path.contains('\\') || path.contains('\0') {
            return Err(DomainError::InvalidPath(format!(
                "Path contains invalid characters: {path}"
            )));
        }
        if path
            .split('/')
            .any(|c| c.is_empty() || c == "." || c == "..")
        {
            return Err(DomainError::InvalidPath(format!(
                "Path contains invalid components: {path}"
            )));
        }
        Ok(Self(path))
    }

    /// Build a relative path from an absolute local path under `root`
    ///
    /// # Errors
    /// Returns error if `path` is not below `root` or is not valid UTF-8
    pub fn from_local(root: &Path, path: &Path) -> Result<Self, DomainError> {
        let rel = path.strip_prefix(root).map_err(|_| {
            DomainError::InvalidPath(format!(
                "{} is not under {}",
                path.display(),
                root.display()
            ))
        })?;
        let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
        match parts {
            Some(parts) => Self::new(parts.join("/")),
            None => Err(DomainError::InvalidPath(format!(
                "Path is not valid UTF-8: {}",
                path.display()
            ))),
        }
    }

    /// Build a relative path from a remote path under `remote_root`
    ///
    /// # Errors
    /// Returns error if `path` is not below `remote_root`
    pub fn from_remote(remote_root: &str, path: &str) -> Result<Self, DomainError> {
        let root = remote_root.trim_end_matches('/');
        let rest = path
            .strip_prefix(root)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| {
                DomainError::InvalidPath(format!("{path} is not under {remote_root}"))
            })?;
        Self::new(rest)
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of components (`a.txt` is 1, `a/b.txt` is 2)
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.split('/').count()
    }

    /// Parent path, or `None` for top-level entries
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.rfind('/').map(|idx| Self(self.0[..idx].to_string()))
    }

    /// Final component
    #[must_use]
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Replace the final component
    ///
    /// # Errors
    /// Returns error if `name` is not a valid single component
    pub fn with_file_name(&self, name: &str) -> Result<Self, DomainError> {
        if name.contains('/') {
            return Err(DomainError::InvalidPath(format!(
                "Invalid path component: {name}"
            )));
        }
        match self.parent() {
            Some(parent) => Self::new(format!("{}/{name}", parent.0)),
            None => Self::new(name.to_string()),
        }
    }

    /// Returns true if `self` is a strict ancestor directory of `other`
    #[must_use]
    pub fn is_ancestor_of(&self, other: &RelativePath) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Returns true if the paths are equal or one contains the other
    #[must_use]
    pub fn is_related_to(&self, other: &RelativePath) -> bool {
        self == other || self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }

    /// Absolute local path under `root`
    #[must_use]
    pub fn to_local(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, c| acc.join(c))
    }

    /// Remote path under `remote_root`
    #[must_use]
    pub fn to_remote(&self, remote_root: &str) -> String {
        let root = remote_root.trim_end_matches('/');
        format!("{root}/{}", self.0)
    }
}

impl Display for RelativePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RelativePath {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RelativePath> for String {
    fn from(path: RelativePath) -> Self {
        path.0
    }
}

impl FromStr for RelativePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

// ============================================================================
// FileHash
// ============================================================================

/// Content hash of a file (lowercase hex SHA-256), or the directory marker
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileHash(String);

impl FileHash {
    /// Marker stored as the "hash" of a directory
    pub const DIRECTORY: &'static str = "directory";

    /// Create a new FileHash
    ///
    /// # Errors
    /// Returns error if the hash is empty or contains non-alphanumeric characters
    pub fn new(hash: impl Into<String>) -> Result<Self, DomainError> {
        let hash = hash.into();
        if hash.is_empty() {
            return Err(DomainError::InvalidHash("Hash cannot be empty".to_string()));
        }
        if !hash.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::InvalidHash(format!(
                "Hash must be alphanumeric: {hash}"
            )));
        }
        Ok(Self(hash.to_ascii_lowercase()))
    }

    /// The directory marker hash
    #[must_use]
    pub fn directory() -> Self {
        Self(Self::DIRECTORY.to_string())
    }

    /// Returns true for the directory marker
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.0 == Self::DIRECTORY
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl Display for FileHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FileHash {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FileHash> for String {
    fn from(hash: FileHash) -> Self {
        hash.0
    }
}
