//! Conflict domain entities
//!
//! A conflict is recorded when both sides of a path changed since the last
//! agreed state and the changes cannot be merged without choosing a side.
//! It blocks automatic work on its record until a resolution arrives.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ConflictId, FileHash, FolderId, RecordId, RelativePath};
use super::record::FileRecord;

/// One side of a conflict as observed when it was detected
///
/// A `None` hash means the path was deleted on that side.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    pub hash: Option<FileHash>,
    pub size: Option<u64>,
    pub mtime: Option<DateTime<Utc>>,
    /// Remote version token, only set on the remote side
    pub version: Option<String>,
}

impl VersionInfo {
    /// The side was deleted
    pub fn deleted() -> Self {
        Self::default()
    }

    pub fn is_deleted(&self) -> bool {
        self.hash.is_none()
    }

    /// Local side of a record
    pub fn local_of(record: &FileRecord) -> Self {
        match &record.local {
            Some(l) => Self {
                hash: Some(l.hash.clone()),
                size: Some(l.size),
                mtime: l.mtime,
                version: None,
            },
            None => Self::deleted(),
        }
    }

    /// Remote side of a record
    pub fn remote_of(record: &FileRecord) -> Self {
        match &record.remote {
            Some(r) => Self {
                hash: Some(r.hash.clone()),
                size: Some(r.size),
                mtime: r.mtime,
                version: Some(r.version.clone()),
            },
            None => Self::deleted(),
        }
    }
}

/// Shape of the divergence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides hold different content
    Content,
    /// One side deleted the path, the other edited it
    DeleteVsEdit,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::Content => "content",
            ConflictKind::DeleteVsEdit => "delete_vs_edit",
        }
    }
}

impl FromStr for ConflictKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(ConflictKind::Content),
            "delete_vs_edit" => Ok(ConflictKind::DeleteVsEdit),
            other => Err(DomainError::UnknownValue {
                kind: "conflict kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A user decision for a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the local version, overwriting remote
    KeepLocal,
    /// Keep the remote version, overwriting local
    KeepRemote,
    /// Keep both versions (the local copy is renamed with a conflict marker)
    KeepBoth,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::KeepLocal => "keep_local",
            Resolution::KeepRemote => "keep_remote",
            Resolution::KeepBoth => "keep_both",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep_local" | "keep-local" => Ok(Resolution::KeepLocal),
            "keep_remote" | "keep-remote" => Ok(Resolution::KeepRemote),
            "keep_both" | "keep-both" => Ok(Resolution::KeepBoth),
            other => Err(DomainError::UnknownValue {
                kind: "resolution",
                value: other.to_string(),
            }),
        }
    }
}

/// Resolution state of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictState {
    Pending,
    KeepLocal,
    KeepRemote,
    KeepBoth,
}

impl ConflictState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictState::Pending => "pending",
            ConflictState::KeepLocal => "keep_local",
            ConflictState::KeepRemote => "keep_remote",
            ConflictState::KeepBoth => "keep_both",
        }
    }

    pub fn resolution(&self) -> Option<Resolution> {
        match self {
            ConflictState::Pending => None,
            ConflictState::KeepLocal => Some(Resolution::KeepLocal),
            ConflictState::KeepRemote => Some(Resolution::KeepRemote),
            ConflictState::KeepBoth => Some(Resolution::KeepBoth),
        }
    }
}

impl From<Resolution> for ConflictState {
    fn from(r: Resolution) -> Self {
        match r {
            Resolution::KeepLocal => ConflictState::KeepLocal,
            Resolution::KeepRemote => ConflictState::KeepRemote,
            Resolution::KeepBoth => ConflictState::KeepBoth,
        }
    }
}

impl FromStr for ConflictState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConflictState::Pending),
            other => other.parse::<Resolution>().map(ConflictState::from),
        }
    }
}

/// A recorded divergence awaiting (or having received) a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub folder_id: FolderId,
    pub record_id: RecordId,
    pub relative_path: RelativePath,
    pub kind: ConflictKind,
    pub local: VersionInfo,
    pub remote: VersionInfo,
    pub state: ConflictState,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
    pub fn is_pending(&self) -> bool {
        self.state == ConflictState::Pending
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.state.resolution()
    }
}

/// A conflict to record, addressed by path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConflict {
    pub relative_path: RelativePath,
    pub kind: ConflictKind,
    pub local: VersionInfo,
    pub remote: VersionInfo,
}

impl NewConflict {
    /// Build a conflict from a record whose sides both diverged
    pub fn from_record(record: &FileRecord) -> Self {
        let local = VersionInfo::local_of(record);
        let remote = VersionInfo::remote_of(record);
        let kind = if local.is_deleted() || remote.is_deleted() {
            ConflictKind::DeleteVsEdit
        } else {
            ConflictKind::Content
        };
        Self {
            relative_path: record.relative_path.clone(),
            kind,
            local,
            remote,
        }
    }
}
