//! Divergence classification and rename detection
//!
//! Compares each record's local and remote observations with the last
//! state both sides agreed on, and recognises renames so they can be
//! replayed as moves instead of a delete plus a fresh transfer.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use foldsync_core::domain::{
    FileHash, FileRecord, NewConflict, NewOperation, OperationKind, RelativePath,
};

/// How a record's two sides relate to the last agreed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Divergence {
    /// Both sides match the agreed state
    InSync,
    /// Both sides hold the same content, which differs from the agreed state
    Converged(FileHash),
    /// The path is gone from both sides
    BothAbsent,
    /// Only the local side moved away from the agreed state
    LocalChanged,
    /// Only the remote side moved away from the agreed state
    RemoteChanged,
    /// Both sides moved to different states
    Conflict(NewConflict),
}

/// Classifies records against their last agreed state
pub struct ConflictDetector;

impl ConflictDetector {
    /// Three-way comparison of local, remote and last-synced hashes
    pub fn classify(record: &FileRecord) -> Divergence {
        let local = record.local_hash();
        let remote = record.remote_hash();

        if local == remote {
            return match local {
                None => Divergence::BothAbsent,
                Some(hash) if record.last_synced_hash.as_ref() == Some(hash) => {
                    Divergence::InSync
                }
                Some(hash) => Divergence::Converged(hash.clone()),
            };
        }

        match (record.local_changed(), record.remote_changed()) {
            (true, false) => Divergence::LocalChanged,
            (false, true) => Divergence::RemoteChanged,
            _ => {
                let conflict = NewConflict::from_record(record);
                info!(
                    path = %record.relative_path,
                    kind = conflict.kind.as_str(),
                    local = ?conflict.local.hash.as_ref().map(|h| h.short()),
                    remote = ?conflict.remote.hash.as_ref().map(|h| h.short()),
                    "Conflict detected: both sides changed"
                );
                Divergence::Conflict(conflict)
            }
        }
    }
}

/// A rename replayed on the other side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameMatch {
    pub from: RelativePath,
    pub to: RelativePath,
    pub operation: NewOperation,
}

/// Pairs vanished paths with new paths carrying the same content
pub struct RenameDetector;

impl RenameDetector {
    /// Finds renames among `records`
    ///
    /// A local rename shows up as a record that vanished locally while its
    /// remote side still exists, plus a new local-only record whose hash is
    /// the vanished record's agreed hash. It is replayed as `move_remote`.
    /// Remote renames are the mirror image and become `move_local`. The
    /// side that did not rename may have edited the old path; the move
    /// carries that edit to the new path, where the next pass picks it up.
    ///
    /// Each record takes part in at most one match. Candidates with the same
    /// file name are preferred, then path order.
    pub fn detect(records: &[&FileRecord]) -> Vec<RenameMatch> {
        let mut matches = Vec::new();
        let mut used: HashSet<&RelativePath> = HashSet::new();

        for side in [Side::Local, Side::Remote] {
            let mut targets: BTreeMap<&FileHash, Vec<&FileRecord>> = BTreeMap::new();
            for record in records.iter().copied().filter(|r| side.is_new(r)) {
                if let Some(hash) = side.present_hash(record) {
                    targets.entry(hash).or_default().push(record);
                }
            }
            if targets.is_empty() {
                continue;
            }

            let mut sources: Vec<&FileRecord> = records
                .iter()
                .copied()
                .filter(|r| side.vanished(r))
                .collect();
            sources.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

            for source in sources {
                if used.contains(&source.relative_path) {
                    continue;
                }
                let Some(agreed) = source.last_synced_hash.as_ref() else {
                    continue;
                };
                let Some(candidates) = targets.get(agreed) else {
                    continue;
                };

                let free = candidates
                    .iter()
                    .filter(|t| !used.contains(&t.relative_path));
                let target = free
                    .clone()
                    .find(|t| t.relative_path.file_name() == source.relative_path.file_name())
                    .or_else(|| free.min_by(|a, b| a.relative_path.cmp(&b.relative_path)));
                let Some(target) = target else {
                    continue;
                };

                used.insert(&source.relative_path);
                used.insert(&target.relative_path);
                debug!(
                    from = %source.relative_path,
                    to = %target.relative_path,
                    side = side.as_str(),
                    "Rename detected"
                );
                matches.push(RenameMatch {
                    from: source.relative_path.clone(),
                    to: target.relative_path.clone(),
                    operation: side.replay(source, target, agreed),
                });
            }
        }

        matches
    }
}

/// Side on which the rename happened
#[derive(Debug, Clone, Copy)]
enum Side {
    Local,
    Remote,
}

impl Side {
    fn as_str(&self) -> &'static str {
        match self {
            Side::Local => "local",
            Side::Remote => "remote",
        }
    }

    /// Gone from this side, still present on the other, previously agreed
    fn vanished(&self, record: &FileRecord) -> bool {
        if record.is_dir || record.last_synced_hash.is_none() {
            return false;
        }
        match self {
            Side::Local => record.local.is_none() && record.remote.is_some(),
            Side::Remote => record.remote.is_none() && record.local.is_some(),
        }
    }

    /// Present only on this side and never agreed on
    fn is_new(&self, record: &FileRecord) -> bool {
        if record.is_dir || record.last_synced_hash.is_some() {
            return false;
        }
        match self {
            Side::Local => record.local.is_some() && record.remote.is_none(),
            Side::Remote => record.remote.is_some() && record.local.is_none(),
        }
    }

    fn present_hash<'a>(&self, record: &'a FileRecord) -> Option<&'a FileHash> {
        match self {
            Side::Local => record.local_hash(),
            Side::Remote => record.remote_hash(),
        }
    }

    fn replay(&self, source: &FileRecord, target: &FileRecord, agreed: &FileHash) -> NewOperation {
        match self {
            Side::Local => NewOperation::new(OperationKind::MoveRemote, source.relative_path.clone())
                .with_destination(target.relative_path.clone())
                .with_content_hash(Some(agreed.clone()))
                .with_remote_guard(source.remote_version().map(str::to_string)),
            Side::Remote => NewOperation::new(OperationKind::MoveLocal, source.relative_path.clone())
                .with_destination(target.relative_path.clone())
                .with_content_hash(Some(agreed.clone()))
                .with_local_guard(source.local_hash().cloned()),
        }
    }
}
