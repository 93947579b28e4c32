//! Output of a planning pass

use serde::{Deserialize, Serialize};

use super::conflict::NewConflict;
use super::newtypes::{FileHash, OperationId, RecordId};
use super::operation::NewOperation;

/// Everything one planning pass wants written to the journal
///
/// `operations` is already in execution order: directory creates by
/// ascending depth, then transfers and moves, then deletes by descending
/// depth. The journal assigns ids in this order, and ids break ties in the
/// FIFO ready queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Records whose sides reached identical content without an operation
    pub converged: Vec<(RecordId, FileHash)>,
    pub operations: Vec<NewOperation>,
    pub conflicts: Vec<NewConflict>,
    /// Failed operations replaced by different work in `operations`
    pub superseded: Vec<OperationId>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.converged.is_empty()
            && self.operations.is_empty()
            && self.conflicts.is_empty()
            && self.superseded.is_empty()
    }
}

/// What the journal did with a [`Plan`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanReport {
    pub enqueued: u64,
    /// Operations skipped because the record already had active work
    pub already_active: u64,
    pub superseded: u64,
    pub conflicts_created: u64,
    pub converged: u64,
}
