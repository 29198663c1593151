//! Edits in model coordinates and the tie-break between concurrent inserts.

use std::ops::Range;

use smallvec::{SmallVec, smallvec};

use crate::{Operation, OperationId};

/// Deleted model ranges: sorted, disjoint, non-empty.
pub type Ranges = SmallVec<[Range<usize>; 2]>;

/// An edit in model coordinates.
///
/// Unlike [`Operation`], a delete may cover several ranges: an insert that
/// lands inside a concurrently deleted range splits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Insert { position: usize, characters: String },
    Delete { ranges: Ranges },
}

impl Edit {
    pub fn from_operation(operation: &Operation) -> Self {
        match operation {
            Operation::Insert(op) => Edit::Insert {
                position: op.position(),
                characters: op.characters().to_string(),
            },
            Operation::Delete(op) => {
                let start = op.position();
                let ranges = if op.length() == 0 {
                    SmallVec::new()
                } else {
                    smallvec![start..start + op.length()]
                };
                Edit::Delete { ranges }
            }
        }
    }

    /// One past the largest model offset this edit touches.
    pub(crate) fn extent(&self) -> usize {
        match self {
            Edit::Insert { position, .. } => *position,
            Edit::Delete { ranges } => ranges.last().map_or(0, |r| r.end),
        }
    }
}

/// An operation as recorded in history after transformation.
///
/// Carries the same id as the operation it came from. Its previous id is
/// the last concurrent operation it was transformed past, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedOperation {
    pub id: OperationId,
    pub previous_operation_id: Option<OperationId>,
    pub edit: Edit,
}

impl TransformedOperation {
    pub fn from_operation(operation: &Operation) -> Self {
        Self {
            id: operation.id().clone(),
            previous_operation_id: operation.previous_operation_id().cloned(),
            edit: Edit::from_operation(operation),
        }
    }

}

/// Model slots where a concurrent insert may still land.
///
/// Starts as the run of slots between the insert's neighbours in its
/// author's state, none of them known to the author. Each concurrent
/// insert found inside the run, taken in the order applied here, narrows
/// it: equal positions keep the smaller operation id on the left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Gap {
    start: usize,
    end: usize,
}

impl Gap {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn is_closed(&self) -> bool {
        self.start == self.end
    }

    /// Account for the insert `other`, whose characters occupy slots
    /// `first..=last`. Slots of one insert never straddle an edge of the gap.
    pub fn include(&mut self, own: &OperationId, other: &OperationId, first: usize, last: usize) {
        if first < self.start || first >= self.end {
            return;
        }
        if own < other {
            self.end = first;
        } else {
            self.start = last + 1;
        }
    }

    /// Where the insert lands once every concurrent insert is accounted for.
    pub fn position(&self) -> usize {
        self.start
    }
}
