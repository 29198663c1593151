//! SyncController - one participant's view of one document.

use std::collections::{HashMap, HashSet};

use smol_str::SmolStr;
use tracing::{debug, trace};

use crate::document::{Document, TextChange, runs};
use crate::transform::Gap;
use crate::{
    DeleteOperation, Edit, InsertOperation, Operation, OperationId, StringTarget, SyncError,
    TextTarget, TransformedOperation, VersionVector,
};

/// Which path [`SyncController::apply_operation`] took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The operation was created on exactly this state and applied as is.
    FastPath,
    /// The operation was transformed past `concurrent` historical operations.
    Transformed { concurrent: usize },
    /// The operation had already been applied; nothing changed.
    Duplicate,
}

/// One applied operation.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    original: Operation,
    applied: TransformedOperation,
}

impl HistoryEntry {
    pub fn id(&self) -> &OperationId {
        self.original.id()
    }

    /// The operation as its author created it.
    pub fn original(&self) -> &Operation {
        &self.original
    }

    /// The operation as applied here.
    pub fn applied(&self) -> &TransformedOperation {
        &self.applied
    }
}

/// Applies local and remote operations to one [`TextTarget`] so that every
/// participant converges on the same text.
///
/// History is append-only and ordered by application here. Each
/// participant's operations must be applied in the order they were created,
/// and a participant applies each operation it creates before creating the
/// next one.
pub struct SyncController<T> {
    participant: SmolStr,
    counter: u64,
    history: Vec<HistoryEntry>,
    index: HashMap<OperationId, usize>,
    version: VersionVector,
    document: Document,
    target: T,
    disposed: bool,
}

impl<T: TextTarget> SyncController<T> {
    /// Create a controller for `participant`, a globally unique id.
    pub fn new(participant: impl Into<SmolStr>, target: T) -> Self {
        let document = Document::with_len(target.len_chars());
        Self {
            participant: participant.into(),
            counter: 0,
            history: Vec::new(),
            index: HashMap::new(),
            version: VersionVector::new(),
            document,
            target,
            disposed: false,
        }
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    pub fn last_operation_id(&self) -> Option<&OperationId> {
        self.history.last().map(HistoryEntry::id)
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Every operation applied so far.
    pub fn version(&self) -> &VersionVector {
        &self.version
    }

    pub fn is_applied(&self, id: &OperationId) -> bool {
        self.index.contains_key(id)
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn into_target(self) -> T {
        self.target
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Stop accepting operations.
    pub fn dispose(&mut self) {
        self.disposed = true;
    }

    /// Start over from `base` with `operations` applied in order, taking
    /// over the state of a participant that has been editing longer.
    ///
    /// Fails without touching anything when an operation does not apply, or
    /// when this controller applied an operation missing from `operations`.
    pub fn seed(&mut self, base: &str, operations: &[Operation]) -> Result<(), SyncError> {
        if self.disposed {
            return Err(SyncError::Disposed);
        }
        let seeded: HashSet<&OperationId> = operations.iter().map(Operation::id).collect();
        if let Some(entry) = self.history.iter().find(|entry| !seeded.contains(entry.id())) {
            return Err(SyncError::SeedConflict {
                operation: entry.id().clone(),
            });
        }

        let mut scratch = SyncController::new(self.participant.clone(), StringTarget::new(base));
        for operation in operations {
            scratch.apply_operation(operation)?;
        }

        self.document = scratch.document;
        self.history = scratch.history;
        self.index = scratch.index;
        self.version = scratch.version;
        self.counter = self.counter.max(self.version.get(self.participant.as_str()));
        let text = scratch.target.into_string();
        let len = self.target.len_chars();
        self.target.delete(0, len);
        self.target.insert(&text, 0);
        debug!(participant = %self.participant, operations = operations.len(), "seeded controller");
        Ok(())
    }

    fn next_id(&mut self) -> OperationId {
        let id = OperationId::new(self.participant.clone(), self.counter);
        self.counter += 1;
        id
    }

    /// Create an insert of `characters` at char offset `position` of the
    /// current text. Does not apply it.
    pub fn create_insert_operation(
        &mut self,
        characters: impl Into<String>,
        position: usize,
    ) -> Result<Operation, SyncError> {
        let model = self.document.insert_position(position)?;
        let previous = self.last_operation_id().cloned();
        let context = self.version.clone();
        let id = self.next_id();
        Ok(InsertOperation::new(id, previous, characters, model, context).into())
    }

    /// Create a delete of `length` chars from char offset `position` of the
    /// current text. Does not apply it.
    pub fn create_delete_operation(
        &mut self,
        position: usize,
        length: usize,
    ) -> Result<Operation, SyncError> {
        let range = self.document.delete_range(position, length)?;
        let previous = self.last_operation_id().cloned();
        let context = self.version.clone();
        let id = self.next_id();
        Ok(DeleteOperation::new(id, previous, range.start, range.len(), context).into())
    }

    /// True unless `operation` was created on exactly the state of this
    /// controller.
    pub fn is_transformation_required(&self, operation: &Operation) -> bool {
        operation.previous_operation_id() != self.last_operation_id()
            || !operation.context().same_as(&self.version)
    }

    /// Apply a local or remote operation.
    ///
    /// Applying an operation twice is a no-op. An operation that fails a
    /// check leaves the controller and its target untouched.
    pub fn apply_operation(&mut self, operation: &Operation) -> Result<Applied, SyncError> {
        if self.disposed {
            return Err(SyncError::Disposed);
        }
        let id = operation.id();
        if self.is_applied(id) {
            debug!(operation = %id, "ignoring duplicate operation");
            return Ok(Applied::Duplicate);
        }
        self.check_causality(operation)?;

        let (applied, outcome) = if self.is_transformation_required(operation) {
            self.transform_incoming(operation)?
        } else {
            (
                TransformedOperation::from_operation(operation),
                Applied::FastPath,
            )
        };

        for change in self.document.apply(&applied.edit, self.history.len())? {
            match change {
                TextChange::Insert { offset, text } => self.target.insert(&text, offset),
                TextChange::Delete { offset, len } => self.target.delete(offset, len),
            }
        }

        self.version.observe(id);
        self.index.insert(id.clone(), self.history.len());
        self.history.push(HistoryEntry {
            original: operation.clone(),
            applied,
        });
        trace!(operation = %id, ?outcome, "operation applied");
        Ok(outcome)
    }

    fn check_causality(&self, operation: &Operation) -> Result<(), SyncError> {
        let id = operation.id();
        let expected = self.version.get(id.participant());
        if id.counter() != expected || operation.context().get(id.participant()) != id.counter() {
            return Err(SyncError::OutOfOrder {
                operation: id.clone(),
                expected,
            });
        }
        if let Some(previous) = operation.previous_operation_id() {
            if !self.is_applied(previous) {
                return Err(SyncError::UnknownPreviousOperation {
                    operation: id.clone(),
                    previous: previous.clone(),
                });
            }
        }
        for (participant, needed) in operation.context().iter() {
            let applied = self.version.get(participant);
            if applied < needed {
                return Err(SyncError::MissingDependency {
                    operation: id.clone(),
                    participant: participant.into(),
                    needed,
                    applied,
                });
            }
        }
        Ok(())
    }

    /// Place `operation` in the local model.
    ///
    /// Characters never move once inserted, so the author's state is the
    /// local model restricted to the slots the author knew. A delete maps
    /// its range through that projection. An insert lands between its
    /// neighbours in the author's state, ordered against the concurrent
    /// inserts between them in the order they were applied here.
    fn transform_incoming(
        &self,
        operation: &Operation,
    ) -> Result<(TransformedOperation, Applied), SyncError> {
        let context = operation.context();
        let known: Vec<bool> = self
            .history
            .iter()
            .map(|entry| context.contains(entry.id()))
            .collect();
        let slots = self.document.known_slots(|entry| known[entry]);
        let concurrent: Vec<usize> = (0..self.history.len()).filter(|&i| !known[i]).collect();

        let edit = match operation {
            Operation::Insert(op) => {
                let position = op.position();
                if position > slots.len() {
                    return Err(SyncError::PositionOutOfBounds {
                        position,
                        len: slots.len(),
                    });
                }
                let start = match position {
                    0 => 0,
                    n => slots[n - 1] + 1,
                };
                let end = slots.get(position).copied().unwrap_or(self.document.len());
                let mut gap = Gap::new(start, end);
                if !gap.is_closed() {
                    let spans = self.document.spans(self.history.len());
                    for &index in &concurrent {
                        if let Some((first, last)) = spans[index] {
                            gap.include(operation.id(), self.history[index].id(), first, last);
                        }
                    }
                }
                Edit::Insert {
                    position: gap.position(),
                    characters: op.characters().to_string(),
                }
            }
            Operation::Delete(op) => {
                let end = op.position().saturating_add(op.length());
                if end > slots.len() {
                    return Err(SyncError::PositionOutOfBounds {
                        position: end,
                        len: slots.len(),
                    });
                }
                Edit::Delete {
                    ranges: runs(&slots[op.position()..end]),
                }
            }
        };

        let previous_operation_id = match concurrent.last() {
            Some(&index) => Some(self.history[index].id().clone()),
            None => operation.previous_operation_id().cloned(),
        };
        debug!(
            operation = %operation.id(),
            concurrent = concurrent.len(),
            "transformed operation"
        );
        let applied = TransformedOperation {
            id: operation.id().clone(),
            previous_operation_id,
            edit,
        };
        Ok((
            applied,
            Applied::Transformed {
                concurrent: concurrent.len(),
            },
        ))
    }
}
