use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::OperationId;

/// How many operations of each participant have been applied.
///
/// Operations of one participant are applied in counter order, so the
/// count alone names exactly which of them are included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector(BTreeMap<SmolStr, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `participant`'s operations included.
    pub fn get(&self, participant: &str) -> u64 {
        self.0.get(participant).copied().unwrap_or(0)
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        id.counter() < self.get(id.participant())
    }

    /// Include `id`, and with it every earlier operation of its participant.
    pub fn observe(&mut self, id: &OperationId) {
        let next = id.counter() + 1;
        match self.0.get_mut(id.participant()) {
            Some(count) => *count = (*count).max(next),
            None => {
                self.0.insert(id.participant().into(), next);
            }
        }
    }

    /// True when every operation included in `other` is included here.
    pub fn covers(&self, other: &VersionVector) -> bool {
        other
            .0
            .iter()
            .all(|(participant, count)| self.get(participant) >= *count)
    }

    /// Total number of operations included.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(p, c)| (p.as_str(), *c))
    }

    fn normalized(&self) -> impl Iterator<Item = (&SmolStr, &u64)> {
        self.0.iter().filter(|(_, c)| **c > 0)
    }

    /// Equality ignoring participants with a zero count.
    pub fn same_as(&self, other: &VersionVector) -> bool {
        self.normalized().eq(other.normalized())
    }
}
