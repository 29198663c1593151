//! The document model: every character ever inserted, deleted ones kept as
//! tombstones.

use std::ops::Range;

use crate::transform::Ranges;
use crate::{Edit, SyncError};

/// A change to the visible text, in char offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TextChange {
    Insert { offset: usize, text: String },
    Delete { offset: usize, len: usize },
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Document {
    visible: Vec<bool>,
    /// History index of the insert that created each slot, `None` for the
    /// text the document started with.
    owners: Vec<Option<usize>>,
    visible_len: usize,
}

impl Document {
    pub fn with_len(len: usize) -> Self {
        Self {
            visible: vec![true; len],
            owners: vec![None; len],
            visible_len: len,
        }
    }

    /// Model length, tombstones included.
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn visible_len(&self) -> usize {
        self.visible_len
    }

    fn visible_before(&self, model: usize) -> usize {
        self.visible[..model].iter().filter(|v| **v).count()
    }

    /// Model index of the `n`th visible character, or the model length.
    fn nth_visible(&self, n: usize) -> usize {
        self.visible
            .iter()
            .enumerate()
            .filter(|(_, v)| **v)
            .nth(n)
            .map_or(self.visible.len(), |(i, _)| i)
    }

    /// Model position for inserting at visible offset `offset`.
    ///
    /// The insert lands right after the preceding visible character.
    pub fn insert_position(&self, offset: usize) -> Result<usize, SyncError> {
        if offset > self.visible_len {
            return Err(SyncError::PositionOutOfBounds {
                position: offset,
                len: self.visible_len,
            });
        }
        if offset == 0 {
            return Ok(0);
        }
        Ok(self.nth_visible(offset - 1) + 1)
    }

    /// Model range covering `len` visible characters from `offset`.
    pub fn delete_range(&self, offset: usize, len: usize) -> Result<Range<usize>, SyncError> {
        let end = offset.saturating_add(len);
        if end > self.visible_len {
            return Err(SyncError::PositionOutOfBounds {
                position: end,
                len: self.visible_len,
            });
        }
        if len == 0 {
            let at = self.insert_position(offset)?;
            return Ok(at..at);
        }
        let start = self.nth_visible(offset);
        let last = self.nth_visible(end - 1);
        Ok(start..last + 1)
    }

    /// Model slots of the characters an earlier state held, in order.
    ///
    /// `known(entry)` tells whether history entry `entry` was part of that
    /// state. The starting text always is.
    pub fn known_slots(&self, known: impl Fn(usize) -> bool) -> Vec<usize> {
        self.owners
            .iter()
            .enumerate()
            .filter(|(_, owner)| owner.is_none_or(|entry| known(entry)))
            .map(|(slot, _)| slot)
            .collect()
    }

    /// First and last slot of each of the first `entries` history entries,
    /// `None` for entries that inserted nothing.
    pub fn spans(&self, entries: usize) -> Vec<Option<(usize, usize)>> {
        let mut spans = vec![None; entries];
        for (slot, owner) in self.owners.iter().enumerate() {
            let Some(entry) = owner else { continue };
            match &mut spans[*entry] {
                Some((_, last)) => *last = slot,
                span @ None => *span = Some((slot, slot)),
            }
        }
        spans
    }

    /// Check that `edit` fits this model without applying it.
    pub fn check(&self, edit: &Edit) -> Result<(), SyncError> {
        let extent = edit.extent();
        if extent > self.len() {
            return Err(SyncError::PositionOutOfBounds {
                position: extent,
                len: self.len(),
            });
        }
        Ok(())
    }

    /// Apply `edit`, the history entry at index `owner`, and return the
    /// visible changes in application order.
    pub fn apply(&mut self, edit: &Edit, owner: usize) -> Result<Vec<TextChange>, SyncError> {
        self.check(edit)?;
        match edit {
            Edit::Insert {
                position,
                characters,
            } => {
                let count = characters.chars().count();
                if count == 0 {
                    return Ok(Vec::new());
                }
                let offset = self.visible_before(*position);
                self.visible
                    .splice(*position..*position, std::iter::repeat_n(true, count));
                self.owners
                    .splice(*position..*position, std::iter::repeat_n(Some(owner), count));
                self.visible_len += count;
                Ok(vec![TextChange::Insert {
                    offset,
                    text: characters.clone(),
                }])
            }
            Edit::Delete { ranges } => {
                // Right to left, so each change leaves earlier offsets valid.
                let mut changes = Vec::new();
                for range in ranges.iter().rev() {
                    let mut offset = self.visible_before(range.start);
                    let mut runs: Vec<(usize, usize)> = Vec::new();
                    let mut open = false;
                    for cell in &mut self.visible[range.clone()] {
                        if *cell {
                            match runs.last_mut() {
                                Some((_, len)) if open => *len += 1,
                                _ => runs.push((offset, 1)),
                            }
                            open = true;
                            offset += 1;
                            *cell = false;
                        } else {
                            open = false;
                        }
                    }
                    for (offset, len) in runs.into_iter().rev() {
                        self.visible_len -= len;
                        changes.push(TextChange::Delete { offset, len });
                    }
                }
                Ok(changes)
            }
        }
    }
}

/// Merge ascending slots into maximal runs.
pub(crate) fn runs(slots: &[usize]) -> Ranges {
    let mut out = Ranges::new();
    for &slot in slots {
        match out.last_mut() {
            Some(run) if run.end == slot => run.end += 1,
            _ => out.push(slot..slot + 1),
        }
    }
    out
}
