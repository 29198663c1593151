use serde::{Deserialize, Serialize};

use crate::{OperationId, VersionVector};

/// Insert `characters` at model `position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOperation {
    id: OperationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous_operation_id: Option<OperationId>,
    characters: String,
    position: usize,
    #[serde(default)]
    context: VersionVector,
}

/// Delete `length` model characters starting at `position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOperation {
    id: OperationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous_operation_id: Option<OperationId>,
    position: usize,
    length: usize,
    #[serde(default)]
    context: VersionVector,
}

/// A text edit as created by its author. Immutable once created.
///
/// `previous_operation_id` is the last operation the author had applied;
/// `context` names every operation the author had applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Operation {
    Insert(InsertOperation),
    Delete(DeleteOperation),
}

impl InsertOperation {
    pub fn new(
        id: OperationId,
        previous_operation_id: Option<OperationId>,
        characters: impl Into<String>,
        position: usize,
        context: VersionVector,
    ) -> Self {
        Self {
            id,
            previous_operation_id,
            characters: characters.into(),
            position,
            context,
        }
    }

    pub fn characters(&self) -> &str {
        &self.characters
    }

    /// Inserted length in chars.
    pub fn len(&self) -> usize {
        self.characters.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl DeleteOperation {
    pub fn new(
        id: OperationId,
        previous_operation_id: Option<OperationId>,
        position: usize,
        length: usize,
        context: VersionVector,
    ) -> Self {
        Self {
            id,
            previous_operation_id,
            position,
            length,
            context,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Operation {
    pub fn id(&self) -> &OperationId {
        match self {
            Operation::Insert(op) => &op.id,
            Operation::Delete(op) => &op.id,
        }
    }

    pub fn previous_operation_id(&self) -> Option<&OperationId> {
        match self {
            Operation::Insert(op) => op.previous_operation_id.as_ref(),
            Operation::Delete(op) => op.previous_operation_id.as_ref(),
        }
    }

    pub fn context(&self) -> &VersionVector {
        match self {
            Operation::Insert(op) => &op.context,
            Operation::Delete(op) => &op.context,
        }
    }

    pub fn position(&self) -> usize {
        match self {
            Operation::Insert(op) => op.position,
            Operation::Delete(op) => op.position,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Operation::Insert(_))
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl From<InsertOperation> for Operation {
    fn from(op: InsertOperation) -> Self {
        Operation::Insert(op)
    }
}

impl From<DeleteOperation> for Operation {
    fn from(op: DeleteOperation) -> Self {
        Operation::Delete(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_wire_format() {
        let mut context = VersionVector::new();
        context.observe(&OperationId::new("bob", 0));
        let op: Operation = InsertOperation::new(
            OperationId::new("alice", 3),
            Some(OperationId::new("bob", 0)),
            "s",
            3,
            context,
        )
        .into();

        insta::assert_json_snapshot!(op, @r#"
        {
          "kind": "insert",
          "id": "alice-3",
          "previousOperationId": "bob-0",
          "characters": "s",
          "position": 3,
          "context": {
            "bob": 1
          }
        }
        "#);
    }

    #[test]
    fn test_first_delete_has_no_previous() {
        let op: Operation = DeleteOperation::new(
            OperationId::new("alice", 0),
            None,
            1,
            2,
            VersionVector::new(),
        )
        .into();

        insta::assert_json_snapshot!(op, @r#"
        {
          "kind": "delete",
          "id": "alice-0",
          "position": 1,
          "length": 2,
          "context": {}
        }
        "#);
    }

    #[test]
    fn test_insert_len_counts_chars() {
        let op = InsertOperation::new(
            OperationId::new("a", 0),
            None,
            "héllo",
            0,
            VersionVector::new(),
        );
        assert_eq!(op.len(), 5);
    }
}
