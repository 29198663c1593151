use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};

use crate::SyncError;

/// Globally unique operation id: `<participant>-<counter>`.
///
/// Counters start at 0 and increase by one per operation a participant
/// creates. Ids order by participant, then counter; the order only serves
/// as a deterministic tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "SmolStr", into = "SmolStr")]
pub struct OperationId {
    participant: SmolStr,
    counter: u64,
}

impl OperationId {
    pub fn new(participant: impl Into<SmolStr>, counter: u64) -> Self {
        Self {
            participant: participant.into(),
            counter,
        }
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.participant, self.counter)
    }
}

impl FromStr for OperationId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Participant ids may contain '-', the counter never does.
        let (participant, counter) = s
            .rsplit_once('-')
            .ok_or_else(|| SyncError::Malformed(format!("operation id {s:?}")))?;
        let counter = counter
            .parse()
            .map_err(|_| SyncError::Malformed(format!("operation id {s:?}")))?;
        if participant.is_empty() {
            return Err(SyncError::Malformed(format!("operation id {s:?}")));
        }
        Ok(Self::new(participant, counter))
    }
}

impl TryFrom<SmolStr> for OperationId {
    type Error = SyncError;

    fn try_from(value: SmolStr) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OperationId> for SmolStr {
    fn from(id: OperationId) -> Self {
        format_smolstr!("{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_participant_with_dashes() {
        let id: OperationId = "alice-laptop-7".parse().unwrap();
        assert_eq!(id.participant(), "alice-laptop");
        assert_eq!(id.counter(), 7);
        assert_eq!(id.to_string(), "alice-laptop-7");
    }

    #[test]
    fn test_parse_rejects_missing_counter() {
        assert!("alice".parse::<OperationId>().is_err());
        assert!("alice-x".parse::<OperationId>().is_err());
        assert!("-3".parse::<OperationId>().is_err());
    }

    #[test]
    fn test_serializes_as_string() {
        let id = OperationId::new("bob", 12);
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""bob-12""#);
    }
}
