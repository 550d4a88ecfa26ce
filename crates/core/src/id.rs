//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of an inventory record.
///
/// Ids are positive and densely assigned from 1. They are not stable: a delete
/// may renumber every record above the deleted one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct ItemId(i64);

impl ItemId {
    /// The first id handed out by an empty store.
    pub const FIRST: ItemId = ItemId(1);

    /// Build an id from a raw value, rejecting anything below 1.
    pub fn new(value: i64) -> Result<Self, DomainError> {
        if value < 1 {
            return Err(DomainError::invalid_id(format!(
                "ItemId must be positive, got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// The id that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl core::fmt::Display for ItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<ItemId> for i64 {
    fn from(value: ItemId) -> Self {
        value.0
    }
}

impl TryFrom<i64> for ItemId {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl FromStr for ItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<i64>()
            .map_err(|e| DomainError::invalid_id(format!("ItemId: {e}")))?;
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_integers() {
        let id: ItemId = "42".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.next().get(), 43);
    }

    #[test]
    fn rejects_zero_negative_and_garbage() {
        for raw in ["0", "-3", "abc", "", "1.5"] {
            let err = raw.parse::<ItemId>().unwrap_err();
            assert!(matches!(err, DomainError::InvalidId(_)), "input {raw:?}");
        }
    }

    #[test]
    fn serializes_as_plain_number() {
        let id = ItemId::new(7).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
        let back: ItemId = serde_json::from_str("7").unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ItemId>("0").is_err());
    }
}
