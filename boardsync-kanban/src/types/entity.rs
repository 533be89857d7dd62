//! References to persisted entities

use super::ids::{CardId, ListId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of entity crossing the persistence boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    List,
    Card,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => f.write_str("list"),
            Self::Card => f.write_str("card"),
        }
    }
}

/// A list or card, by id. Mutation bookkeeping is keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    List(ListId),
    Card(CardId),
}

impl EntityRef {
    /// The entity's kind
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::List(_) => EntityKind::List,
            Self::Card(_) => EntityKind::Card,
        }
    }

    /// The entity's id as a string
    pub fn id_str(&self) -> &str {
        match self {
            Self::List(id) => id.as_str(),
            Self::Card(id) => id.as_str(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id_str())
    }
}

impl From<ListId> for EntityRef {
    fn from(id: ListId) -> Self {
        Self::List(id)
    }
}

impl From<CardId> for EntityRef {
    fn from(id: CardId) -> Self {
        Self::Card(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ref_display() {
        let card = EntityRef::Card(CardId::from_string("c1"));
        assert_eq!(card.to_string(), "card:c1");
        assert_eq!(card.kind(), EntityKind::Card);
    }

    #[test]
    fn test_entity_ref_serialization() {
        let list = EntityRef::List(ListId::from_string("l1"));
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["kind"], "list");
        assert_eq!(json["id"], "l1");
    }
}
