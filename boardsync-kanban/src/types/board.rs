//! Board-level types: Board, List, Card

use super::ids::{BoardId, CardId, ListId};
use super::position::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The board - owns its lists, which own their cards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Board {
    /// Create a new board with the given title
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: BoardId::new(),
            title: title.into(),
            created_at: Utc::now(),
        }
    }

    /// Use an existing id (e.g. one loaded from the backend)
    pub fn with_id(mut self, id: impl Into<BoardId>) -> Self {
        self.id = id.into();
        self
    }
}

/// A list (column) on a board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct List {
    pub id: ListId,
    /// Back-reference to the owning board
    pub board_id: BoardId,
    pub title: String,
    pub position: Position,
}

impl List {
    /// Create a list; its position is assigned when it is inserted
    pub fn new(board_id: BoardId, title: impl Into<String>) -> Self {
        Self {
            id: ListId::new(),
            board_id,
            title: title.into(),
            position: Position::new(0.0),
        }
    }

    /// Use an existing id
    pub fn with_id(mut self, id: impl Into<ListId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the position (snapshots loaded from persistence)
    pub fn at(mut self, position: impl Into<Position>) -> Self {
        self.position = position.into();
        self
    }
}

/// Free-form card content that does not affect ordering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardMeta {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
}

/// A card in a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    /// Back-reference to the containing list
    pub list_id: ListId,
    pub title: String,
    pub position: Position,
    #[serde(default)]
    pub meta: CardMeta,
}

impl Card {
    /// Create a card; its position is assigned when it is inserted
    pub fn new(list_id: ListId, title: impl Into<String>) -> Self {
        Self {
            id: CardId::new(),
            list_id,
            title: title.into(),
            position: Position::new(0.0),
            meta: CardMeta::default(),
        }
    }

    /// Use an existing id
    pub fn with_id(mut self, id: impl Into<CardId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the position (snapshots loaded from persistence)
    pub fn at(mut self, position: impl Into<Position>) -> Self {
        self.position = position.into();
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.meta.description = description.into();
        self
    }
}

/// Partial update of a card's non-ordering fields.
///
/// `None` leaves a field untouched. `cover: Some(None)` clears the cover.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<Option<String>>,
}

impl CardPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn with_cover(mut self, cover: Option<String>) -> Self {
        self.cover = Some(cover);
        self
    }

    /// Apply to a card, returning whether anything changed
    pub fn apply_to(&self, card: &mut Card) -> bool {
        let before = (card.title.clone(), card.meta.clone());

        if let Some(title) = &self.title {
            card.title = title.clone();
        }
        if let Some(description) = &self.description {
            card.meta.description = description.clone();
        }
        if let Some(labels) = &self.labels {
            card.meta.labels = labels.clone();
        }
        if let Some(cover) = &self.cover {
            card.meta.cover = cover.clone();
        }

        before != (card.title.clone(), card.meta.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_creation() {
        let board = Board::new("Test Board");
        assert_eq!(board.title, "Test Board");
        assert_eq!(board.id.as_str().len(), 26);
    }

    #[test]
    fn test_card_builders() {
        let list = ListId::from_string("l1");
        let card = Card::new(list.clone(), "Card")
            .with_id("c1")
            .at(2.0)
            .with_description("details");
        assert_eq!(card.id.as_str(), "c1");
        assert_eq!(card.list_id, list);
        assert_eq!(card.position, Position::new(2.0));
        assert_eq!(card.meta.description, "details");
    }

    #[test]
    fn test_patch_reports_changes() {
        let mut card = Card::new(ListId::from_string("l1"), "Card");

        assert!(!CardPatch::new().apply_to(&mut card));
        assert!(!CardPatch::new().with_title("Card").apply_to(&mut card));

        let patch = CardPatch::new()
            .with_labels(vec!["urgent".into()])
            .with_cover(Some("cover.png".into()));
        assert!(patch.apply_to(&mut card));
        assert_eq!(card.meta.labels, vec!["urgent".to_string()]);
        assert_eq!(card.meta.cover.as_deref(), Some("cover.png"));

        assert!(CardPatch::new().with_cover(None).apply_to(&mut card));
        assert!(card.meta.cover.is_none());
    }

    #[test]
    fn test_card_serialization() {
        let card = Card::new(ListId::from_string("l1"), "Card").with_id("c1");
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["list_id"], "l1");
        assert!(json["meta"].get("cover").is_none());

        let parsed: Card = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, card);
    }
}
