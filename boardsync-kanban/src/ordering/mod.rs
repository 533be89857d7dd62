//! Ordering of siblings inside a container
//!
//! [`PositionAllocator`] computes keys; [`OrderedCollection`] keeps items
//! sorted per container and calls the allocator (and rebalance) on insert
//! and move.

mod allocator;
mod collection;

pub use allocator::PositionAllocator;
pub use collection::{OrderedCollection, OrderedItems, Placement, Sequenced, Shift};

use crate::types::{BoardId, Card, CardId, List, ListId, Position};

impl Sequenced for List {
    type Id = ListId;
    type Container = BoardId;
    const ITEM_TYPE: &'static str = "list";

    fn id(&self) -> &ListId {
        &self.id
    }

    fn container(&self) -> &BoardId {
        &self.board_id
    }

    fn position(&self) -> Position {
        self.position
    }

    fn place(&mut self, container: BoardId, position: Position) {
        self.board_id = container;
        self.position = position;
    }
}

impl Sequenced for Card {
    type Id = CardId;
    type Container = ListId;
    const ITEM_TYPE: &'static str = "card";

    fn id(&self) -> &CardId {
        &self.id
    }

    fn container(&self) -> &ListId {
        &self.list_id
    }

    fn position(&self) -> Position {
        self.position
    }

    fn place(&mut self, container: ListId, position: Position) {
        self.list_id = container;
        self.position = position;
    }
}
