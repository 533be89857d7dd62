//! Mutation records: what the user asked for, what the backend is told,
//! and what to restore if the backend says no

use crate::types::{
    BoardId, Card, CardId, CardMeta, CardPatch, EntityRef, List, ListId, Position, RequestId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A local edit applied through [`OptimisticStore::apply`](super::OptimisticStore::apply)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    CreateList {
        title: String,
        index: usize,
    },
    CreateCard {
        list: ListId,
        title: String,
        index: usize,
    },
    MoveList {
        id: ListId,
        from_index: usize,
        to_index: usize,
    },
    /// Within one list when `from_list == to_list`, across lists otherwise
    MoveCard {
        id: CardId,
        from_list: ListId,
        from_index: usize,
        to_list: ListId,
        to_index: usize,
    },
    RenameList {
        id: ListId,
        title: String,
    },
    UpdateCard {
        id: CardId,
        patch: CardPatch,
    },
    /// Removes the list and every card in it
    DeleteList {
        id: ListId,
    },
    DeleteCard {
        id: CardId,
    },
}

/// Returned by `apply` for every mutation that changed local state
#[derive(Debug, Clone, PartialEq)]
pub struct MutationHandle {
    pub request_id: RequestId,
    pub entity: EntityRef,
    /// Repositions of siblings recorded alongside this mutation (rebalance)
    pub follow_ups: Vec<RequestId>,
}

/// Where a recorded mutation is in its round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    /// Waiting behind an older mutation of the same entity, or for its parent list
    Pending,
    /// Handed out by `take_ready`, awaiting confirmation or rejection
    InFlight,
}

/// The persistence call that makes the backend match a local mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum SyncOp {
    CreateList(List),
    CreateCard(Card),
    PositionList {
        id: ListId,
        board: BoardId,
        position: Position,
    },
    PositionCard {
        id: CardId,
        list: ListId,
        position: Position,
    },
    UpdateList(List),
    UpdateCard(Card),
    Delete(EntityRef),
}

impl SyncOp {
    /// The entity this call writes
    pub fn entity(&self) -> EntityRef {
        match self {
            Self::CreateList(list) | Self::UpdateList(list) => EntityRef::List(list.id.clone()),
            Self::CreateCard(card) | Self::UpdateCard(card) => EntityRef::Card(card.id.clone()),
            Self::PositionList { id, .. } => EntityRef::List(id.clone()),
            Self::PositionCard { id, .. } => EntityRef::Card(id.clone()),
            Self::Delete(entity) => entity.clone(),
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateList(_) => "create_list",
            Self::CreateCard(_) => "create_card",
            Self::PositionList { .. } | Self::PositionCard { .. } => "update_entity_position",
            Self::UpdateList(_) => "update_list",
            Self::UpdateCard(_) => "update_card",
            Self::Delete(_) => "delete_entity",
        }
    }
}

/// A request ready to be sent to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub request_id: RequestId,
    pub op: SyncOp,
}

/// What `on_rejected` did with a failed mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The entity was put back to its state before the mutation
    RolledBack(EntityRef),
    /// A newer local mutation exists; the entity keeps it and is flagged for resync
    Conflict(EntityRef),
    /// The entity has since been deleted locally; nothing to restore
    Superseded(EntityRef),
}

impl Resolution {
    pub fn entity(&self) -> &EntityRef {
        match self {
            Self::RolledBack(entity) | Self::Conflict(entity) | Self::Superseded(entity) => entity,
        }
    }
}

/// The smallest snapshot needed to undo a mutation
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BeforeState {
    /// The entity was created by this mutation
    Absent,
    ListPlacement { position: Position },
    CardPlacement { list: ListId, position: Position },
    ListTitle(String),
    CardFields { title: String, meta: CardMeta },
    DeletedList { list: List, cards: Vec<Card> },
    DeletedCard(Card),
}

/// Bookkeeping for one applied, unconfirmed mutation
#[derive(Debug, Clone)]
pub(crate) struct MutationRecord {
    pub request_id: RequestId,
    /// Store-wide application order
    pub seq: u64,
    pub entity: EntityRef,
    pub op: SyncOp,
    pub before: BeforeState,
    pub status: MutationStatus,
    /// Parent list whose creation must be confirmed first
    pub depends_on: Option<ListId>,
    pub applied_at: DateTime<Utc>,
}
