//! Drag-and-drop gestures.
//!
//! One [`DragReconciler`] per board holds the only gesture token for that
//! board. Hovering only tracks the visual target; nothing is mutated until
//! the item is dropped.

use crate::error::{KanbanError, Result};
use crate::store::{Mutation, MutationHandle, OptimisticStore};
use crate::types::{BoardId, CardId, ListId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The item being dragged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DragItem {
    Card(CardId),
    List(ListId),
}

/// A place an item can be dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DropTarget {
    /// Slot `index` of a list; only valid for cards
    Card { list: ListId, index: usize },
    /// Slot `index` on the board; only valid for lists
    List { index: usize },
}

/// An active gesture and its rollback point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gesture {
    pub item: DragItem,
    /// Origin list for cards, `None` for lists
    pub origin_list: Option<ListId>,
    pub origin_index: usize,
    /// Last target the pointer was over
    pub hover: Option<DropTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GestureState {
    #[default]
    Idle,
    Dragging(Gesture),
    /// Applying the drop; left before `drop_on` returns
    Committing(Gesture),
    /// Abandoned without a mutation; left before `drop_on`/`cancel` returns
    Cancelled(Gesture),
}

/// How a gesture ended
#[derive(Debug, Clone, PartialEq)]
pub enum GestureOutcome {
    /// The move was applied; `None` when it landed where it started
    Committed(Option<MutationHandle>),
    /// No valid target, nothing changed
    Cancelled,
}

/// Gesture state machine for one board
#[derive(Debug)]
pub struct DragReconciler {
    board: BoardId,
    state: GestureState,
}

impl DragReconciler {
    pub fn new(board: BoardId) -> Self {
        Self {
            board,
            state: GestureState::Idle,
        }
    }

    pub fn board(&self) -> &BoardId {
        &self.board
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, GestureState::Dragging(_))
    }

    /// Pick up an item, recording where it came from
    pub fn begin(&mut self, store: &OptimisticStore, item: DragItem) -> Result<()> {
        if self.is_dragging() {
            return Err(KanbanError::GestureAlreadyActive {
                board: self.board.to_string(),
            });
        }

        let (origin_list, origin_index) = match &item {
            DragItem::Card(id) => {
                let card = store.card(id).ok_or_else(|| KanbanError::unknown_item(id))?;
                (Some(card.list_id.clone()), store.card_index(id)?)
            }
            DragItem::List(id) => (None, store.list_index(id)?),
        };

        debug!(board = %self.board, ?item, ?origin_list, origin_index, "gesture started");
        self.state = GestureState::Dragging(Gesture {
            item,
            origin_list,
            origin_index,
            hover: None,
        });
        Ok(())
    }

    /// Track the target under the pointer
    pub fn hover(&mut self, target: Option<DropTarget>) -> Result<()> {
        match &mut self.state {
            GestureState::Dragging(gesture) => {
                gesture.hover = target;
                Ok(())
            }
            _ => Err(self.no_gesture()),
        }
    }

    /// Drop the item. A missing target, or one of the wrong kind, cancels.
    pub fn drop_on(
        &mut self,
        store: &mut OptimisticStore,
        target: Option<DropTarget>,
    ) -> Result<GestureOutcome> {
        let gesture = match std::mem::take(&mut self.state) {
            GestureState::Dragging(gesture) => gesture,
            other => {
                self.state = other;
                return Err(self.no_gesture());
            }
        };

        let Some(mutation) = Self::mutation_for(store, &gesture, target) else {
            self.finish(GestureState::Cancelled(gesture));
            return Ok(GestureOutcome::Cancelled);
        };

        self.state = GestureState::Committing(gesture.clone());
        let applied = store.apply(mutation);
        self.finish(GestureState::Committing(gesture));

        applied.map(GestureOutcome::Committed)
    }

    /// Abandon the gesture without changing anything
    pub fn cancel(&mut self) -> Result<()> {
        match std::mem::take(&mut self.state) {
            GestureState::Dragging(gesture) => {
                self.finish(GestureState::Cancelled(gesture));
                Ok(())
            }
            other => {
                self.state = other;
                Err(self.no_gesture())
            }
        }
    }

    fn mutation_for(
        store: &OptimisticStore,
        gesture: &Gesture,
        target: Option<DropTarget>,
    ) -> Option<Mutation> {
        match (&gesture.item, target?) {
            (DragItem::Card(id), DropTarget::Card { list, index }) => {
                // The card may have been moved by a rollback while it was held
                let from_list = store
                    .card(id)
                    .map(|card| card.list_id.clone())
                    .or_else(|| gesture.origin_list.clone())?;
                let from_index = store.card_index(id).unwrap_or(gesture.origin_index);
                Some(Mutation::MoveCard {
                    id: id.clone(),
                    from_list,
                    from_index,
                    to_list: list,
                    to_index: index,
                })
            }
            (DragItem::List(id), DropTarget::List { index }) => Some(Mutation::MoveList {
                id: id.clone(),
                from_index: store.list_index(id).unwrap_or(gesture.origin_index),
                to_index: index,
            }),
            _ => None,
        }
    }

    fn finish(&mut self, terminal: GestureState) {
        match &terminal {
            GestureState::Committing(gesture) => {
                debug!(board = %self.board, item = ?gesture.item, "gesture committed")
            }
            GestureState::Cancelled(gesture) => {
                debug!(board = %self.board, item = ?gesture.item, "gesture cancelled")
            }
            _ => {}
        }
        self.state = GestureState::Idle;
    }

    fn no_gesture(&self) -> KanbanError {
        KanbanError::NoActiveGesture {
            board: self.board.to_string(),
        }
    }
}
