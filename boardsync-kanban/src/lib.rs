//! Ordered board/list/card engine with optimistic local-first mutations
//!
//! Lists on a board and cards in a list are kept in a stable total order using
//! fractional positions. Edits are applied locally at once and persisted in the
//! background; a rejected write is rolled back unless a newer local edit to the
//! same entity already replaced it.
//!
//! ## Overview
//!
//! - **Fractional positions** - an insert only computes one new key; siblings
//!   are rewritten only when precision runs out (rebalance)
//! - **Local first** - [`OptimisticStore::apply`] never waits on the backend
//! - **Last local intent wins** - rollbacks never discard a newer edit
//! - **One gesture per board** - [`DragReconciler`] owns the drag token
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use boardsync_kanban::{
//!     Board, DragItem, DragReconciler, DropTarget, InMemorySyncAdapter, Mutation,
//!     OptimisticStore, SyncDispatcher,
//! };
//! use tokio::sync::Mutex;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let board = Board::new("Roadmap");
//! let board_id = board.id.clone();
//! let mut store = OptimisticStore::new(board);
//!
//! let todo = store
//!     .apply(Mutation::CreateList { title: "Todo".into(), index: 0 })?
//!     .ok_or("list not created")?;
//! # let boardsync_kanban::EntityRef::List(todo) = todo.entity else { return Ok(()) };
//! let card = store
//!     .apply(Mutation::CreateCard { list: todo.clone(), title: "Ship it".into(), index: 0 })?
//!     .ok_or("card not created")?;
//! # let boardsync_kanban::EntityRef::Card(card) = card.entity else { return Ok(()) };
//!
//! let mut drag = DragReconciler::new(board_id);
//! drag.begin(&store, DragItem::Card(card))?;
//! drag.drop_on(&mut store, Some(DropTarget::Card { list: todo, index: 0 }))?;
//!
//! let store = Mutex::new(store);
//! let dispatcher = SyncDispatcher::new(InMemorySyncAdapter::new());
//! let report = dispatcher.drain(&store).await;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`types`] - ids, board entities and positions
//! - [`ordering`] - position allocation and per-container ordering
//! - [`store`] - optimistic state and mutation records
//! - [`drag`] - drag gesture state machine
//! - [`sync`] - persistence boundary, retry and timeout handling

pub mod drag;
pub mod error;
pub mod ordering;
pub mod store;
pub mod sync;
pub mod types;

pub use drag::{DragItem, DragReconciler, DropTarget, Gesture, GestureOutcome, GestureState};
pub use error::{KanbanError, Result};
pub use ordering::{OrderedCollection, OrderedItems, Placement, PositionAllocator, Sequenced, Shift};
pub use store::{
    DispatchRequest, Mutation, MutationHandle, MutationStatus, OptimisticStore, Resolution, SyncOp,
};
pub use sync::{
    Delivery, DrainReport, InMemorySyncAdapter, NoticeKind, RecordedCall, ScriptedFailure,
    SyncAdapter, SyncDispatcher, SyncFailure, SyncNotice, SyncStats, SyncStatsSnapshot,
};
pub use types::{
    Board, BoardId, Card, CardId, CardMeta, CardPatch, EntityKind, EntityRef, List, ListId,
    Position, RequestId,
};
