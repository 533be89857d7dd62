//! Local-first board state.
//!
//! Every mutation is applied to the in-memory board immediately and recorded
//! with the before-state needed to undo it. Records leave the store through
//! [`OptimisticStore::take_ready`] and come back as a confirmation or a
//! rejection. Only the oldest record of an entity is ever handed out, so
//! confirmations and rollbacks for one entity resolve in the order the user
//! made the edits.

use super::mutation::{
    BeforeState, DispatchRequest, Mutation, MutationHandle, MutationRecord, MutationStatus,
    Resolution, SyncOp,
};
use crate::error::{KanbanError, Result};
use crate::ordering::{OrderedCollection, OrderedItems, Placement, PositionAllocator, Shift};
use crate::types::{
    Board, BoardId, Card, CardId, CardPatch, EntityRef, List, ListId, Position, RequestId,
};
use boardsync_common::Pretty;
use boardsync_config::SyncConfig;
use chrono::Utc;
use indexmap::IndexSet;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Where a card in a list whose creation was rejected came from
enum CardOrigin {
    Created,
    Moved { list: ListId, position: Position },
    Unknown,
}

/// In-memory state of one board plus its unconfirmed mutations
#[derive(Debug)]
pub struct OptimisticStore {
    board: Board,
    lists: OrderedCollection<List>,
    cards: OrderedCollection<Card>,
    records: HashMap<RequestId, MutationRecord>,
    /// Unresolved request ids per entity, oldest first
    queues: HashMap<EntityRef, VecDeque<RequestId>>,
    /// Sequence number of the newest mutation applied to each entity
    last_seq: HashMap<EntityRef, u64>,
    next_seq: u64,
    resync: IndexSet<EntityRef>,
}

impl OptimisticStore {
    /// Create an empty store for a board
    pub fn new(board: Board) -> Self {
        Self::with_allocator(board, PositionAllocator::default())
    }

    /// Create an empty store using the ordering settings from configuration
    pub fn from_config(board: Board, config: &SyncConfig) -> Result<Self> {
        Ok(Self::with_allocator(
            board,
            PositionAllocator::new(config.ordering.step)?,
        ))
    }

    /// Create an empty store with a specific allocator
    pub fn with_allocator(board: Board, allocator: PositionAllocator) -> Self {
        let mut lists = OrderedCollection::new(allocator);
        lists.add_container(board.id.clone());

        Self {
            board,
            lists,
            cards: OrderedCollection::new(allocator),
            records: HashMap::new(),
            queues: HashMap::new(),
            last_seq: HashMap::new(),
            next_seq: 0,
            resync: IndexSet::new(),
        }
    }

    // =========================================================================
    // Loading persisted state
    // =========================================================================

    /// Load an already-persisted list without recording a mutation
    pub fn hydrate_list(&mut self, list: List) -> Result<()> {
        self.check_board(&list)?;
        let id = list.id.clone();
        self.lists.reinsert(list)?;
        self.cards.add_container(id);
        Ok(())
    }

    /// Load an already-persisted card without recording a mutation
    pub fn hydrate_card(&mut self, card: Card) -> Result<()> {
        self.cards.reinsert(card)?;
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Lists of a board in display order
    pub fn list_containers(&self, board_id: &BoardId) -> Result<OrderedItems<'_, List>> {
        self.lists.ordered_items(board_id)
    }

    /// Cards of a list in display order
    pub fn list_items(&self, list_id: &ListId) -> Result<OrderedItems<'_, Card>> {
        self.cards.ordered_items(list_id)
    }

    pub fn list(&self, id: &ListId) -> Option<&List> {
        self.lists.get(id)
    }

    pub fn card(&self, id: &CardId) -> Option<&Card> {
        self.cards.get(id)
    }

    /// Index of a list on the board
    pub fn list_index(&self, id: &ListId) -> Result<usize> {
        self.lists.index_of(id)
    }

    /// Index of a card in its list
    pub fn card_index(&self, id: &CardId) -> Result<usize> {
        self.cards.index_of(id)
    }

    /// Status of an unresolved request, `None` once it is confirmed or rejected
    pub fn status(&self, request_id: &RequestId) -> Option<MutationStatus> {
        self.records.get(request_id).map(|record| record.status)
    }

    /// Number of unresolved mutations
    pub fn pending_len(&self) -> usize {
        self.records.len()
    }

    /// Entities whose local state may differ from the backend after a conflict
    pub fn needs_resync(&self) -> impl Iterator<Item = &EntityRef> + '_ {
        self.resync.iter()
    }

    // =========================================================================
    // Applying mutations
    // =========================================================================

    /// Apply a mutation to local state and record it for persistence.
    ///
    /// Returns `None` when the mutation changes nothing (moving an item onto
    /// itself, renaming to the same title). Structural errors leave the store
    /// untouched.
    pub fn apply(&mut self, mutation: Mutation) -> Result<Option<MutationHandle>> {
        debug!("applying mutation: {}", Pretty(&mutation));

        match mutation {
            Mutation::CreateList { title, index } => self.create_list(title, index).map(Some),
            Mutation::CreateCard { list, title, index } => {
                self.create_card(list, title, index).map(Some)
            }
            Mutation::MoveList {
                id,
                from_index,
                to_index,
            } => self.move_list(id, from_index, to_index),
            Mutation::MoveCard {
                id,
                from_list,
                from_index,
                to_list,
                to_index,
            } => self.move_card(id, from_list, from_index, to_list, to_index),
            Mutation::RenameList { id, title } => self.rename_list(id, title),
            Mutation::UpdateCard { id, patch } => self.update_card(id, patch),
            Mutation::DeleteList { id } => self.delete_list(id).map(Some),
            Mutation::DeleteCard { id } => self.delete_card(id).map(Some),
        }
    }

    fn create_list(&mut self, title: String, index: usize) -> Result<MutationHandle> {
        let list = List::new(self.board.id.clone(), title);
        let id = list.id.clone();

        let placement = self.lists.insert(list, index)?;
        self.cards.add_container(id.clone());

        let snapshot = self.list_snapshot(&id)?;
        let entity = EntityRef::List(id);
        let request_id = self.record(entity.clone(), SyncOp::CreateList(snapshot), BeforeState::Absent);
        let follow_ups = self.follow_up_lists(placement.shifted);

        Ok(MutationHandle {
            request_id,
            entity,
            follow_ups,
        })
    }

    fn create_card(&mut self, list: ListId, title: String, index: usize) -> Result<MutationHandle> {
        let card = Card::new(list, title);
        let id = card.id.clone();

        let placement = self.cards.insert(card, index)?;

        let snapshot = self.card_snapshot(&id)?;
        let entity = EntityRef::Card(id);
        let request_id = self.record(entity.clone(), SyncOp::CreateCard(snapshot), BeforeState::Absent);
        let follow_ups = self.follow_up_cards(placement.shifted);

        Ok(MutationHandle {
            request_id,
            entity,
            follow_ups,
        })
    }

    fn move_list(
        &mut self,
        id: ListId,
        from_index: usize,
        to_index: usize,
    ) -> Result<Option<MutationHandle>> {
        let before = self
            .lists
            .get(&id)
            .map(|list| list.position)
            .ok_or_else(|| KanbanError::unknown_item(&id))?;

        let Some(placement) = self.lists.move_within(&id, from_index, to_index)? else {
            debug!(list = %id, to_index, "list move is a no-op");
            return Ok(None);
        };

        let op = SyncOp::PositionList {
            id: id.clone(),
            board: self.board.id.clone(),
            position: placement.position,
        };
        let entity = EntityRef::List(id);
        let request_id = self.record(
            entity.clone(),
            op,
            BeforeState::ListPlacement { position: before },
        );
        let follow_ups = self.follow_up_lists(placement.shifted);

        Ok(Some(MutationHandle {
            request_id,
            entity,
            follow_ups,
        }))
    }

    fn move_card(
        &mut self,
        id: CardId,
        from_list: ListId,
        from_index: usize,
        to_list: ListId,
        to_index: usize,
    ) -> Result<Option<MutationHandle>> {
        let (current_list, before_position) = self
            .cards
            .get(&id)
            .map(|card| (card.list_id.clone(), card.position))
            .ok_or_else(|| KanbanError::unknown_item(&id))?;

        let moved = if from_list == to_list {
            if current_list != from_list {
                return Err(KanbanError::ContainerMismatch {
                    id: id.to_string(),
                    expected: from_list.to_string(),
                    actual: current_list.to_string(),
                });
            }
            self.cards.move_within(&id, from_index, to_index)?
        } else {
            self.cards.move_across(&id, &from_list, &to_list, to_index)?
        };

        let Some(placement) = moved else {
            debug!(card = %id, list = %to_list, to_index, "card move is a no-op");
            return Ok(None);
        };

        let op = SyncOp::PositionCard {
            id: id.clone(),
            list: to_list,
            position: placement.position,
        };
        let entity = EntityRef::Card(id);
        let request_id = self.record(
            entity.clone(),
            op,
            BeforeState::CardPlacement {
                list: current_list,
                position: before_position,
            },
        );
        let follow_ups = self.follow_up_cards(placement.shifted);

        Ok(Some(MutationHandle {
            request_id,
            entity,
            follow_ups,
        }))
    }

    fn rename_list(&mut self, id: ListId, title: String) -> Result<Option<MutationHandle>> {
        let old = self
            .lists
            .get(&id)
            .map(|list| list.title.clone())
            .ok_or_else(|| KanbanError::unknown_item(&id))?;
        if old == title {
            return Ok(None);
        }

        self.lists.edit(&id, |list| list.title = title)?;

        let snapshot = self.list_snapshot(&id)?;
        let entity = EntityRef::List(id);
        let request_id = self.record(
            entity.clone(),
            SyncOp::UpdateList(snapshot),
            BeforeState::ListTitle(old),
        );

        Ok(Some(MutationHandle {
            request_id,
            entity,
            follow_ups: Vec::new(),
        }))
    }

    fn update_card(&mut self, id: CardId, patch: CardPatch) -> Result<Option<MutationHandle>> {
        let before = self
            .cards
            .get(&id)
            .map(|card| BeforeState::CardFields {
                title: card.title.clone(),
                meta: card.meta.clone(),
            })
            .ok_or_else(|| KanbanError::unknown_item(&id))?;

        let mut changed = false;
        self.cards.edit(&id, |card| changed = patch.apply_to(card))?;
        if !changed {
            return Ok(None);
        }

        let snapshot = self.card_snapshot(&id)?;
        let entity = EntityRef::Card(id);
        let request_id = self.record(entity.clone(), SyncOp::UpdateCard(snapshot), before);

        Ok(Some(MutationHandle {
            request_id,
            entity,
            follow_ups: Vec::new(),
        }))
    }

    fn delete_list(&mut self, id: ListId) -> Result<MutationHandle> {
        if !self.lists.contains(&id) {
            return Err(KanbanError::unknown_item(&id));
        }

        // Children go first so no card ever points at a missing list
        let cards = self.cards.remove_container(&id).unwrap_or_default();
        let list = self.lists.remove(&id)?;
        info!(list = %id, cards = cards.len(), "deleted list with its cards");

        let entity = EntityRef::List(id);
        let request_id = self.record(
            entity.clone(),
            SyncOp::Delete(entity.clone()),
            BeforeState::DeletedList { list, cards },
        );

        Ok(MutationHandle {
            request_id,
            entity,
            follow_ups: Vec::new(),
        })
    }

    fn delete_card(&mut self, id: CardId) -> Result<MutationHandle> {
        let card = self.cards.remove(&id)?;

        let entity = EntityRef::Card(id);
        let request_id = self.record(
            entity.clone(),
            SyncOp::Delete(entity.clone()),
            BeforeState::DeletedCard(card),
        );

        Ok(MutationHandle {
            request_id,
            entity,
            follow_ups: Vec::new(),
        })
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Hand out every mutation that can be sent now and mark it in flight.
    ///
    /// A mutation is ready when it is the oldest unresolved one for its entity
    /// and the list it writes into is not itself waiting to be created.
    /// Requests come out in application order.
    pub fn take_ready(&mut self) -> Vec<DispatchRequest> {
        let mut ready: Vec<(u64, RequestId)> = self
            .queues
            .values()
            .filter_map(|queue| queue.front())
            .filter_map(|request_id| self.records.get(request_id))
            .filter(|record| record.status == MutationStatus::Pending)
            .filter(|record| {
                record
                    .depends_on
                    .as_ref()
                    .is_none_or(|list| self.pending_parent(list).is_none())
            })
            .map(|record| (record.seq, record.request_id.clone()))
            .collect();
        ready.sort_by_key(|(seq, _)| *seq);

        ready
            .into_iter()
            .filter_map(|(_, request_id)| {
                let record = self.records.get_mut(&request_id)?;
                record.status = MutationStatus::InFlight;
                debug!(request = %request_id, entity = %record.entity, op = record.op.name(), "dispatching mutation");
                Some(DispatchRequest {
                    request_id,
                    op: record.op.clone(),
                })
            })
            .collect()
    }

    /// Drop the rollback information of a persisted mutation.
    ///
    /// Returns `false` for unknown or already resolved requests.
    pub fn on_confirmed(&mut self, request_id: &RequestId) -> bool {
        let Some(record) = self.take_record(request_id) else {
            debug!(request = %request_id, "confirmation for unknown request ignored");
            return false;
        };

        let latency = Utc::now() - record.applied_at;
        debug!(
            request = %request_id,
            entity = %record.entity,
            latency_ms = latency.num_milliseconds(),
            "mutation confirmed"
        );
        true
    }

    /// Resolve a mutation the backend refused.
    ///
    /// The entity goes back to its recorded before-state unless a newer local
    /// mutation touched it since, in which case the newer state is kept and
    /// the entity is flagged for resync.
    pub fn on_rejected(&mut self, request_id: &RequestId, reason: &str) -> Result<Resolution> {
        let record = self
            .take_record(request_id)
            .ok_or_else(|| KanbanError::UnknownRequest {
                id: request_id.to_string(),
            })?;
        let entity = record.entity.clone();

        if self.superseded_by_delete(&record) {
            debug!(request = %request_id, %entity, reason, "rejected mutation superseded by a local delete");
            return Ok(Resolution::Superseded(entity));
        }

        let newer = self
            .last_seq
            .get(&entity)
            .is_some_and(|seq| *seq > record.seq);
        if newer {
            warn!(request = %request_id, %entity, reason, "rejected mutation has a newer local edit, keeping it");
            self.flag_resync(entity.clone());
            return Ok(Resolution::Conflict(entity));
        }

        match self.rollback(record) {
            Ok(()) => {
                warn!(request = %request_id, %entity, reason, "rolled back rejected mutation");
                Ok(Resolution::RolledBack(entity))
            }
            Err(error) => {
                warn!(request = %request_id, %entity, %error, "rollback impossible");
                self.flag_resync(entity.clone());
                Ok(Resolution::Conflict(entity))
            }
        }
    }

    // =========================================================================
    // Resync
    // =========================================================================

    /// Overwrite a list with the backend's copy and clear its resync flag
    pub fn resync_list(&mut self, list: List) -> Result<()> {
        self.check_board(&list)?;
        let id = list.id.clone();

        let placement = self.lists.replace(list)?;
        self.cards.add_container(id.clone());
        self.follow_up_lists(placement.shifted);

        self.clear_resync(&EntityRef::List(id));
        Ok(())
    }

    /// Overwrite a card with the backend's copy and clear its resync flag
    pub fn resync_card(&mut self, card: Card) -> Result<()> {
        let id = card.id.clone();

        let placement = self.cards.replace(card)?;
        self.follow_up_cards(placement.shifted);

        self.clear_resync(&EntityRef::Card(id));
        Ok(())
    }

    /// The backend does not have this entity: drop the local copy, its
    /// unsent mutations and its resync flag. Returns whether anything was
    /// removed locally.
    pub fn resync_removed(&mut self, entity: &EntityRef) -> bool {
        let removed = match entity {
            EntityRef::List(id) => {
                let cards = self.cards.remove_container(id).unwrap_or_default();
                for card in cards {
                    self.purge_pending(&EntityRef::Card(card.id));
                }
                self.lists.remove(id).is_ok()
            }
            EntityRef::Card(id) => self.cards.remove(id).is_ok(),
        };

        self.purge_pending(entity);
        self.clear_resync(entity);
        removed
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn check_board(&self, list: &List) -> Result<()> {
        if list.board_id != self.board.id {
            return Err(KanbanError::ContainerMismatch {
                id: list.id.to_string(),
                expected: self.board.id.to_string(),
                actual: list.board_id.to_string(),
            });
        }
        Ok(())
    }

    fn list_snapshot(&self, id: &ListId) -> Result<List> {
        self.lists
            .get(id)
            .cloned()
            .ok_or_else(|| KanbanError::unknown_item(id))
    }

    fn card_snapshot(&self, id: &CardId) -> Result<Card> {
        self.cards
            .get(id)
            .cloned()
            .ok_or_else(|| KanbanError::unknown_item(id))
    }

    fn exists(&self, entity: &EntityRef) -> bool {
        match entity {
            EntityRef::List(id) => self.lists.contains(id),
            EntityRef::Card(id) => self.cards.contains(id),
        }
    }

    /// The list itself, if its creation has not been confirmed yet
    fn pending_parent(&self, list: &ListId) -> Option<ListId> {
        let front = self.queues.get(&EntityRef::List(list.clone()))?.front()?;
        let record = self.records.get(front)?;
        matches!(record.op, SyncOp::CreateList(_)).then(|| list.clone())
    }

    fn record(&mut self, entity: EntityRef, op: SyncOp, before: BeforeState) -> RequestId {
        let request_id = RequestId::new();
        let seq = self.next_seq;
        self.next_seq += 1;

        let depends_on = match &op {
            SyncOp::CreateCard(card) | SyncOp::UpdateCard(card) => {
                self.pending_parent(&card.list_id)
            }
            SyncOp::PositionCard { list, .. } => self.pending_parent(list),
            _ => None,
        };

        debug!(
            request = %request_id,
            %entity,
            op = op.name(),
            seq,
            waits_for = ?depends_on,
            "recorded mutation"
        );

        self.queues
            .entry(entity.clone())
            .or_default()
            .push_back(request_id.clone());
        self.last_seq.insert(entity.clone(), seq);
        self.records.insert(
            request_id.clone(),
            MutationRecord {
                request_id: request_id.clone(),
                seq,
                entity,
                op,
                before,
                status: MutationStatus::Pending,
                depends_on,
                applied_at: Utc::now(),
            },
        );

        request_id
    }

    /// Record position updates for lists a rebalance moved
    fn follow_up_lists(&mut self, shifted: Vec<Shift<ListId>>) -> Vec<RequestId> {
        shifted
            .into_iter()
            .map(|shift| {
                let op = SyncOp::PositionList {
                    id: shift.id.clone(),
                    board: self.board.id.clone(),
                    position: shift.to,
                };
                self.record(
                    EntityRef::List(shift.id),
                    op,
                    BeforeState::ListPlacement {
                        position: shift.from,
                    },
                )
            })
            .collect()
    }

    /// Record position updates for cards a rebalance moved
    fn follow_up_cards(&mut self, shifted: Vec<Shift<CardId>>) -> Vec<RequestId> {
        shifted
            .into_iter()
            .filter_map(|shift| {
                let list = self.cards.get(&shift.id)?.list_id.clone();
                let op = SyncOp::PositionCard {
                    id: shift.id.clone(),
                    list: list.clone(),
                    position: shift.to,
                };
                Some(self.record(
                    EntityRef::Card(shift.id),
                    op,
                    BeforeState::CardPlacement {
                        list,
                        position: shift.from,
                    },
                ))
            })
            .collect()
    }

    /// Persist the outcome of putting a list back at `wanted`
    fn follow_up_restored_list(&mut self, id: &ListId, wanted: Position, placement: Placement<ListId>) {
        if placement.position != wanted {
            let op = SyncOp::PositionList {
                id: id.clone(),
                board: self.board.id.clone(),
                position: placement.position,
            };
            // The relocated key is the local truth; rejecting it changes nothing
            self.record(
                EntityRef::List(id.clone()),
                op,
                BeforeState::ListPlacement {
                    position: placement.position,
                },
            );
        }
        self.follow_up_lists(placement.shifted);
    }

    /// Persist the outcome of putting a card back at `wanted`
    fn follow_up_restored_card(
        &mut self,
        id: &CardId,
        list: &ListId,
        wanted: Position,
        placement: Placement<CardId>,
    ) {
        if placement.position != wanted {
            let op = SyncOp::PositionCard {
                id: id.clone(),
                list: list.clone(),
                position: placement.position,
            };
            self.record(
                EntityRef::Card(id.clone()),
                op,
                BeforeState::CardPlacement {
                    list: list.clone(),
                    position: placement.position,
                },
            );
        }
        self.follow_up_cards(placement.shifted);
    }

    fn take_record(&mut self, request_id: &RequestId) -> Option<MutationRecord> {
        let record = self.records.remove(request_id)?;
        if let Some(queue) = self.queues.get_mut(&record.entity) {
            queue.retain(|queued| queued != request_id);
            if queue.is_empty() {
                self.queues.remove(&record.entity);
            }
        }
        Some(record)
    }

    /// Drop an entity's mutations that were never sent
    fn purge_pending(&mut self, entity: &EntityRef) -> Vec<MutationRecord> {
        self.purge_where(entity, |_| true)
    }

    /// Drop the unsent mutations of an entity that match `select` and return them
    fn purge_where<F>(&mut self, entity: &EntityRef, select: F) -> Vec<MutationRecord>
    where
        F: Fn(&MutationRecord) -> bool,
    {
        let Some(queue) = self.queues.get_mut(entity) else {
            return Vec::new();
        };

        let records = &mut self.records;
        let mut purged = Vec::new();
        queue.retain(|request_id| {
            let unsent = records
                .get(request_id)
                .is_some_and(|record| record.status == MutationStatus::Pending && select(record));
            if unsent {
                purged.extend(records.remove(request_id));
            }
            !unsent
        });

        if queue.is_empty() {
            self.queues.remove(entity);
        }
        purged
    }

    /// How a card came to be in `list`, judged from its first recorded
    /// mutation into that list
    fn card_origin(&self, id: &CardId, list: &ListId) -> CardOrigin {
        let Some(queue) = self.queues.get(&EntityRef::Card(id.clone())) else {
            return CardOrigin::Unknown;
        };

        let entered = queue
            .iter()
            .filter_map(|request_id| self.records.get(request_id))
            .find(|record| match &record.op {
                SyncOp::CreateCard(card) => &card.list_id == list,
                SyncOp::PositionCard { list: target, .. } => target == list,
                _ => false,
            });

        match entered.map(|record| &record.before) {
            Some(BeforeState::Absent) => CardOrigin::Created,
            Some(BeforeState::CardPlacement { list, position }) => CardOrigin::Moved {
                list: list.clone(),
                position: *position,
            },
            _ => CardOrigin::Unknown,
        }
    }

    /// Deal with a card whose list is being rolled away.
    ///
    /// Cards created there go with the list. Cards moved in from a list that
    /// still exists go back to where they came from, dropping the unsent
    /// mutations that wait on the rolled back list. Anything else is flagged
    /// for resync, since the backend still holds it.
    fn evacuate_card(&mut self, leaving: &ListId, mut card: Card) {
        let id = card.id.clone();
        let entity = EntityRef::Card(id.clone());
        let origin = self.card_origin(&id, leaving);
        let purged = match origin {
            CardOrigin::Created => self.purge_pending(&entity),
            _ => self.purge_where(&entity, |record| record.depends_on.as_ref() == Some(leaving)),
        };

        match origin {
            CardOrigin::Created => {
                debug!(card = %id, list = %leaving, "dropped card created in a rolled back list");
            }
            CardOrigin::Moved { list, position } if self.cards.has_container(&list) => {
                card.list_id = list.clone();
                card.position = position;
                match self.cards.reinsert(card) {
                    Ok(placement) => {
                        info!(card = %id, from = %leaving, to = %list, "returned card to its previous list");
                        self.follow_up_restored_card(&id, &list, position, placement);
                        // Field edits made while in the rolled back list were never sent
                        if purged
                            .iter()
                            .any(|record| !matches!(record.op, SyncOp::PositionCard { .. }))
                        {
                            self.flag_resync(entity);
                        }
                    }
                    Err(error) => {
                        warn!(card = %id, %error, "could not return card to its previous list");
                        self.flag_resync(entity);
                    }
                }
            }
            _ => {
                warn!(card = %id, list = %leaving, "card left without a list");
                self.flag_resync(entity);
            }
        }
    }

    /// The entity, or the list it would be restored into, no longer exists locally
    fn superseded_by_delete(&self, record: &MutationRecord) -> bool {
        match &record.before {
            BeforeState::DeletedList { .. } => false,
            BeforeState::DeletedCard(card) => !self.cards.has_container(&card.list_id),
            _ => !self.exists(&record.entity),
        }
    }

    fn flag_resync(&mut self, entity: EntityRef) {
        if self.resync.insert(entity.clone()) {
            warn!(%entity, "flagged for resync");
        }
    }

    fn clear_resync(&mut self, entity: &EntityRef) {
        if self.resync.shift_remove(entity) {
            info!(%entity, "resynced");
        }
    }

    fn rollback(&mut self, record: MutationRecord) -> Result<()> {
        match (record.entity, record.before) {
            (EntityRef::List(id), BeforeState::Absent) => {
                let cards = self.cards.remove_container(&id).unwrap_or_default();
                for card in cards {
                    self.evacuate_card(&id, card);
                }
                self.lists.remove(&id)?;
            }
            (EntityRef::Card(id), BeforeState::Absent) => {
                self.cards.remove(&id)?;
            }
            (EntityRef::List(id), BeforeState::ListPlacement { position }) => {
                let placement = self.lists.restore(&id, self.board.id.clone(), position)?;
                self.follow_up_restored_list(&id, position, placement);
            }
            (EntityRef::Card(id), BeforeState::CardPlacement { list, position }) => {
                let placement = self.cards.restore(&id, list.clone(), position)?;
                self.follow_up_restored_card(&id, &list, position, placement);
            }
            (EntityRef::List(id), BeforeState::ListTitle(title)) => {
                self.lists.edit(&id, |list| list.title = title)?;
            }
            (EntityRef::Card(id), BeforeState::CardFields { title, meta }) => {
                self.cards.edit(&id, |card| {
                    card.title = title;
                    card.meta = meta;
                })?;
            }
            (EntityRef::List(id), BeforeState::DeletedList { list, cards }) => {
                let wanted = list.position;
                let placement = self.lists.reinsert(list)?;
                self.cards.add_container(id.clone());
                for card in cards {
                    self.cards.reinsert(card)?;
                }
                self.follow_up_restored_list(&id, wanted, placement);
            }
            (EntityRef::Card(id), BeforeState::DeletedCard(card)) => {
                let list = card.list_id.clone();
                let wanted = card.position;
                let placement = self.cards.reinsert(card)?;
                self.follow_up_restored_card(&id, &list, wanted, placement);
            }
            (entity, before) => {
                return Err(KanbanError::invalid_value(
                    "before_state",
                    format!("{before:?} cannot be restored onto {entity}"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_id(id: &str) -> ListId {
        ListId::from_string(id)
    }

    fn card_id(id: &str) -> CardId {
        CardId::from_string(id)
    }

    /// Board b1 with l1 = [a(1), b(2), c(3)] and an empty l2
    fn store() -> OptimisticStore {
        let board = Board::new("Board").with_id("b1");
        let board_id = board.id.clone();
        let mut store = OptimisticStore::new(board);

        store
            .hydrate_list(List::new(board_id.clone(), "Todo").with_id("l1").at(1.0))
            .unwrap();
        store
            .hydrate_list(List::new(board_id, "Done").with_id("l2").at(2.0))
            .unwrap();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            store
                .hydrate_card(
                    Card::new(list_id("l1"), id.to_uppercase())
                        .with_id(*id)
                        .at((i + 1) as f64),
                )
                .unwrap();
        }
        store
    }

    fn cards_in(store: &OptimisticStore, list: &str) -> Vec<String> {
        store
            .list_items(&list_id(list))
            .unwrap()
            .map(|card| card.id.to_string())
            .collect()
    }

    fn move_card(id: &str, from: (&str, usize), to: (&str, usize)) -> Mutation {
        Mutation::MoveCard {
            id: card_id(id),
            from_list: list_id(from.0),
            from_index: from.1,
            to_list: list_id(to.0),
            to_index: to.1,
        }
    }

    #[test]
    fn test_apply_is_immediate_and_queued() {
        let mut store = store();
        let handle = store
            .apply(move_card("c", ("l1", 2), ("l1", 0)))
            .unwrap()
            .unwrap();

        assert_eq!(cards_in(&store, "l1"), vec!["c", "a", "b"]);
        assert_eq!(store.card(&card_id("c")).unwrap().position, Position::new(0.5));
        assert_eq!(store.status(&handle.request_id), Some(MutationStatus::Pending));

        let ready = store.take_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].request_id, handle.request_id);
        assert_eq!(
            ready[0].op,
            SyncOp::PositionCard {
                id: card_id("c"),
                list: list_id("l1"),
                position: Position::new(0.5),
            }
        );
        assert_eq!(store.status(&handle.request_id), Some(MutationStatus::InFlight));
        assert!(store.take_ready().is_empty());
    }

    #[test]
    fn test_noop_move_records_nothing() {
        let mut store = store();
        assert!(store
            .apply(move_card("b", ("l1", 1), ("l1", 1)))
            .unwrap()
            .is_none());
        assert!(store
            .apply(Mutation::RenameList {
                id: list_id("l1"),
                title: "Todo".into()
            })
            .unwrap()
            .is_none());
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_structural_errors_record_nothing() {
        let mut store = store();

        let err = store
            .apply(move_card("a", ("l1", 0), ("l9", 0)))
            .unwrap_err();
        assert_eq!(err, KanbanError::unknown_container("l9"));

        let err = store
            .apply(Mutation::DeleteCard { id: card_id("zz") })
            .unwrap_err();
        assert_eq!(err, KanbanError::unknown_item("zz"));

        let err = store
            .apply(move_card("a", ("l2", 0), ("l2", 1)))
            .unwrap_err();
        assert!(matches!(err, KanbanError::ContainerMismatch { .. }));

        assert_eq!(store.pending_len(), 0);
        assert_eq!(cards_in(&store, "l1"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_confirm_discards_record() {
        let mut store = store();
        let handle = store
            .apply(move_card("b", ("l1", 1), ("l2", 0)))
            .unwrap()
            .unwrap();
        store.take_ready();

        assert!(store.on_confirmed(&handle.request_id));
        assert!(!store.on_confirmed(&handle.request_id));
        assert_eq!(store.pending_len(), 0);
        assert_eq!(cards_in(&store, "l2"), vec!["b"]);
    }

    #[test]
    fn test_reject_rolls_back_move() {
        let mut store = store();
        let handle = store
            .apply(move_card("b", ("l1", 1), ("l2", 0)))
            .unwrap()
            .unwrap();
        store.take_ready();

        let resolution = store.on_rejected(&handle.request_id, "denied").unwrap();
        assert_eq!(resolution, Resolution::RolledBack(EntityRef::Card(card_id("b"))));

        let b = store.card(&card_id("b")).unwrap();
        assert_eq!(b.list_id, list_id("l1"));
        assert_eq!(b.position, Position::new(2.0));
        assert_eq!(cards_in(&store, "l1"), vec!["a", "b", "c"]);
        assert!(cards_in(&store, "l2").is_empty());
        assert_eq!(store.needs_resync().count(), 0);
    }

    #[test]
    fn test_newer_local_edit_wins_over_rollback() {
        let mut store = store();
        let first = store
            .apply(move_card("a", ("l1", 0), ("l2", 0)))
            .unwrap()
            .unwrap();
        store.take_ready();
        store
            .apply(move_card("a", ("l2", 0), ("l1", 2)))
            .unwrap()
            .unwrap();

        let resolution = store.on_rejected(&first.request_id, "denied").unwrap();
        assert_eq!(resolution, Resolution::Conflict(EntityRef::Card(card_id("a"))));

        assert_eq!(cards_in(&store, "l1"), vec!["b", "c", "a"]);
        assert_eq!(
            store.needs_resync().collect::<Vec<_>>(),
            vec![&EntityRef::Card(card_id("a"))]
        );
    }

    #[test]
    fn test_same_entity_is_fifo() {
        let mut store = store();
        let first = store
            .apply(Mutation::UpdateCard {
                id: card_id("a"),
                patch: CardPatch::new().with_title("one"),
            })
            .unwrap()
            .unwrap();
        let second = store
            .apply(Mutation::UpdateCard {
                id: card_id("a"),
                patch: CardPatch::new().with_title("two"),
            })
            .unwrap()
            .unwrap();
        let other = store
            .apply(move_card("b", ("l1", 1), ("l2", 0)))
            .unwrap()
            .unwrap();

        let ids: Vec<_> = store.take_ready().into_iter().map(|r| r.request_id).collect();
        assert_eq!(ids, vec![first.request_id.clone(), other.request_id]);

        store.on_confirmed(&first.request_id);
        let ids: Vec<_> = store.take_ready().into_iter().map(|r| r.request_id).collect();
        assert_eq!(ids, vec![second.request_id]);
    }

    #[test]
    fn test_card_create_waits_for_list_create() {
        let mut store = store();
        let list = store
            .apply(Mutation::CreateList {
                title: "New".into(),
                index: 0,
            })
            .unwrap()
            .unwrap();
        let EntityRef::List(new_list) = list.entity.clone() else {
            panic!("expected a list");
        };
        let card = store
            .apply(Mutation::CreateCard {
                list: new_list.clone(),
                title: "First".into(),
                index: 0,
            })
            .unwrap()
            .unwrap();

        let ready = store.take_ready();
        assert_eq!(ready.len(), 1);
        assert!(matches!(&ready[0].op, SyncOp::CreateList(l) if l.id == new_list));

        store.on_confirmed(&list.request_id);
        let ready = store.take_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].request_id, card.request_id);
    }

    #[test]
    fn test_rejected_list_create_drops_pending_children() {
        let mut store = store();
        let list = store
            .apply(Mutation::CreateList {
                title: "New".into(),
                index: 5,
            })
            .unwrap()
            .unwrap();
        let EntityRef::List(new_list) = list.entity.clone() else {
            panic!("expected a list");
        };
        store
            .apply(Mutation::CreateCard {
                list: new_list.clone(),
                title: "First".into(),
                index: 0,
            })
            .unwrap();
        store.take_ready();

        let resolution = store.on_rejected(&list.request_id, "quota").unwrap();
        assert_eq!(resolution, Resolution::RolledBack(list.entity));
        assert!(store.list(&new_list).is_none());
        assert!(store.list_items(&new_list).is_err());
        assert_eq!(store.pending_len(), 0);
    }

    fn create_list(store: &mut OptimisticStore, index: usize) -> (MutationHandle, ListId) {
        let handle = store
            .apply(Mutation::CreateList {
                title: "New".into(),
                index,
            })
            .unwrap()
            .unwrap();
        let EntityRef::List(id) = handle.entity.clone() else {
            panic!("expected a list");
        };
        (handle, id)
    }

    #[test]
    fn test_rejected_list_create_returns_moved_cards() {
        let mut store = store();
        let (list, new_list) = create_list(&mut store, 0);
        store
            .apply(move_card("b", ("l1", 1), (new_list.as_str(), 0)))
            .unwrap()
            .unwrap();

        // The move waits for the list
        let ready = store.take_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].request_id, list.request_id);

        let resolution = store.on_rejected(&list.request_id, "quota").unwrap();
        assert_eq!(resolution, Resolution::RolledBack(list.entity));

        let b = store.card(&card_id("b")).unwrap();
        assert_eq!(b.list_id, list_id("l1"));
        assert_eq!(b.position, Position::new(2.0));
        assert_eq!(cards_in(&store, "l1"), vec!["a", "b", "c"]);
        assert_eq!(store.pending_len(), 0);
        assert_eq!(store.needs_resync().count(), 0);
        assert!(store.take_ready().is_empty());
    }

    #[test]
    fn test_rejected_list_create_flags_unsent_card_edits() {
        let mut store = store();
        let (list, new_list) = create_list(&mut store, 0);
        store
            .apply(move_card("a", ("l1", 0), (new_list.as_str(), 0)))
            .unwrap()
            .unwrap();
        store
            .apply(Mutation::UpdateCard {
                id: card_id("a"),
                patch: CardPatch::new().with_title("renamed"),
            })
            .unwrap()
            .unwrap();
        store.take_ready();

        store.on_rejected(&list.request_id, "quota").unwrap();

        let a = store.card(&card_id("a")).unwrap();
        assert_eq!(a.list_id, list_id("l1"));
        assert_eq!(a.title, "renamed");
        assert_eq!(store.pending_len(), 0);
        assert_eq!(
            store.needs_resync().collect::<Vec<_>>(),
            vec![&EntityRef::Card(card_id("a"))]
        );
    }

    #[test]
    fn test_rejected_list_create_keeps_earlier_card_mutations() {
        let mut store = store();
        let rename = store
            .apply(Mutation::UpdateCard {
                id: card_id("c"),
                patch: CardPatch::new().with_title("first"),
            })
            .unwrap()
            .unwrap();
        let (list, new_list) = create_list(&mut store, 0);
        store
            .apply(move_card("c", ("l1", 2), (new_list.as_str(), 0)))
            .unwrap()
            .unwrap();

        let ready: Vec<_> = store.take_ready().into_iter().map(|r| r.request_id).collect();
        assert_eq!(ready, vec![rename.request_id.clone(), list.request_id.clone()]);

        store.on_rejected(&list.request_id, "quota").unwrap();

        assert_eq!(cards_in(&store, "l1"), vec!["a", "b", "c"]);
        assert_eq!(store.status(&rename.request_id), Some(MutationStatus::InFlight));
        assert!(store.on_confirmed(&rename.request_id));
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_rejected_delete_restores_list_and_cards() {
        let mut store = store();
        let handle = store
            .apply(Mutation::DeleteList { id: list_id("l1") })
            .unwrap()
            .unwrap();
        assert!(store.list(&list_id("l1")).is_none());
        assert!(store.card(&card_id("a")).is_none());

        store.take_ready();
        store.on_rejected(&handle.request_id, "forbidden").unwrap();

        let lists: Vec<_> = store
            .list_containers(&BoardId::from_string("b1"))
            .unwrap()
            .map(|list| list.id.to_string())
            .collect();
        assert_eq!(lists, vec!["l1", "l2"]);
        assert_eq!(cards_in(&store, "l1"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rejection_after_local_delete_is_silent() {
        let mut store = store();
        let update = store
            .apply(Mutation::UpdateCard {
                id: card_id("c"),
                patch: CardPatch::new().with_description("draft"),
            })
            .unwrap()
            .unwrap();
        store.take_ready();
        store
            .apply(Mutation::DeleteCard { id: card_id("c") })
            .unwrap();

        let resolution = store.on_rejected(&update.request_id, "stale").unwrap();
        assert_eq!(resolution, Resolution::Superseded(EntityRef::Card(card_id("c"))));
        assert!(store.card(&card_id("c")).is_none());
        assert_eq!(store.needs_resync().count(), 0);
    }

    #[test]
    fn test_rejected_update_restores_fields() {
        let mut store = store();
        let handle = store
            .apply(Mutation::UpdateCard {
                id: card_id("a"),
                patch: CardPatch::new()
                    .with_title("Renamed")
                    .with_labels(vec!["urgent".into()]),
            })
            .unwrap()
            .unwrap();
        assert_eq!(store.card(&card_id("a")).unwrap().title, "Renamed");

        store.take_ready();
        store.on_rejected(&handle.request_id, "denied").unwrap();

        let a = store.card(&card_id("a")).unwrap();
        assert_eq!(a.title, "A");
        assert!(a.meta.labels.is_empty());
        assert_eq!(a.position, Position::new(1.0));
    }

    #[test]
    fn test_rollback_collision_is_relocated_and_persisted() {
        let mut store = store();
        let moved = store
            .apply(move_card("b", ("l1", 1), ("l2", 0)))
            .unwrap()
            .unwrap();
        store.take_ready();

        // Takes b's old key: midpoint of a(1) and c(3)
        let created = store
            .apply(Mutation::CreateCard {
                list: list_id("l1"),
                title: "X".into(),
                index: 1,
            })
            .unwrap()
            .unwrap();
        let EntityRef::Card(x) = created.entity.clone() else {
            panic!("expected a card");
        };
        assert_eq!(store.card(&x).unwrap().position, Position::new(2.0));

        store.on_rejected(&moved.request_id, "denied").unwrap();

        let b = store.card(&card_id("b")).unwrap();
        assert_eq!(b.list_id, list_id("l1"));
        assert_eq!(b.position, Position::new(1.5));

        let ready = store.take_ready();
        assert!(ready.iter().any(|request| request.op
            == SyncOp::PositionCard {
                id: card_id("b"),
                list: list_id("l1"),
                position: Position::new(1.5),
            }));
    }

    #[test]
    fn test_rebalance_is_persisted_as_follow_ups() {
        let mut store = store();
        let mut follow_ups = 0;
        for n in 0..60 {
            let handle = store
                .apply(Mutation::CreateCard {
                    list: list_id("l1"),
                    title: format!("n{n}"),
                    index: 1,
                })
                .unwrap()
                .unwrap();
            follow_ups += handle.follow_ups.len();
        }

        assert!(follow_ups > 0);
        let positions: Vec<Position> = store
            .list_items(&list_id("l1"))
            .unwrap()
            .map(|card| card.position)
            .collect();
        assert_eq!(positions.len(), 63);
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_unknown_request() {
        let mut store = store();
        let err = store
            .on_rejected(&RequestId::from_string("nope"), "x")
            .unwrap_err();
        assert!(matches!(err, KanbanError::UnknownRequest { .. }));
    }

    #[test]
    fn test_resync_clears_flag() {
        let mut store = store();
        let first = store
            .apply(move_card("a", ("l1", 0), ("l2", 0)))
            .unwrap()
            .unwrap();
        store.take_ready();
        store
            .apply(move_card("a", ("l2", 0), ("l1", 0)))
            .unwrap();
        store.on_rejected(&first.request_id, "denied").unwrap();
        assert_eq!(store.needs_resync().count(), 1);

        let authoritative = Card::new(list_id("l2"), "A from backend")
            .with_id("a")
            .at(4.0);
        store.resync_card(authoritative).unwrap();

        assert_eq!(store.needs_resync().count(), 0);
        assert_eq!(cards_in(&store, "l2"), vec!["a"]);
        assert_eq!(store.card(&card_id("a")).unwrap().title, "A from backend");

        assert!(store.resync_removed(&EntityRef::Card(card_id("a"))));
        assert!(store.card(&card_id("a")).is_none());
    }

    #[test]
    fn test_hydrate_rejects_foreign_list() {
        let mut store = store();
        let foreign = List::new(BoardId::from_string("other"), "Elsewhere");
        let err = store.hydrate_list(foreign).unwrap_err();
        assert!(matches!(err, KanbanError::ContainerMismatch { .. }));
    }
}
