//! In-memory backend with scriptable failures

use super::adapter::{SyncAdapter, SyncFailure};
use crate::types::{Card, CardId, EntityKind, EntityRef, List, ListId, Position};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How a scripted call misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Fail with [`SyncFailure::Transient`]
    Transient,
    /// Fail with [`SyncFailure::Rejected`]
    Reject,
    /// Never answer within any reasonable timeout
    Hang,
}

/// A call received by the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub name: &'static str,
    pub entity: EntityRef,
}

#[derive(Debug, Default)]
struct State {
    lists: HashMap<ListId, List>,
    cards: HashMap<CardId, Card>,
    script: VecDeque<ScriptedFailure>,
    rejected: HashSet<EntityRef>,
    calls: Vec<RecordedCall>,
}

/// A [`SyncAdapter`] that keeps the persisted board in memory.
///
/// Scripted failures are consumed one per call, in order, before any
/// write happens. Entities marked with [`reject_entity`](Self::reject_entity)
/// fail every call.
#[derive(Debug)]
pub struct InMemorySyncAdapter {
    state: Mutex<State>,
    hang: Duration,
}

impl Default for InMemorySyncAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySyncAdapter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            hang: Duration::from_secs(3600),
        }
    }

    /// How long a [`ScriptedFailure::Hang`] call sleeps before succeeding
    pub fn with_hang(mut self, hang: Duration) -> Self {
        self.hang = hang;
        self
    }

    /// Queue failures for the next calls
    pub fn fail_next(&self, count: usize, failure: ScriptedFailure) {
        self.lock()
            .script
            .extend(std::iter::repeat_n(failure, count));
    }

    /// Reject every call touching `entity`
    pub fn reject_entity(&self, entity: EntityRef) {
        self.lock().rejected.insert(entity);
    }

    /// Store a list as already persisted
    pub fn seed_list(&self, list: List) {
        self.lock().lists.insert(list.id.clone(), list);
    }

    /// Store a card as already persisted
    pub fn seed_card(&self, card: Card) {
        self.lock().cards.insert(card.id.clone(), card);
    }

    pub fn persisted_list(&self, id: &ListId) -> Option<List> {
        self.lock().lists.get(id).cloned()
    }

    pub fn persisted_card(&self, id: &CardId) -> Option<Card> {
        self.lock().cards.get(id).cloned()
    }

    /// Persisted cards of a list, ordered by position
    pub fn persisted_cards(&self, list: &ListId) -> Vec<Card> {
        let mut cards: Vec<Card> = self
            .lock()
            .cards
            .values()
            .filter(|card| &card.list_id == list)
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        cards
    }

    /// Every call received so far, in arrival order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of calls received for one entity
    pub fn calls_for(&self, entity: &EntityRef) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| &call.entity == entity)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn handle<F>(&self, name: &'static str, entity: EntityRef, write: F) -> Result<(), SyncFailure>
    where
        F: FnOnce(&mut State) -> Result<(), SyncFailure> + Send,
    {
        let answer = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                name,
                entity: entity.clone(),
            });

            let scripted = state.script.pop_front();
            match scripted {
                Some(ScriptedFailure::Transient) => {
                    Some(Err(SyncFailure::Transient(format!("{name} failed"))))
                }
                Some(ScriptedFailure::Reject) => Some(Err(SyncFailure::Rejected(format!(
                    "{name} refused"
                )))),
                Some(ScriptedFailure::Hang) => None,
                None if state.rejected.contains(&entity) => {
                    Some(Err(SyncFailure::Rejected(format!("{entity} is read-only"))))
                }
                None => Some(write(&mut *state)),
            }
        };

        match answer {
            Some(result) => result,
            None => {
                tokio::time::sleep(self.hang).await;
                Ok(())
            }
        }
    }
}

fn missing(what: impl std::fmt::Display) -> SyncFailure {
    SyncFailure::Rejected(format!("{what} does not exist"))
}

#[async_trait]
impl SyncAdapter for InMemorySyncAdapter {
    async fn create_list(&self, list: &List) -> Result<(), SyncFailure> {
        self.handle("create_list", EntityRef::List(list.id.clone()), |state| {
            if state.lists.contains_key(&list.id) {
                return Err(SyncFailure::Rejected(format!("list {} exists", list.id)));
            }
            state.lists.insert(list.id.clone(), list.clone());
            Ok(())
        })
        .await
    }

    async fn create_card(&self, card: &Card) -> Result<(), SyncFailure> {
        self.handle("create_card", EntityRef::Card(card.id.clone()), |state| {
            if !state.lists.contains_key(&card.list_id) {
                return Err(missing(format!("list {}", card.list_id)));
            }
            if state.cards.contains_key(&card.id) {
                return Err(SyncFailure::Rejected(format!("card {} exists", card.id)));
            }
            state.cards.insert(card.id.clone(), card.clone());
            Ok(())
        })
        .await
    }

    async fn update_entity_position(
        &self,
        kind: EntityKind,
        id: &str,
        container: &str,
        position: Position,
    ) -> Result<(), SyncFailure> {
        let entity = match kind {
            EntityKind::List => EntityRef::List(ListId::from_string(id)),
            EntityKind::Card => EntityRef::Card(CardId::from_string(id)),
        };
        let container = container.to_string();

        self.handle("update_entity_position", entity.clone(), move |state| match entity {
            EntityRef::List(id) => {
                let list = state.lists.get_mut(&id).ok_or_else(|| missing(&id))?;
                list.position = position;
                Ok(())
            }
            EntityRef::Card(id) => {
                let list = ListId::from_string(container);
                if !state.lists.contains_key(&list) {
                    return Err(missing(format!("list {list}")));
                }
                let card = state.cards.get_mut(&id).ok_or_else(|| missing(&id))?;
                card.list_id = list;
                card.position = position;
                Ok(())
            }
        })
        .await
    }

    async fn update_list(&self, list: &List) -> Result<(), SyncFailure> {
        self.handle("update_list", EntityRef::List(list.id.clone()), |state| {
            let stored = state.lists.get_mut(&list.id).ok_or_else(|| missing(&list.id))?;
            *stored = list.clone();
            Ok(())
        })
        .await
    }

    async fn update_card(&self, card: &Card) -> Result<(), SyncFailure> {
        self.handle("update_card", EntityRef::Card(card.id.clone()), |state| {
            let stored = state.cards.get_mut(&card.id).ok_or_else(|| missing(&card.id))?;
            *stored = card.clone();
            Ok(())
        })
        .await
    }

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<(), SyncFailure> {
        let entity = match kind {
            EntityKind::List => EntityRef::List(ListId::from_string(id)),
            EntityKind::Card => EntityRef::Card(CardId::from_string(id)),
        };

        self.handle("delete_entity", entity.clone(), move |state| {
            match entity {
                EntityRef::List(id) => {
                    state.cards.retain(|_, card| card.list_id != id);
                    state.lists.remove(&id);
                }
                EntityRef::Card(id) => {
                    state.cards.remove(&id);
                }
            }
            Ok(())
        })
        .await
    }
}
