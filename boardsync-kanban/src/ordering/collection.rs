//! Container-scoped ordering of lists and cards.

use super::allocator::PositionAllocator;
use crate::error::{KanbanError, Result};
use crate::types::Position;
use std::collections::{btree_set, BTreeSet, HashMap};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use tracing::{debug, info};

/// An item that lives at a position inside a container
pub trait Sequenced: Clone {
    type Id: Clone + Eq + Hash + Ord + Display + Debug;
    type Container: Clone + Eq + Hash + Display + Debug;

    /// Name used in error messages
    const ITEM_TYPE: &'static str;

    fn id(&self) -> &Self::Id;
    fn container(&self) -> &Self::Container;
    fn position(&self) -> Position;

    /// Reassign container and position together
    fn place(&mut self, container: Self::Container, position: Position);
}

/// A sibling whose key changed as a side effect (rebalance)
#[derive(Debug, Clone, PartialEq)]
pub struct Shift<I> {
    pub id: I,
    pub from: Position,
    pub to: Position,
}

/// Where an inserted or moved item ended up
#[derive(Debug, Clone, PartialEq)]
pub struct Placement<I> {
    pub position: Position,
    /// Siblings rewritten by a rebalance triggered by this placement
    pub shifted: Vec<Shift<I>>,
}

type Key<I> = (Position, I);

/// Items grouped by container, each container sorted by `(position, id)`.
///
/// Siblings' keys are only ever rewritten by [`rebalance`](Self::rebalance).
/// Every mutating method validates its inputs before touching anything, so a
/// failed call leaves the collection unchanged.
#[derive(Debug, Clone)]
pub struct OrderedCollection<T: Sequenced> {
    allocator: PositionAllocator,
    items: HashMap<T::Id, T>,
    containers: HashMap<T::Container, BTreeSet<Key<T::Id>>>,
}

impl<T: Sequenced> Default for OrderedCollection<T> {
    fn default() -> Self {
        Self::new(PositionAllocator::default())
    }
}

impl<T: Sequenced> OrderedCollection<T> {
    /// Create an empty collection
    pub fn new(allocator: PositionAllocator) -> Self {
        Self {
            allocator,
            items: HashMap::new(),
            containers: HashMap::new(),
        }
    }

    /// The allocator used for new keys
    pub fn allocator(&self) -> &PositionAllocator {
        &self.allocator
    }

    // =========================================================================
    // Containers
    // =========================================================================

    /// Register a container. Returns false if it already existed.
    pub fn add_container(&mut self, container: T::Container) -> bool {
        if self.containers.contains_key(&container) {
            return false;
        }
        self.containers.insert(container, BTreeSet::new());
        true
    }

    /// Check whether a container is registered
    pub fn has_container(&self, container: &T::Container) -> bool {
        self.containers.contains_key(container)
    }

    /// Remove a container together with its items, returned in display order
    pub fn remove_container(&mut self, container: &T::Container) -> Result<Vec<T>> {
        let keys = self
            .containers
            .remove(container)
            .ok_or_else(|| KanbanError::unknown_container(container))?;

        Ok(keys
            .into_iter()
            .filter_map(|(_, id)| self.items.remove(&id))
            .collect())
    }

    /// Number of items in a container
    pub fn len(&self, container: &T::Container) -> Result<usize> {
        Ok(self.keys(container)?.len())
    }

    /// True when the collection holds no items at all
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Check whether an item exists
    pub fn contains(&self, id: &T::Id) -> bool {
        self.items.contains_key(id)
    }

    /// Look up an item
    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.items.get(id)
    }

    /// Index of an item within its container's current order
    pub fn index_of(&self, id: &T::Id) -> Result<usize> {
        let item = self.get(id).ok_or_else(|| KanbanError::unknown_item(id))?;
        let keys = self.keys(item.container())?;
        Ok(keys.range(..(item.position(), id.clone())).count())
    }

    /// Items of a container, ascending by position (ties by id).
    ///
    /// The iterator is lazy and can be cloned to restart from the beginning.
    pub fn ordered_items(&self, container: &T::Container) -> Result<OrderedItems<'_, T>> {
        Ok(OrderedItems {
            keys: self.keys(container)?.iter(),
            items: &self.items,
        })
    }

    /// Ids of a container's items in display order
    pub fn ordered_ids(&self, container: &T::Container) -> Result<Vec<T::Id>> {
        Ok(self
            .keys(container)?
            .iter()
            .map(|(_, id)| id.clone())
            .collect())
    }

    // =========================================================================
    // Ordering operations
    // =========================================================================

    /// Insert an item at `index` of its container (clamped to the end)
    pub fn insert(&mut self, mut item: T, index: usize) -> Result<Placement<T::Id>> {
        let container = item.container().clone();
        let len = self.len(&container)?;
        if self.items.contains_key(item.id()) {
            return Err(KanbanError::duplicate_id(T::ITEM_TYPE, item.id()));
        }

        let (position, shifted) = self.allocate_slot(&container, index.min(len))?;
        item.place(container, position);
        debug!(item = %item.id(), %position, "inserted {}", T::ITEM_TYPE);
        self.link(item);

        Ok(Placement { position, shifted })
    }

    /// Move an item to `to_index` inside its own container.
    ///
    /// `to_index` addresses the order with the item taken out. A stale
    /// `from_index` is ignored in favour of the item's current index. Returns
    /// `None` when the target slot is where the item already is.
    pub fn move_within(
        &mut self,
        id: &T::Id,
        from_index: usize,
        to_index: usize,
    ) -> Result<Option<Placement<T::Id>>> {
        let current = self.index_of(id)?;
        if from_index != current {
            debug!(item = %id, from_index, current, "stale from_index, using current");
        }

        let container = self
            .get(id)
            .map(|item| item.container().clone())
            .ok_or_else(|| KanbanError::unknown_item(id))?;
        let target = to_index.min(self.len(&container)?.saturating_sub(1));
        if target == current {
            return Ok(None);
        }

        let item = self.unlink(id).ok_or_else(|| KanbanError::unknown_item(id))?;
        match self.allocate_slot(&container, target) {
            Ok((position, shifted)) => {
                let mut item = item;
                item.place(container, position);
                debug!(item = %id, %position, target, "moved {} within container", T::ITEM_TYPE);
                self.link(item);
                Ok(Some(Placement { position, shifted }))
            }
            Err(e) => {
                self.link(item);
                Err(e)
            }
        }
    }

    /// Move an item into another container at `to_index`.
    ///
    /// Container and position are reassigned in one step; there is no state
    /// in which the item carries one without the other.
    pub fn move_across(
        &mut self,
        id: &T::Id,
        from: &T::Container,
        to: &T::Container,
        to_index: usize,
    ) -> Result<Option<Placement<T::Id>>> {
        let actual = self
            .get(id)
            .map(|item| item.container().clone())
            .ok_or_else(|| KanbanError::unknown_item(id))?;
        if !self.has_container(from) {
            return Err(KanbanError::unknown_container(from));
        }
        if !self.has_container(to) {
            return Err(KanbanError::unknown_container(to));
        }
        if &actual != from {
            return Err(KanbanError::ContainerMismatch {
                id: id.to_string(),
                expected: from.to_string(),
                actual: actual.to_string(),
            });
        }
        if from == to {
            let current = self.index_of(id)?;
            return self.move_within(id, current, to_index);
        }

        let target = to_index.min(self.len(to)?);
        let (position, shifted) = self.allocate_slot(to, target)?;
        let mut item = self.unlink(id).ok_or_else(|| KanbanError::unknown_item(id))?;
        item.place(to.clone(), position);
        debug!(item = %id, %from, %to, %position, "moved {} across containers", T::ITEM_TYPE);
        self.link(item);

        Ok(Some(Placement { position, shifted }))
    }

    /// Remove an item
    pub fn remove(&mut self, id: &T::Id) -> Result<T> {
        self.unlink(id).ok_or_else(|| KanbanError::unknown_item(id))
    }

    /// Edit an item's other fields. Container and position are left as they were.
    pub fn edit<F>(&mut self, id: &T::Id, f: F) -> Result<()>
    where
        F: FnOnce(&mut T),
    {
        let item = self
            .items
            .get_mut(id)
            .ok_or_else(|| KanbanError::unknown_item(id))?;
        let container = item.container().clone();
        let position = item.position();
        f(item);
        item.place(container, position);
        Ok(())
    }

    /// Put an existing item back at a recorded placement.
    ///
    /// If another item has since taken that exact position, the restored item
    /// goes directly before it with a fresh key.
    pub fn restore(
        &mut self,
        id: &T::Id,
        container: T::Container,
        position: Position,
    ) -> Result<Placement<T::Id>> {
        if !self.has_container(&container) {
            return Err(KanbanError::unknown_container(&container));
        }
        let original = self.unlink(id).ok_or_else(|| KanbanError::unknown_item(id))?;

        let mut item = original.clone();
        item.place(container, position);
        self.place_at_own_position(item).inspect_err(|_| {
            self.link(original);
        })
    }

    /// Insert an item at the position it already carries.
    ///
    /// Used for items coming back after a rolled back delete. Collisions are
    /// resolved as in [`restore`](Self::restore); an invalid key appends.
    pub fn reinsert(&mut self, item: T) -> Result<Placement<T::Id>> {
        if !self.has_container(item.container()) {
            return Err(KanbanError::unknown_container(item.container()));
        }
        if self.items.contains_key(item.id()) {
            return Err(KanbanError::duplicate_id(T::ITEM_TYPE, item.id()));
        }
        self.place_at_own_position(item)
    }

    /// Insert or overwrite an item with an authoritative copy
    pub fn replace(&mut self, item: T) -> Result<Placement<T::Id>> {
        if !self.has_container(item.container()) {
            return Err(KanbanError::unknown_container(item.container()));
        }
        let previous = self.unlink(item.id());
        self.place_at_own_position(item).inspect_err(|_| {
            if let Some(previous) = previous {
                self.link(previous);
            }
        })
    }

    /// Reassign evenly spaced keys to a whole container, preserving its order
    pub fn rebalance(&mut self, container: &T::Container) -> Result<Vec<Shift<T::Id>>> {
        let allocator = self.allocator;
        let keys = self
            .containers
            .get_mut(container)
            .ok_or_else(|| KanbanError::unknown_container(container))?;

        let ordered: Vec<Key<T::Id>> = std::mem::take(keys).into_iter().collect();
        let count = ordered.len();
        let mut shifted = Vec::new();

        for ((from, id), to) in allocator.rebalance(&ordered) {
            keys.insert((to, id.clone()));
            if let Some(item) = self.items.get_mut(&id) {
                let owner = item.container().clone();
                item.place(owner, to);
            }
            if from != to {
                shifted.push(Shift { id, from, to });
            }
        }

        info!(
            %container,
            count,
            shifted = shifted.len(),
            "rebalanced {} positions",
            T::ITEM_TYPE
        );
        Ok(shifted)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn keys(&self, container: &T::Container) -> Result<&BTreeSet<Key<T::Id>>> {
        self.containers
            .get(container)
            .ok_or_else(|| KanbanError::unknown_container(container))
    }

    /// Keys on either side of slot `index`
    fn neighbors(keys: &BTreeSet<Key<T::Id>>, index: usize) -> (Option<Position>, Option<Position>) {
        let mut iter = keys.iter().map(|(position, _)| *position);
        if index == 0 {
            return (None, iter.next());
        }
        let mut iter = iter.skip(index - 1);
        (iter.next(), iter.next())
    }

    /// Allocate a key for slot `index`, rebalancing the container once if precision ran out
    fn allocate_slot(
        &mut self,
        container: &T::Container,
        index: usize,
    ) -> Result<(Position, Vec<Shift<T::Id>>)> {
        let (left, right) = Self::neighbors(self.keys(container)?, index);
        match self.allocator.allocate(left, right) {
            Ok(position) => Ok((position, Vec::new())),
            Err(KanbanError::RebalanceRequired) => {
                let shifted = self.rebalance(container)?;
                let (left, right) = Self::neighbors(self.keys(container)?, index);
                let position = self.allocator.allocate(left, right)?;
                Ok((position, shifted))
            }
            Err(e) => Err(e),
        }
    }

    /// Link an item at its own key, moving it before an occupant of the same key
    fn place_at_own_position(&mut self, mut item: T) -> Result<Placement<T::Id>> {
        let container = item.container().clone();
        let keys = self.keys(&container)?;
        let len = keys.len();
        let occupant = keys
            .iter()
            .position(|(position, other)| *position == item.position() && other != item.id());

        let (position, shifted) = match occupant {
            None if item.position().is_valid() => (item.position(), Vec::new()),
            None => self.allocate_slot(&container, len)?,
            Some(index) => {
                debug!(item = %item.id(), index, "position taken, placing before occupant");
                self.allocate_slot(&container, index)?
            }
        };

        item.place(container, position);
        self.link(item);
        Ok(Placement { position, shifted })
    }

    /// Add an item to the item map and its container's index
    fn link(&mut self, item: T) {
        if let Some(keys) = self.containers.get_mut(item.container()) {
            keys.insert((item.position(), item.id().clone()));
        }
        self.items.insert(item.id().clone(), item);
    }

    /// Remove an item from the item map and its container's index
    fn unlink(&mut self, id: &T::Id) -> Option<T> {
        let item = self.items.remove(id)?;
        if let Some(keys) = self.containers.get_mut(item.container()) {
            keys.remove(&(item.position(), id.clone()));
        }
        Some(item)
    }
}

/// Lazy iterator over a container's items in display order
#[derive(Clone)]
pub struct OrderedItems<'a, T: Sequenced> {
    keys: btree_set::Iter<'a, Key<T::Id>>,
    items: &'a HashMap<T::Id, T>,
}

impl<'a, T: Sequenced> Iterator for OrderedItems<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let items = self.items;
        self.keys.by_ref().find_map(|(_, id)| items.get(id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.keys.size_hint().1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Card, CardId, ListId};

    fn list(id: &str) -> ListId {
        ListId::from_string(id)
    }

    fn card(id: &str, list_id: &str) -> Card {
        Card::new(list(list_id), id.to_uppercase()).with_id(id)
    }

    fn ids(collection: &OrderedCollection<Card>, list_id: &str) -> Vec<String> {
        collection
            .ordered_items(&list(list_id))
            .unwrap()
            .map(|c| c.id.to_string())
            .collect()
    }

    fn position(collection: &OrderedCollection<Card>, id: &str) -> f64 {
        collection
            .get(&CardId::from_string(id))
            .unwrap()
            .position
            .value()
    }

    /// A, B, C at 1, 2, 3 in l1; empty l2
    fn setup() -> OrderedCollection<Card> {
        let mut collection = OrderedCollection::default();
        collection.add_container(list("l1"));
        collection.add_container(list("l2"));
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            collection.insert(card(id, "l1"), i).unwrap();
        }
        collection
    }

    #[test]
    fn test_appends_get_step_spacing() {
        let collection = setup();
        assert_eq!(ids(&collection, "l1"), vec!["a", "b", "c"]);
        assert_eq!(position(&collection, "a"), 1.0);
        assert_eq!(position(&collection, "b"), 2.0);
        assert_eq!(position(&collection, "c"), 3.0);
    }

    #[test]
    fn test_insert_between_and_clamped() {
        let mut collection = setup();
        let placement = collection.insert(card("x", "l1"), 1).unwrap();
        assert_eq!(placement.position, Position::new(1.5));
        assert!(placement.shifted.is_empty());

        collection.insert(card("y", "l1"), 99).unwrap();
        assert_eq!(ids(&collection, "l1"), vec!["a", "x", "b", "c", "y"]);
        assert_eq!(position(&collection, "y"), 4.0);
    }

    #[test]
    fn test_insert_errors_leave_collection_untouched() {
        let mut collection = setup();

        let err = collection.insert(card("z", "missing"), 0).unwrap_err();
        assert_eq!(err, KanbanError::unknown_container("missing"));

        let err = collection.insert(card("a", "l2"), 0).unwrap_err();
        assert!(matches!(err, KanbanError::DuplicateId { .. }));

        assert_eq!(ids(&collection, "l1"), vec!["a", "b", "c"]);
        assert_eq!(collection.len(&list("l2")).unwrap(), 0);
    }

    #[test]
    fn test_move_to_front() {
        let mut collection = setup();
        let placement = collection
            .move_within(&CardId::from_string("c"), 2, 0)
            .unwrap()
            .unwrap();

        assert_eq!(placement.position, Position::new(0.5));
        assert_eq!(ids(&collection, "l1"), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_move_down_uses_post_removal_index() {
        let mut collection = setup();
        collection
            .move_within(&CardId::from_string("a"), 0, 1)
            .unwrap();
        assert_eq!(ids(&collection, "l1"), vec!["b", "a", "c"]);
        assert_eq!(position(&collection, "a"), 2.5);
    }

    #[test]
    fn test_move_to_same_index_is_noop() {
        let mut collection = setup();
        let before = position(&collection, "b").to_bits();

        assert_eq!(
            collection
                .move_within(&CardId::from_string("b"), 1, 1)
                .unwrap(),
            None
        );
        // Clamped to the slot it already occupies
        assert_eq!(
            collection
                .move_within(&CardId::from_string("c"), 2, 10)
                .unwrap(),
            None
        );

        assert_eq!(position(&collection, "b").to_bits(), before);
        assert_eq!(position(&collection, "c"), 3.0);
    }

    #[test]
    fn test_stale_from_index_still_moves() {
        let mut collection = setup();

        // c sits at 2; the caller believes it is at 0
        let placement = collection
            .move_within(&CardId::from_string("c"), 0, 0)
            .unwrap()
            .unwrap();

        assert_eq!(placement.position, Position::new(0.5));
        assert_eq!(ids(&collection, "l1"), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_move_across_into_empty_container() {
        let mut collection = setup();
        let placement = collection
            .move_across(&CardId::from_string("b"), &list("l1"), &list("l2"), 0)
            .unwrap()
            .unwrap();

        assert_eq!(placement.position, Position::new(1.0));
        assert_eq!(ids(&collection, "l1"), vec!["a", "c"]);
        assert_eq!(ids(&collection, "l2"), vec!["b"]);

        let moved = collection.get(&CardId::from_string("b")).unwrap();
        assert_eq!(moved.list_id, list("l2"));
        assert_eq!(moved.position, Position::new(1.0));
    }

    #[test]
    fn test_move_across_validates_before_mutating() {
        let mut collection = setup();
        let id = CardId::from_string("b");

        let err = collection
            .move_across(&id, &list("l1"), &list("nowhere"), 0)
            .unwrap_err();
        assert_eq!(err, KanbanError::unknown_container("nowhere"));

        let err = collection
            .move_across(&id, &list("l2"), &list("l1"), 0)
            .unwrap_err();
        assert!(matches!(err, KanbanError::ContainerMismatch { .. }));

        let err = collection
            .move_across(&CardId::from_string("ghost"), &list("l1"), &list("l2"), 0)
            .unwrap_err();
        assert_eq!(err, KanbanError::unknown_item("ghost"));

        assert_eq!(ids(&collection, "l1"), vec!["a", "b", "c"]);
        assert_eq!(position(&collection, "b"), 2.0);
    }

    #[test]
    fn test_exhaustion_triggers_rebalance() {
        let mut collection = setup();
        let mut expected = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut saw_rebalance = false;

        for n in 0..60 {
            let id = format!("n{n}");
            let placement = collection.insert(card(&id, "l1"), 1).unwrap();
            expected.insert(1, id);
            if !placement.shifted.is_empty() {
                saw_rebalance = true;
            }
        }

        assert!(saw_rebalance);
        assert_eq!(ids(&collection, "l1"), expected);

        let positions: Vec<Position> = collection
            .ordered_items(&list("l1"))
            .unwrap()
            .map(|c| c.position)
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_rebalance_reports_shifts() {
        let mut collection = setup();
        collection.insert(card("x", "l1"), 1).unwrap(); // 1.5

        let shifted = collection.rebalance(&list("l1")).unwrap();
        assert_eq!(ids(&collection, "l1"), vec!["a", "x", "b", "c"]);
        // a stays at 1.0; x, b, c move
        assert_eq!(shifted.len(), 3);
        assert_eq!(shifted[0].id, CardId::from_string("x"));
        assert_eq!(shifted[0].from, Position::new(1.5));
        assert_eq!(shifted[0].to, Position::new(2.0));
        assert_eq!(position(&collection, "c"), 4.0);
    }

    #[test]
    fn test_restore_relocates_on_collision() {
        let mut collection = setup();
        let b = CardId::from_string("b");

        collection
            .move_across(&b, &list("l1"), &list("l2"), 0)
            .unwrap();
        // x takes b's old key (midpoint of 1 and 3)
        collection.insert(card("x", "l1"), 1).unwrap();
        assert_eq!(position(&collection, "x"), 2.0);

        let placement = collection.restore(&b, list("l1"), Position::new(2.0)).unwrap();
        assert_eq!(placement.position, Position::new(1.5));
        assert_eq!(ids(&collection, "l1"), vec!["a", "b", "x", "c"]);
        assert!(ids(&collection, "l2").is_empty());
    }

    #[test]
    fn test_restore_into_missing_container_keeps_item() {
        let mut collection = setup();
        let b = CardId::from_string("b");

        let err = collection
            .restore(&b, list("gone"), Position::new(2.0))
            .unwrap_err();
        assert_eq!(err, KanbanError::unknown_container("gone"));
        assert_eq!(ids(&collection, "l1"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_remove_container_returns_items_in_order() {
        let mut collection = setup();
        collection
            .move_within(&CardId::from_string("c"), 2, 0)
            .unwrap();

        let removed: Vec<String> = collection
            .remove_container(&list("l1"))
            .unwrap()
            .into_iter()
            .map(|c| c.id.to_string())
            .collect();
        assert_eq!(removed, vec!["c", "a", "b"]);
        assert!(!collection.contains(&CardId::from_string("a")));
        assert!(collection.ordered_items(&list("l1")).is_err());
    }

    #[test]
    fn test_reinsert_and_replace() {
        let mut collection = setup();
        let removed = collection.remove(&CardId::from_string("b")).unwrap();
        assert_eq!(ids(&collection, "l1"), vec!["a", "c"]);

        collection.reinsert(removed).unwrap();
        assert_eq!(ids(&collection, "l1"), vec!["a", "b", "c"]);

        let authoritative = card("a", "l2").at(7.0);
        collection.replace(authoritative).unwrap();
        assert_eq!(ids(&collection, "l1"), vec!["b", "c"]);
        assert_eq!(ids(&collection, "l2"), vec!["a"]);
        assert_eq!(position(&collection, "a"), 7.0);
    }

    #[test]
    fn test_edit_cannot_move_items() {
        let mut collection = setup();
        collection
            .edit(&CardId::from_string("a"), |card| {
                card.title = "Renamed".into();
                card.position = Position::new(99.0);
            })
            .unwrap();

        let a = collection.get(&CardId::from_string("a")).unwrap();
        assert_eq!(a.title, "Renamed");
        assert_eq!(a.position, Position::new(1.0));
        assert_eq!(ids(&collection, "l1"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ordered_items_is_restartable() {
        let collection = setup();
        let iter = collection.ordered_items(&list("l1")).unwrap();
        let first: Vec<_> = iter.clone().map(|c| c.id.clone()).collect();
        let second: Vec<_> = iter.map(|c| c.id.clone()).collect();
        assert_eq!(first, second);
        assert_eq!(collection.index_of(&CardId::from_string("c")).unwrap(), 2);
    }
}
