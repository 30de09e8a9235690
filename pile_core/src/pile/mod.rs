mod key;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::Stream;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::element::{Element, TypeTag};
use crate::error::{PileError, Result};
use crate::progression::Progression;

pub use key::{Key, Selection};

/// The guarded interior of a pile: the authoritative item map plus the
/// progression defining iteration order. Identifier parity between the two
/// is an invariant of every public operation.
#[derive(Debug)]
struct PileState<T> {
    items: HashMap<Uuid, T>,
    order: Progression,
    item_type: Option<HashSet<TypeTag>>,
    strict_type: bool,
}

/// Normalize an item collection into first-seen order plus an id-keyed map.
/// A later item with a duplicate id replaces the earlier value but keeps
/// its original position.
fn normalize<T: Element>(items: impl IntoIterator<Item = T>) -> (Vec<Uuid>, HashMap<Uuid, T>) {
    let mut order = Vec::new();
    let mut map = HashMap::new();
    for item in items {
        let id = item.id();
        if map.insert(id, item).is_none() {
            order.push(id);
        }
    }
    (order, map)
}

impl<T: Element> PileState<T> {
    fn build(
        items: impl IntoIterator<Item = T>,
        item_type: Option<HashSet<TypeTag>>,
        strict_type: bool,
        order: Option<Progression>,
    ) -> Result<Self> {
        let (ids, map) = normalize(items);
        let state = Self {
            items: map,
            order: Progression::from_order(ids),
            item_type,
            strict_type,
        };
        state.validate(state.order.iter().filter_map(|id| state.items.get(&id)))?;

        let Some(explicit) = order else {
            return Ok(state);
        };

        let mut seen = HashSet::new();
        for id in explicit.iter() {
            if !seen.insert(id) {
                return Err(PileError::InvalidOrder(format!(
                    "duplicate id {id} in explicit order"
                )));
            }
        }
        let item_ids: HashSet<Uuid> = state.items.keys().copied().collect();
        if seen != item_ids {
            return Err(PileError::InvalidOrder(
                "order and items must contain the same identifiers".to_string(),
            ));
        }
        Ok(Self {
            order: explicit,
            ..state
        })
    }

    /// Check every item against the pile's type constraint, failing on the
    /// first violation. Nothing is stored on failure.
    fn validate<'a>(&self, items: impl IntoIterator<Item = &'a T>) -> Result<()>
    where
        T: 'a,
    {
        let Some(allowed) = &self.item_type else {
            return Ok(());
        };
        for item in items {
            let ok = if self.strict_type {
                allowed.contains(&item.type_tag())
            } else {
                item.capabilities().iter().any(|tag| allowed.contains(tag))
            };
            if !ok {
                let mut expected: Vec<TypeTag> = allowed.iter().cloned().collect();
                expected.sort();
                return Err(PileError::InvalidType {
                    id: item.id(),
                    actual: item.type_tag(),
                    expected,
                });
            }
        }
        Ok(())
    }

    fn resolve_index(&self, index: isize) -> Result<usize> {
        let len = self.order.len() as isize;
        let resolved = if index < 0 { index + len } else { index };
        if resolved < 0 || resolved >= len {
            return Err(PileError::not_found(format!("index {index}")));
        }
        Ok(resolved as usize)
    }

    /// Resolve a key into concrete identifiers. Positional keys go through
    /// the order; identifier keys are checked against the item map.
    fn resolve_ids(&self, key: &Key) -> Result<Vec<Uuid>> {
        match key {
            Key::Index(index) => {
                let at = self.resolve_index(*index)?;
                Ok(vec![self.order.get(at)?])
            }
            Key::Span(range) => Ok(self.order.slice(range.clone()).to_vec()),
            Key::Id(id) => {
                if self.items.contains_key(id) {
                    Ok(vec![*id])
                } else {
                    Err(PileError::not_found(id))
                }
            }
            Key::Ids(ids) => {
                // Repeated ids resolve once, so batch removal stays
                // all-or-nothing instead of failing after a partial mutation.
                let mut seen = HashSet::with_capacity(ids.len());
                let mut resolved = Vec::with_capacity(ids.len());
                for id in ids {
                    if !self.items.contains_key(id) {
                        return Err(PileError::not_found(id));
                    }
                    if seen.insert(*id) {
                        resolved.push(*id);
                    }
                }
                Ok(resolved)
            }
        }
    }

    fn get(&self, key: &Key) -> Result<Selection<T>> {
        let ids = self.resolve_ids(key)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.items.get(id) {
                Some(item) => out.push(item.clone()),
                None => return Err(PileError::not_found(id)),
            }
        }
        Ok(Selection::collapse(out))
    }

    /// Resolve the order span addressed by a `set` key into `(start, end)`.
    /// An index equal to the current length addresses the append position.
    fn resolve_span(&self, key: &Key) -> Result<(usize, usize)> {
        match key {
            Key::Index(index) => {
                let len = self.order.len() as isize;
                let resolved = if *index < 0 { *index + len } else { *index };
                if resolved < 0 || resolved > len {
                    return Err(PileError::not_found(format!("index {index}")));
                }
                let start = resolved as usize;
                Ok((start, (start + 1).min(self.order.len())))
            }
            Key::Span(range) => {
                let start = range.start.min(self.order.len());
                let end = range.end.min(self.order.len()).max(start);
                Ok((start, end))
            }
            _ => Err(PileError::InvalidOrder(
                "set requires an index or span key".to_string(),
            )),
        }
    }

    fn set(&mut self, key: &Key, items: Vec<T>) -> Result<()> {
        self.validate(items.iter())?;
        let (new_ids, map) = normalize(items);
        let (start, end) = self.resolve_span(key)?;
        let span = self.order.slice(start..end).to_vec();

        // Incoming ids may only collide with the span being replaced.
        if let Some(id) = new_ids
            .iter()
            .find(|id| self.items.contains_key(*id) && !span.contains(*id))
        {
            return Err(PileError::AlreadyExists(*id));
        }

        self.order.set_slice(start..end, &new_ids);
        for old in &span {
            if !new_ids.contains(old) {
                self.items.remove(old);
            }
        }
        self.items.extend(map);
        Ok(())
    }

    fn include(&mut self, items: Vec<T>) -> Result<()> {
        self.validate(items.iter())?;
        for item in items {
            let id = item.id();
            if !self.items.contains_key(&id) {
                self.items.insert(id, item);
                self.order.push(id);
            }
        }
        Ok(())
    }

    fn exclude(&mut self, ids: &[Uuid]) -> bool {
        let mut removed = false;
        for id in ids {
            if self.items.remove(id).is_some() {
                removed = true;
            }
        }
        if removed {
            self.order.exclude(ids);
        }
        removed
    }

    fn pop(&mut self, key: &Key) -> Result<Selection<T>> {
        let ids = self.resolve_ids(key)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.items.remove(id) {
                Some(item) => out.push(item),
                // resolve_ids already confirmed presence
                None => return Err(PileError::not_found(id)),
            }
        }
        self.order.exclude(&ids);
        Ok(Selection::collapse(out))
    }

    fn remove(&mut self, id: Uuid) -> Result<T> {
        match self.items.remove(&id) {
            Some(item) => {
                self.order.exclude(&[id]);
                Ok(item)
            }
            None => Err(PileError::not_found(id)),
        }
    }

    fn insert_at(&mut self, index: usize, items: Vec<T>) -> Result<()> {
        self.validate(items.iter())?;
        let (ids, map) = normalize(items);
        if let Some(id) = ids.iter().find(|id| self.items.contains_key(*id)) {
            return Err(PileError::AlreadyExists(*id));
        }
        self.order.insert(index, &ids);
        self.items.extend(map);
        Ok(())
    }

    fn append(&mut self, items: Vec<T>) -> Result<()> {
        self.validate(items.iter())?;
        let (ids, map) = normalize(items);
        if let Some(id) = ids.iter().find(|id| self.items.contains_key(*id)) {
            return Err(PileError::AlreadyExists(*id));
        }
        self.order.append(&ids);
        self.items.extend(map);
        Ok(())
    }

    fn update(&mut self, items: Vec<T>) -> Result<()> {
        self.validate(items.iter())?;
        for item in items {
            let id = item.id();
            if self.items.insert(id, item).is_none() {
                self.order.push(id);
            }
        }
        Ok(())
    }

    fn popleft(&mut self) -> Result<T> {
        let id = self.order.popleft()?;
        self.items.remove(&id).ok_or_else(|| PileError::not_found(id))
    }

    fn clear(&mut self) {
        self.items.clear();
        self.order.clear();
    }

    /// Values in order, cloned while the lock is held.
    fn snapshot(&self) -> Vec<T> {
        self.order
            .iter()
            .filter_map(|id| self.items.get(&id).cloned())
            .collect()
    }
}

/// A thread-safe, type-checked, order-preserving collection of elements.
///
/// A pile owns an id-keyed item map and a [`Progression`] defining the
/// externally visible order; the two always contain the same identifier
/// set. Cloning a `Pile` produces another handle to the same collection,
/// so it can be shared across threads and tasks.
///
/// Every mutating operation exists in a synchronous form guarded by a
/// blocking lock and an `a`-prefixed asynchronous form guarded by a
/// cooperative lock. The two locks are independent: interleaving sync and
/// async calls on the same pile from different contexts stays memory-safe,
/// but ordering between the two API families is the caller's obligation.
#[derive(Debug)]
pub struct Pile<T: Element> {
    state: Arc<Mutex<PileState<T>>>,
    async_gate: Arc<AsyncMutex<()>>,
}

impl<T: Element> Clone for Pile<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            async_gate: Arc::clone(&self.async_gate),
        }
    }
}

impl<T: Element> Pile<T> {
    /// An empty, unconstrained pile.
    pub fn new() -> Self {
        Self::from_state(PileState {
            items: HashMap::new(),
            order: Progression::new(),
            item_type: None,
            strict_type: false,
        })
    }

    /// An empty pile restricted to the given type tags. With
    /// `strict_type`, an item's own tag must be in the set; otherwise any
    /// of its capabilities may match.
    pub fn typed(item_type: impl IntoIterator<Item = TypeTag>, strict_type: bool) -> Self {
        Self::from_state(PileState {
            items: HashMap::new(),
            order: Progression::new(),
            item_type: Some(item_type.into_iter().collect()),
            strict_type,
        })
    }

    /// A pile seeded with `items` in first-seen order, unconstrained.
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        let (ids, map) = normalize(items);
        Self::from_state(PileState {
            items: map,
            order: Progression::from_order(ids),
            item_type: None,
            strict_type: false,
        })
    }

    /// Full constructor: validates `items` against the constraint and, if
    /// an explicit `order` is given, requires it to be a duplicate-free
    /// permutation of the item identifiers.
    pub fn create(
        items: impl IntoIterator<Item = T>,
        item_type: Option<HashSet<TypeTag>>,
        strict_type: bool,
        order: Option<Progression>,
    ) -> Result<Self> {
        Ok(Self::from_state(PileState::build(
            items,
            item_type,
            strict_type,
            order,
        )?))
    }

    fn from_state(state: PileState<T>) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            async_gate: Arc::new(AsyncMutex::new(())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PileState<T>> {
        self.state.lock().unwrap()
    }

    // ---- queries -----------------------------------------------------

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.lock().items.contains_key(id)
    }

    pub fn contains_item(&self, item: &T) -> bool {
        self.contains(&item.id())
    }

    /// Identifiers in order (a copy, not a live view).
    pub fn keys(&self) -> Vec<Uuid> {
        self.lock().order.to_vec()
    }

    /// Values in order (copies, not live views).
    pub fn values(&self) -> Vec<T> {
        self.lock().snapshot()
    }

    /// `(id, value)` pairs in order.
    pub fn items(&self) -> Vec<(Uuid, T)> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.items.get(&id).map(|item| (id, item.clone())))
            .collect()
    }

    /// A copy of the current order.
    pub fn progression(&self) -> Progression {
        self.lock().order.clone()
    }

    pub fn item_type(&self) -> Option<HashSet<TypeTag>> {
        self.lock().item_type.clone()
    }

    pub fn strict_type(&self) -> bool {
        self.lock().strict_type
    }

    // ---- synchronous API ---------------------------------------------

    /// Get item(s) by index, span, or identifier(s).
    pub fn get(&self, key: impl Into<Key>) -> Result<Selection<T>> {
        self.lock().get(&key.into())
    }

    /// Like [`Pile::get`], but converts a `NotFound` failure into
    /// `default`. Other failures still propagate.
    pub fn get_or(
        &self,
        key: impl Into<Key>,
        default: impl Into<Selection<T>>,
    ) -> Result<Selection<T>> {
        match self.get(key) {
            Err(PileError::NotFound(_)) => Ok(default.into()),
            other => other,
        }
    }

    /// Replace the span addressed by an index or span key. Fails with
    /// `AlreadyExists` if any incoming id already lives elsewhere in the
    /// pile; on any failure nothing is changed.
    pub fn set(&self, key: impl Into<Key>, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.lock().set(&key.into(), items.into_iter().collect())
    }

    /// Idempotent add: items already present (by id) are skipped, new
    /// items are validated and appended. All-or-nothing on validation.
    pub fn include(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.lock().include(items.into_iter().collect())
    }

    /// Idempotent remove by id: absent ids are ignored. Returns true if
    /// anything was removed.
    pub fn exclude(&self, ids: impl IntoIterator<Item = Uuid>) -> bool {
        let ids: Vec<Uuid> = ids.into_iter().collect();
        self.lock().exclude(&ids)
    }

    /// Remove and return item(s). All addressed entries must be present;
    /// otherwise nothing is removed.
    pub fn pop(&self, key: impl Into<Key>) -> Result<Selection<T>> {
        self.lock().pop(&key.into())
    }

    /// Like [`Pile::pop`], but converts a `NotFound` failure into
    /// `default`.
    pub fn pop_or(
        &self,
        key: impl Into<Key>,
        default: impl Into<Selection<T>>,
    ) -> Result<Selection<T>> {
        match self.pop(key) {
            Err(PileError::NotFound(_)) => Ok(default.into()),
            other => other,
        }
    }

    /// Remove a specific item, failing with `NotFound` if absent. The
    /// non-idempotent counterpart of [`Pile::exclude`].
    pub fn remove(&self, id: &Uuid) -> Result<T> {
        self.lock().remove(*id)
    }

    /// Remove and return the first item in order.
    pub fn popleft(&self) -> Result<T> {
        self.lock().popleft()
    }

    /// Positional insert; fails with `AlreadyExists` if any id is already
    /// present. An index past the end appends.
    pub fn insert(&self, index: usize, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.lock().insert_at(index, items.into_iter().collect())
    }

    /// Append items, failing with `AlreadyExists` on any duplicate id.
    pub fn append(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.lock().append(items.into_iter().collect())
    }

    /// Bulk upsert: present ids have their value replaced in place, new
    /// ids are appended.
    pub fn update(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.lock().update(items.into_iter().collect())
    }

    /// Remove every item, keeping the pile (and its constraint) alive.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Iterate over a snapshot of the values taken at call time. Mutations
    /// after the iterator is created are invisible to it.
    pub fn iter(&self) -> std::vec::IntoIter<T> {
        self.values().into_iter()
    }

    // ---- combinators -------------------------------------------------

    /// A new pile with this pile's items followed by `other`'s, under this
    /// pile's constraint. Fails if any of `other`'s items violate it.
    pub fn union(&self, other: &Pile<T>) -> Result<Pile<T>> {
        let mut state = {
            let guard = self.lock();
            PileState {
                items: guard.items.clone(),
                order: guard.order.clone(),
                item_type: guard.item_type.clone(),
                strict_type: guard.strict_type,
            }
        };
        state.include(other.values())?;
        Ok(Self::from_state(state))
    }

    /// A new pile keeping only items also present (by id) in `other`.
    pub fn intersection(&self, other: &Pile<T>) -> Pile<T> {
        let (mut state, ids) = {
            let guard = self.lock();
            let state = PileState {
                items: guard.items.clone(),
                order: guard.order.clone(),
                item_type: guard.item_type.clone(),
                strict_type: guard.strict_type,
            };
            let ids = guard.order.to_vec();
            (state, ids)
        };
        let drop_ids: Vec<Uuid> = ids.into_iter().filter(|id| !other.contains(id)).collect();
        state.exclude(&drop_ids);
        Self::from_state(state)
    }

    /// A new pile keeping only items absent (by id) from `other`.
    pub fn difference(&self, other: &Pile<T>) -> Pile<T> {
        let (mut state, ids) = {
            let guard = self.lock();
            let state = PileState {
                items: guard.items.clone(),
                order: guard.order.clone(),
                item_type: guard.item_type.clone(),
                strict_type: guard.strict_type,
            };
            let ids = guard.order.to_vec();
            (state, ids)
        };
        let drop_ids: Vec<Uuid> = ids.into_iter().filter(|id| other.contains(id)).collect();
        state.exclude(&drop_ids);
        Self::from_state(state)
    }

    // ---- asynchronous API --------------------------------------------
    //
    // Each method acquires the cooperative gate (a suspension point), then
    // runs the same inner routine as its synchronous counterpart. The
    // guards release on every exit path, including cancellation.

    pub async fn aget(&self, key: impl Into<Key>) -> Result<Selection<T>> {
        let _gate = self.async_gate.lock().await;
        self.lock().get(&key.into())
    }

    pub async fn aget_or(
        &self,
        key: impl Into<Key>,
        default: impl Into<Selection<T>>,
    ) -> Result<Selection<T>> {
        match self.aget(key).await {
            Err(PileError::NotFound(_)) => Ok(default.into()),
            other => other,
        }
    }

    pub async fn aset(
        &self,
        key: impl Into<Key>,
        items: impl IntoIterator<Item = T>,
    ) -> Result<()> {
        let items: Vec<T> = items.into_iter().collect();
        let _gate = self.async_gate.lock().await;
        self.lock().set(&key.into(), items)
    }

    pub async fn ainclude(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        let items: Vec<T> = items.into_iter().collect();
        let _gate = self.async_gate.lock().await;
        self.lock().include(items)
    }

    pub async fn aexclude(&self, ids: impl IntoIterator<Item = Uuid>) -> bool {
        let ids: Vec<Uuid> = ids.into_iter().collect();
        let _gate = self.async_gate.lock().await;
        self.lock().exclude(&ids)
    }

    pub async fn apop(&self, key: impl Into<Key>) -> Result<Selection<T>> {
        let _gate = self.async_gate.lock().await;
        self.lock().pop(&key.into())
    }

    pub async fn apop_or(
        &self,
        key: impl Into<Key>,
        default: impl Into<Selection<T>>,
    ) -> Result<Selection<T>> {
        match self.apop(key).await {
            Err(PileError::NotFound(_)) => Ok(default.into()),
            other => other,
        }
    }

    pub async fn aremove(&self, id: &Uuid) -> Result<T> {
        let _gate = self.async_gate.lock().await;
        self.lock().remove(*id)
    }

    pub async fn apopleft(&self) -> Result<T> {
        let _gate = self.async_gate.lock().await;
        self.lock().popleft()
    }

    pub async fn ainsert(&self, index: usize, items: impl IntoIterator<Item = T>) -> Result<()> {
        let items: Vec<T> = items.into_iter().collect();
        let _gate = self.async_gate.lock().await;
        self.lock().insert_at(index, items)
    }

    pub async fn aappend(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        let items: Vec<T> = items.into_iter().collect();
        let _gate = self.async_gate.lock().await;
        self.lock().append(items)
    }

    pub async fn aupdate(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        let items: Vec<T> = items.into_iter().collect();
        let _gate = self.async_gate.lock().await;
        self.lock().update(items)
    }

    pub async fn aclear(&self) {
        let _gate = self.async_gate.lock().await;
        self.lock().clear();
    }

    /// A stream over a snapshot of the values taken under the cooperative
    /// lock. The stream yields control back to the scheduler after each
    /// item so other tasks get a turn.
    pub async fn stream(&self) -> impl Stream<Item = T> {
        let snapshot = {
            let _gate = self.async_gate.lock().await;
            self.lock().snapshot()
        };
        tokio_stream::iter(snapshot).then(|item| async move {
            tokio::task::yield_now().await;
            item
        })
    }
}

impl<T: Element> Selection<T> {
    /// Package the selected items as a new pile under `like`'s type
    /// constraint, keeping selection order. This is the collection form of
    /// a span or id-batch result: a one-element selection stays available
    /// through [`Selection::into_single`], everything else becomes an
    /// ordered sub-collection with the same membership rules as its
    /// source.
    pub fn into_pile(self, like: &Pile<T>) -> Result<Pile<T>> {
        let (item_type, strict_type) = {
            let state = like.lock();
            (state.item_type.clone(), state.strict_type)
        };
        Pile::create(self.into_vec(), item_type, strict_type, None)
    }
}

impl<T: Element> Default for Pile<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> IntoIterator for &Pile<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// Serialization writes a plain snapshot; locks are never persisted and are
// recreated fresh on load, which also re-checks the order/items parity.

#[derive(Serialize)]
struct PileSnapshotRef<'a, T> {
    items: Vec<&'a T>,
    order: Vec<Uuid>,
    item_type: Option<Vec<TypeTag>>,
    strict_type: bool,
}

#[derive(Deserialize)]
#[serde(bound = "T: Deserialize<'de>")]
struct PileSnapshot<T> {
    items: Vec<T>,
    order: Vec<Uuid>,
    item_type: Option<Vec<TypeTag>>,
    strict_type: bool,
}

impl<T: Element + Serialize> Serialize for Pile<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let state = self.lock();
        let order = state.order.to_vec();
        let items: Vec<&T> = order.iter().filter_map(|id| state.items.get(id)).collect();
        let item_type = state.item_type.as_ref().map(|tags| {
            let mut tags: Vec<TypeTag> = tags.iter().cloned().collect();
            tags.sort();
            tags
        });
        PileSnapshotRef {
            items,
            order,
            item_type,
            strict_type: state.strict_type,
        }
        .serialize(serializer)
    }
}

impl<'de, T: Element + Deserialize<'de>> Deserialize<'de> for Pile<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let snapshot = PileSnapshot::<T>::deserialize(deserializer)?;
        Pile::create(
            snapshot.items,
            snapshot.item_type.map(|tags| tags.into_iter().collect()),
            snapshot.strict_type,
            Some(Progression::from_order(snapshot.order)),
        )
        .map_err(serde::de::Error::custom)
    }
}
