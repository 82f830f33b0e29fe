#![forbid(unsafe_code)]

//! Tracked containers: keyed maps and indexed sequences.
//!
//! # Design
//!
//! Both container kinds wrap their content in shared, reference-counted
//! storage (`Rc<RefCell<..>>`). Cloning a handle yields another handle to the
//! **same** container; identity is a process-unique [`ContainerId`] assigned at
//! construction.
//!
//! Each container keeps a list of [`MutationSink`]s as weak references. After
//! every effective mutation the container releases its own borrow, upgrades the
//! live sinks, prunes dead ones and delivers one [`MutationEvent`] to each.
//!
//! # Invariants
//!
//! 1. A mutating call emits at most one event, and only if content changed.
//! 2. Events are delivered after the mutation is visible through the handle.
//! 3. A sink is attached to a given container at most once.
//!
//! # Failure Modes
//!
//! - **Re-entrant mutation**: a sink that mutates the container it is being
//!   notified by sees the post-mutation state; sinks that buffer (like
//!   [`WatchAdapter`](crate::WatchAdapter)) never do this.
//! - **Out-of-range edits**: index-based sequence edits past the end return
//!   [`ContainerError::IndexOutOfBounds`] and leave the sequence untouched.

use std::cell::RefCell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value as Json;

use crate::event::{Mutation, MutationEvent, MutationSink, Slot};
use crate::value::Value;

static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a tracked container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl ContainerId {
    fn next() -> Self {
        Self(NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors raised by container edits and tree snapshots.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContainerError {
    #[error("index {index} out of bounds (length {length})")]
    IndexOutOfBounds { index: usize, length: usize },
    #[error("sequence cannot grow to index {index}")]
    CapacityOverflow { index: usize },
    #[error("container {0} is reachable from itself")]
    Cycle(ContainerId),
    #[error("slot {slot} cannot be written as {value_state} on container {container}")]
    SlotMismatch {
        container: ContainerId,
        slot: Slot,
        value_state: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Sink registry
// ---------------------------------------------------------------------------

type SinkWeak = Weak<dyn MutationSink>;

fn sink_key(sink: &Rc<dyn MutationSink>) -> usize {
    Rc::as_ptr(sink) as *const () as usize
}

fn weak_key(sink: &SinkWeak) -> usize {
    Weak::as_ptr(sink) as *const () as usize
}

#[derive(Default)]
struct Watchers {
    sinks: Vec<SinkWeak>,
}

impl Watchers {
    fn attach(&mut self, sink: &Rc<dyn MutationSink>) -> bool {
        let key = sink_key(sink);
        if self.sinks.iter().any(|w| weak_key(w) == key && w.strong_count() > 0) {
            return false;
        }
        self.sinks.retain(|w| w.strong_count() > 0);
        self.sinks.push(Rc::downgrade(sink));
        true
    }

    fn detach(&mut self, sink: &Rc<dyn MutationSink>) -> bool {
        let was_attached = self.contains(sink);
        let key = sink_key(sink);
        self.sinks.retain(|w| weak_key(w) != key && w.strong_count() > 0);
        was_attached
    }

    fn contains(&self, sink: &Rc<dyn MutationSink>) -> bool {
        let key = sink_key(sink);
        self.sinks
            .iter()
            .any(|w| weak_key(w) == key && w.strong_count() > 0)
    }

    /// Prune dead weak refs and collect live ones.
    fn live(&mut self) -> Vec<Rc<dyn MutationSink>> {
        self.sinks.retain(|w| w.strong_count() > 0);
        self.sinks.iter().filter_map(Weak::upgrade).collect()
    }

    fn live_count(&self) -> usize {
        self.sinks.iter().filter(|w| w.strong_count() > 0).count()
    }
}

fn deliver(sinks: Vec<Rc<dyn MutationSink>>, container: Container, mutation: Mutation) {
    if sinks.is_empty() {
        return;
    }
    let event = MutationEvent::new(container, mutation);
    for sink in &sinks {
        sink.deliver(event.clone());
    }
}

// ---------------------------------------------------------------------------
// KeyedContainer
// ---------------------------------------------------------------------------

struct KeyedInner {
    id: ContainerId,
    entries: BTreeMap<String, Value>,
    watchers: Watchers,
}

/// A shared string-keyed map that reports its mutations.
#[derive(Clone)]
pub struct KeyedContainer {
    inner: Rc<RefCell<KeyedInner>>,
}

impl fmt::Debug for KeyedContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("KeyedContainer")
            .field("id", &inner.id)
            .field("len", &inner.entries.len())
            .field("watchers", &inner.watchers.live_count())
            .finish()
    }
}

impl PartialEq for KeyedContainer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for KeyedContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyedContainer {
    /// Create an empty map with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(KeyedInner {
                id: ContainerId::next(),
                entries: BTreeMap::new(),
                watchers: Watchers::default(),
            })),
        }
    }

    /// Create a map pre-filled with `entries`. No events are emitted.
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let map = Self::new();
        {
            let mut inner = map.inner.borrow_mut();
            for (key, value) in entries {
                inner.entries.insert(key.into(), value.into());
            }
        }
        map
    }

    #[must_use]
    pub fn id(&self) -> ContainerId {
        self.inner.borrow().id
    }

    /// Clone of the value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.borrow().entries.get(key).cloned()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.borrow().entries.contains_key(key)
    }

    /// Keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.borrow().entries.keys().cloned().collect()
    }

    /// Entries in key order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.inner
            .borrow()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    /// Set `key` to `value`.
    ///
    /// Emits `Add` for a new key, `Update` when the value differs, and nothing
    /// when the stored value is already equal.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let (sinks, mutation) = {
            let mut inner = self.inner.borrow_mut();
            let mutation = match inner.entries.get(&key) {
                Some(existing) if *existing == value => return,
                Some(existing) => Mutation::Update {
                    slot: Slot::Key(key.clone()),
                    old_value: existing.clone(),
                    value: value.clone(),
                },
                None => Mutation::Add {
                    key: key.clone(),
                    value: value.clone(),
                },
            };
            inner.entries.insert(key, value);
            (inner.watchers.live(), mutation)
        };
        deliver(sinks, Container::Keyed(self.clone()), mutation);
    }

    /// Remove `key`, returning its value. Emits `Delete` if the key existed.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let (sinks, old_value) = {
            let mut inner = self.inner.borrow_mut();
            let old_value = inner.entries.remove(key)?;
            (inner.watchers.live(), old_value)
        };
        deliver(
            sinks,
            Container::Keyed(self.clone()),
            Mutation::Delete {
                key: key.to_owned(),
                old_value: old_value.clone(),
            },
        );
        Some(old_value)
    }

    /// Snapshot as a JSON object.
    ///
    /// # Errors
    ///
    /// [`ContainerError::Cycle`] if the map is reachable from itself.
    pub fn to_json(&self) -> Result<Json, ContainerError> {
        Value::Map(self.clone()).to_json()
    }
}

// ---------------------------------------------------------------------------
// IndexedSequence
// ---------------------------------------------------------------------------

struct IndexedInner {
    id: ContainerId,
    items: Vec<Value>,
    watchers: Watchers,
}

/// A shared ordered sequence that reports its mutations.
///
/// Every length-changing or reordering edit is reported as a single splice.
/// In-range element writes are reported as index updates.
#[derive(Clone)]
pub struct IndexedSequence {
    inner: Rc<RefCell<IndexedInner>>,
}

impl fmt::Debug for IndexedSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("IndexedSequence")
            .field("id", &inner.id)
            .field("len", &inner.items.len())
            .field("watchers", &inner.watchers.live_count())
            .finish()
    }
}

impl PartialEq for IndexedSequence {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for IndexedSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexedSequence {
    /// Create an empty sequence with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self::from_values(std::iter::empty::<Value>())
    }

    /// Create a sequence pre-filled with `values`. No events are emitted.
    pub fn from_values<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(IndexedInner {
                id: ContainerId::next(),
                items: values.into_iter().map(Into::into).collect(),
                watchers: Watchers::default(),
            })),
        }
    }

    #[must_use]
    pub fn id(&self) -> ContainerId {
        self.inner.borrow().id
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.borrow().items.get(index).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    /// Clone of the current elements.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.borrow().items.clone()
    }

    /// Write `value` at `index`.
    ///
    /// In range this is [`replace`](Self::replace). Past the end the gap is
    /// filled with [`Value::Absent`] and the whole run is appended as one
    /// splice.
    ///
    /// # Errors
    ///
    /// [`ContainerError::CapacityOverflow`] if the gap cannot be allocated;
    /// the sequence is left untouched.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<(), ContainerError> {
        let value = value.into();
        let len = self.len();
        if index < len {
            return self.replace(index, value).map(drop);
        }
        let overflow = || ContainerError::CapacityOverflow { index };
        let run_len = (index - len).checked_add(1).ok_or_else(overflow)?;
        let mut run = Vec::new();
        run.try_reserve_exact(run_len).map_err(|_| overflow())?;
        run.resize(run_len - 1, Value::Absent);
        run.push(value);
        self.splice(len, 0, run).map(drop)
    }

    /// Overwrite the element at `index`, returning the previous one.
    ///
    /// # Errors
    ///
    /// [`ContainerError::IndexOutOfBounds`] if `index >= len`.
    pub fn replace(&self, index: usize, value: impl Into<Value>) -> Result<Value, ContainerError> {
        let value = value.into();
        let (sinks, old_value) = {
            let mut inner = self.inner.borrow_mut();
            let length = inner.items.len();
            let Some(slot) = inner.items.get_mut(index) else {
                return Err(ContainerError::IndexOutOfBounds { index, length });
            };
            if *slot == value {
                return Ok(value);
            }
            let old_value = std::mem::replace(slot, value.clone());
            (inner.watchers.live(), old_value)
        };
        deliver(
            sinks,
            Container::Indexed(self.clone()),
            Mutation::Update {
                slot: Slot::Index(index),
                old_value: old_value.clone(),
                value,
            },
        );
        Ok(old_value)
    }

    /// Remove `delete_count` elements at `index` and insert `items` there.
    ///
    /// `delete_count` is clamped to the elements available after `index`.
    /// Returns the removed elements. A splice that removes and inserts nothing
    /// emits no event.
    ///
    /// # Errors
    ///
    /// [`ContainerError::IndexOutOfBounds`] if `index > len`.
    pub fn splice(
        &self,
        index: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = Value>,
    ) -> Result<Vec<Value>, ContainerError> {
        let inserted: Vec<Value> = items.into_iter().collect();
        let (sinks, removed) = {
            let mut inner = self.inner.borrow_mut();
            let length = inner.items.len();
            if index > length {
                return Err(ContainerError::IndexOutOfBounds { index, length });
            }
            let end = index + delete_count.min(length - index);
            if end == index && inserted.is_empty() {
                return Ok(Vec::new());
            }
            let removed: Vec<Value> = inner
                .items
                .splice(index..end, inserted.iter().cloned())
                .collect();
            (inner.watchers.live(), removed)
        };
        deliver(
            sinks,
            Container::Indexed(self.clone()),
            Mutation::Splice {
                index,
                removed: removed.clone(),
                added_count: inserted.len(),
                inserted,
            },
        );
        Ok(removed)
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.extend([value.into()]);
    }

    /// Append all `values` as one splice.
    pub fn extend<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) {
        let len = self.len();
        let _ = self.splice(len, 0, values.into_iter().map(Into::into));
    }

    pub fn pop(&self) -> Option<Value> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        self.splice(len - 1, 1, []).ok()?.pop()
    }

    /// Insert at `index`, shifting later elements right.
    ///
    /// # Errors
    ///
    /// [`ContainerError::IndexOutOfBounds`] if `index > len`.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<(), ContainerError> {
        self.splice(index, 0, [value.into()]).map(drop)
    }

    /// Remove the element at `index`.
    ///
    /// # Errors
    ///
    /// [`ContainerError::IndexOutOfBounds`] if `index >= len`.
    pub fn remove(&self, index: usize) -> Result<Value, ContainerError> {
        let length = self.len();
        if index >= length {
            return Err(ContainerError::IndexOutOfBounds { index, length });
        }
        self.splice(index, 1, [])?
            .pop()
            .ok_or(ContainerError::IndexOutOfBounds { index, length })
    }

    /// Remove the first element.
    pub fn shift(&self) -> Option<Value> {
        self.remove(0).ok()
    }

    /// Prepend all `values` as one splice.
    pub fn unshift<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) {
        let _ = self.splice(0, 0, values.into_iter().map(Into::into));
    }

    pub fn truncate(&self, len: usize) {
        let current = self.len();
        if len < current {
            let _ = self.splice(len, current - len, []);
        }
    }

    pub fn clear(&self) {
        self.truncate(0);
    }

    /// Reverse in place, reported as one whole-sequence splice.
    pub fn reverse(&self) {
        let mut items = self.to_vec();
        items.reverse();
        self.replace_all(items);
    }

    /// Sort in place with `compare`, reported as one whole-sequence splice.
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> CmpOrdering) {
        let mut items = self.to_vec();
        items.sort_by(compare);
        self.replace_all(items);
    }

    fn replace_all(&self, items: Vec<Value>) {
        if items == self.to_vec() {
            return;
        }
        let len = self.len();
        let _ = self.splice(0, len, items);
    }

    /// Snapshot as a JSON array.
    ///
    /// # Errors
    ///
    /// [`ContainerError::Cycle`] if the sequence is reachable from itself.
    pub fn to_json(&self) -> Result<Json, ContainerError> {
        Value::Seq(self.clone()).to_json()
    }
}

// ---------------------------------------------------------------------------
// Container (closed variant)
// ---------------------------------------------------------------------------

/// Either container kind, with the capabilities they share.
#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    Keyed(KeyedContainer),
    Indexed(IndexedSequence),
}

impl Container {
    #[must_use]
    pub fn id(&self) -> ContainerId {
        match self {
            Self::Keyed(map) => map.id(),
            Self::Indexed(seq) => seq.id(),
        }
    }

    #[must_use]
    pub fn as_keyed(&self) -> Option<&KeyedContainer> {
        match self {
            Self::Keyed(map) => Some(map),
            Self::Indexed(_) => None,
        }
    }

    #[must_use]
    pub fn as_indexed(&self) -> Option<&IndexedSequence> {
        match self {
            Self::Indexed(seq) => Some(seq),
            Self::Keyed(_) => None,
        }
    }

    /// Non-owning handle to this container.
    #[must_use]
    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer(match self {
            Self::Keyed(map) => WeakInner::Keyed(Rc::downgrade(&map.inner)),
            Self::Indexed(seq) => WeakInner::Indexed(Rc::downgrade(&seq.inner)),
        })
    }

    /// Attach `sink`. Returns false if it was already attached.
    pub fn attach(&self, sink: &Rc<dyn MutationSink>) -> bool {
        match self {
            Self::Keyed(map) => map.inner.borrow_mut().watchers.attach(sink),
            Self::Indexed(seq) => seq.inner.borrow_mut().watchers.attach(sink),
        }
    }

    /// Detach `sink`. Returns false if it was not attached.
    pub fn detach(&self, sink: &Rc<dyn MutationSink>) -> bool {
        match self {
            Self::Keyed(map) => map.inner.borrow_mut().watchers.detach(sink),
            Self::Indexed(seq) => seq.inner.borrow_mut().watchers.detach(sink),
        }
    }

    #[must_use]
    pub fn is_attached(&self, sink: &Rc<dyn MutationSink>) -> bool {
        match self {
            Self::Keyed(map) => map.inner.borrow().watchers.contains(sink),
            Self::Indexed(seq) => seq.inner.borrow().watchers.contains(sink),
        }
    }

    /// Number of live sinks attached.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        match self {
            Self::Keyed(map) => map.inner.borrow().watchers.live_count(),
            Self::Indexed(seq) => seq.inner.borrow().watchers.live_count(),
        }
    }

    /// Direct child containers, with the key they sit under.
    ///
    /// Sequence elements have no key and are reported with `None`.
    #[must_use]
    pub fn child_containers(&self) -> Vec<(Option<String>, Container)> {
        match self {
            Self::Keyed(map) => map
                .entries()
                .into_iter()
                .filter_map(|(key, value)| value.as_container().map(|child| (Some(key), child)))
                .collect(),
            Self::Indexed(seq) => seq
                .to_vec()
                .iter()
                .filter_map(Value::as_container)
                .map(|child| (None, child))
                .collect(),
        }
    }

    /// Current content of `slot`; `None` when a key is absent.
    ///
    /// # Errors
    ///
    /// [`ContainerError::SlotMismatch`] for a key slot on a sequence or an index
    /// slot on a map, [`ContainerError::IndexOutOfBounds`] past the end.
    pub fn read_slot(&self, slot: &Slot) -> Result<Option<Value>, ContainerError> {
        match (self, slot) {
            (Self::Keyed(map), Slot::Key(key)) => Ok(map.get(key)),
            (Self::Indexed(seq), Slot::Index(index)) => {
                let length = seq.len();
                seq.get(*index)
                    .map(Some)
                    .ok_or(ContainerError::IndexOutOfBounds {
                        index: *index,
                        length,
                    })
            }
            _ => Err(self.mismatch(slot, "read")),
        }
    }

    /// Make `slot` hold `value`, or remove a key slot when `value` is `None`.
    ///
    /// # Errors
    ///
    /// Same as [`read_slot`](Self::read_slot); additionally an index slot
    /// cannot be made absent.
    pub fn write_slot(&self, slot: &Slot, value: Option<Value>) -> Result<(), ContainerError> {
        match (self, slot, value) {
            (Self::Keyed(map), Slot::Key(key), Some(value)) => {
                map.set(key.clone(), value);
                Ok(())
            }
            (Self::Keyed(map), Slot::Key(key), None) => {
                map.remove(key);
                Ok(())
            }
            (Self::Indexed(seq), Slot::Index(index), Some(value)) => {
                seq.replace(*index, value).map(drop)
            }
            (_, _, None) => Err(self.mismatch(slot, "absent")),
            (_, _, Some(_)) => Err(self.mismatch(slot, "present")),
        }
    }

    fn mismatch(&self, slot: &Slot, value_state: &'static str) -> ContainerError {
        ContainerError::SlotMismatch {
            container: self.id(),
            slot: slot.clone(),
            value_state,
        }
    }

    /// Snapshot as JSON.
    ///
    /// # Errors
    ///
    /// [`ContainerError::Cycle`] if the container is reachable from itself.
    pub fn to_json(&self) -> Result<Json, ContainerError> {
        Value::from(self.clone()).to_json()
    }
}

impl From<KeyedContainer> for Container {
    fn from(map: KeyedContainer) -> Self {
        Self::Keyed(map)
    }
}

impl From<IndexedSequence> for Container {
    fn from(seq: IndexedSequence) -> Self {
        Self::Indexed(seq)
    }
}

impl From<&KeyedContainer> for Container {
    fn from(map: &KeyedContainer) -> Self {
        Self::Keyed(map.clone())
    }
}

impl From<&IndexedSequence> for Container {
    fn from(seq: &IndexedSequence) -> Self {
        Self::Indexed(seq.clone())
    }
}

/// Weak counterpart of [`Container`]; does not keep the container alive.
#[derive(Clone)]
pub struct WeakContainer(WeakInner);

#[derive(Clone)]
enum WeakInner {
    Keyed(Weak<RefCell<KeyedInner>>),
    Indexed(Weak<RefCell<IndexedInner>>),
}

impl fmt::Debug for WeakContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakContainer")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl WeakContainer {
    #[must_use]
    pub fn upgrade(&self) -> Option<Container> {
        match &self.0 {
            WeakInner::Keyed(weak) => weak
                .upgrade()
                .map(|inner| Container::Keyed(KeyedContainer { inner })),
            WeakInner::Indexed(weak) => weak
                .upgrade()
                .map(|inner| Container::Indexed(IndexedSequence { inner })),
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        match &self.0 {
            WeakInner::Keyed(weak) => weak.strong_count() > 0,
            WeakInner::Indexed(weak) => weak.strong_count() > 0,
        }
    }
}
