#![forbid(unsafe_code)]

//! Linear history with a cursor.
//!
//! [`HistoryStore`] keeps records and transaction boundaries in one ordered
//! sequence. The cursor separates applied entries (undo side) from the
//! redo-available suffix:
//!
//! ```text
//! entries:  [ r0, B0, r1, r2, B1, r3 | r4, r5 ]
//!                                  ^ cursor       redo suffix
//!
//! append(r6)  <-- new branch, r4 and r5 are discarded
//! entries:  [ r0, B0, r1, r2, B1, r3, r6 ]
//!                                      ^ cursor
//! ```
//!
//! # Invariants
//!
//! 1. `applied <= entries.len()`; entries at index `>= applied` are redo-only.
//! 2. Appending while redo entries exist discards them first.
//! 3. With a depth limit, the number of undo units never exceeds it after an
//!    append, except while an open transaction sits at the front.
//! 4. The unit tally always describes every stored entry.
//!
//! # Memory Model
//!
//! Entries live in a `VecDeque` so the oldest undo units can be evicted from
//! the front in O(1) per entry. Appends update a running unit tally, so the
//! depth limit is checked without rescanning; only discarding a redo branch
//! rebuilds the tally.

use std::collections::VecDeque;
use std::fmt;

use web_time::Instant;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use crate::flag::FlagId;
use crate::record::MutationRecord;

/// Limits applied by the history store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct HistoryConfig {
    /// Maximum number of undo units kept (`None` = unbounded).
    ///
    /// A unit is one plain record or one closed transaction. Engines refuse
    /// `Some(0)`.
    pub max_depth: Option<usize>,
}

impl HistoryConfig {
    /// No limit.
    #[must_use]
    pub fn unlimited() -> Self {
        Self { max_depth: None }
    }

    /// Keep at most `max_depth` undo units.
    #[must_use]
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth: Some(max_depth),
        }
    }
}

/// A record plus the time of the last write folded into it.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub record: MutationRecord,
    pub touched_at: Instant,
}

impl StoredRecord {
    #[must_use]
    pub fn new(record: MutationRecord, touched_at: Instant) -> Self {
        Self { record, touched_at }
    }
}

/// One history slot.
#[derive(Debug, Clone)]
pub enum HistoryEntry {
    Record(StoredRecord),
    Boundary(FlagId),
}

impl HistoryEntry {
    #[must_use]
    pub fn as_record(&self) -> Option<&MutationRecord> {
        match self {
            Self::Record(stored) => Some(&stored.record),
            Self::Boundary(_) => None,
        }
    }

    #[must_use]
    pub fn boundary(&self) -> Option<FlagId> {
        match self {
            Self::Boundary(id) => Some(*id),
            Self::Record(_) => None,
        }
    }
}

/// Undo units in a run of entries, counted left to right.
///
/// A start boundary is closed by its partner end boundary, which also closes
/// any start opened after it. A closed transaction counts once; records of an
/// open one count individually.
#[derive(Debug, Clone, Default)]
struct UnitTally {
    units: usize,
    /// Open start boundaries with the unit count just before each.
    open: Vec<(FlagId, usize)>,
}

impl UnitTally {
    fn of<'a>(entries: impl IntoIterator<Item = &'a HistoryEntry>) -> Self {
        let mut tally = Self::default();
        for entry in entries {
            tally.push(entry);
        }
        tally
    }

    fn push(&mut self, entry: &HistoryEntry) {
        match entry {
            HistoryEntry::Record(_) => self.units += 1,
            HistoryEntry::Boundary(id) if id.is_start() => self.open.push((*id, self.units)),
            HistoryEntry::Boundary(id) => {
                if let Some(at) = self.open.iter().position(|(start, _)| start.partner() == *id) {
                    self.units = self.open[at].1 + 1;
                    self.open.truncate(at);
                }
            }
        }
    }

    /// Account for `units` complete units removed from the front.
    fn evict_front(&mut self, units: usize) {
        self.units -= units;
        for (_, before) in &mut self.open {
            *before -= units;
        }
    }
}

/// Ordered records and boundaries with an undo/redo cursor.
pub struct HistoryStore {
    entries: VecDeque<HistoryEntry>,
    /// Number of applied entries; the cursor is `applied - 1`.
    applied: usize,
    /// Units over all of `entries`.
    tally: UnitTally,
    config: HistoryConfig,
}

impl fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryStore")
            .field("len", &self.entries.len())
            .field("cursor", &self.cursor())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl HistoryStore {
    #[must_use]
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            applied: 0,
            tally: UnitTally::default(),
            config,
        }
    }

    // ========================================================================
    // Core Operations
    // ========================================================================

    /// Append an entry after the cursor, discarding any redo suffix.
    pub fn append(&mut self, entry: HistoryEntry) {
        self.clear_redo();
        self.tally.push(&entry);
        self.entries.push_back(entry);
        self.applied = self.entries.len();
        self.enforce_limits();
    }

    /// Index of the last applied entry.
    #[must_use]
    pub fn cursor(&self) -> Option<usize> {
        self.applied.checked_sub(1)
    }

    /// Entry at the cursor.
    #[must_use]
    pub fn current(&self) -> Option<&HistoryEntry> {
        self.cursor().and_then(|i| self.entries.get(i))
    }

    pub(crate) fn set_applied(&mut self, applied: usize) {
        debug_assert!(applied <= self.entries.len());
        self.applied = applied.min(self.entries.len());
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.applied > 0
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.applied < self.entries.len()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut HistoryEntry> {
        self.entries.get_mut(index)
    }

    /// Last index `< before` holding boundary `id`.
    #[must_use]
    pub fn find_backward(&self, id: FlagId, before: usize) -> Option<usize> {
        let end = before.min(self.entries.len());
        (0..end)
            .rev()
            .find(|&i| self.entries[i].boundary() == Some(id))
    }

    /// First index `>= from` and `< until` holding boundary `id`.
    #[must_use]
    pub fn find_forward(&self, id: FlagId, from: usize, until: usize) -> Option<usize> {
        let until = until.min(self.entries.len());
        (from..until).find(|&i| self.entries[i].boundary() == Some(id))
    }

    // ========================================================================
    // Info
    // ========================================================================

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Number of undo units on the applied side.
    ///
    /// A closed transaction counts once; the records of a still-open one
    /// count individually.
    #[must_use]
    pub fn undo_depth(&self) -> usize {
        if self.applied == self.entries.len() {
            self.tally.units
        } else {
            UnitTally::of(self.entries.range(..self.applied)).units
        }
    }

    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    pub fn clear(&mut self) {
        self.entries.clear();
        self.applied = 0;
        self.tally = UnitTally::default();
    }

    fn clear_redo(&mut self) {
        let discarded = self.entries.len() - self.applied;
        if discarded > 0 {
            self.entries.truncate(self.applied);
            self.tally = UnitTally::of(&self.entries);
            tracing::debug!(discarded, "history branch discarded");
        }
    }

    /// Entries and units taken by the front of history, up to and including
    /// its first complete unit. `None` while an open transaction is in front.
    fn front_unit(&self) -> Option<(usize, usize)> {
        match self.entries.front()? {
            HistoryEntry::Record(_) => Some((1, 1)),
            HistoryEntry::Boundary(id) if id.is_start() => self
                .find_forward(id.partner(), 1, self.applied)
                .map(|end| (end + 1, 1)),
            HistoryEntry::Boundary(_) => Some((1, 0)),
        }
    }

    fn enforce_limits(&mut self) {
        let Some(max_depth) = self.config.max_depth else {
            return;
        };
        let mut evicted = 0;
        while self.tally.units > max_depth {
            let Some((len, units)) = self.front_unit() else {
                break;
            };
            self.entries.drain(..len);
            self.applied -= len;
            self.tally.evict_front(units);
            evicted += len;
        }
        if evicted > 0 {
            tracing::debug!(evicted, max_depth, "history evicted oldest units");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SlotEdit;
    use revtree_core::{Container, KeyedContainer, Slot, Value};

    fn record(n: i64) -> HistoryEntry {
        HistoryEntry::Record(StoredRecord::new(
            MutationRecord::Slot(SlotEdit {
                container: Container::from(KeyedContainer::new()),
                slot: Slot::Key("k".into()),
                before: None,
                after: Some(Value::Int(n)),
            }),
            Instant::now(),
        ))
    }

    fn boundary(raw: u64) -> HistoryEntry {
        HistoryEntry::Boundary(FlagId::new(raw))
    }

    #[test]
    fn new_store_is_empty() {
        let store = HistoryStore::default();
        assert!(store.is_empty());
        assert_eq!(store.cursor(), None);
        assert!(!store.can_undo());
        assert!(!store.can_redo());
    }

    #[test]
    fn append_advances_cursor() {
        let mut store = HistoryStore::default();
        store.append(record(1));
        store.append(record(2));
        assert_eq!(store.cursor(), Some(1));
        assert!(store.can_undo());
        assert!(!store.can_redo());
    }

    #[test]
    fn append_truncates_redo_suffix() {
        let mut store = HistoryStore::default();
        for n in 0..4 {
            store.append(record(n));
        }
        store.set_applied(2);
        assert!(store.can_redo());

        store.append(record(9));
        assert_eq!(store.len(), 3);
        assert!(!store.can_redo());
        assert_eq!(store.cursor(), Some(2));
    }

    #[test]
    fn boundary_search_respects_range() {
        let mut store = HistoryStore::default();
        store.append(boundary(0));
        store.append(record(1));
        store.append(boundary(1));

        assert_eq!(store.find_backward(FlagId::new(0), 2), Some(0));
        assert_eq!(store.find_backward(FlagId::new(1), 2), None);
        assert_eq!(store.find_forward(FlagId::new(1), 1, 3), Some(2));
        assert_eq!(store.find_forward(FlagId::new(1), 1, 2), None);
    }

    #[test]
    fn undo_depth_counts_transactions_once() {
        let mut store = HistoryStore::default();
        store.append(record(0));
        store.append(boundary(0));
        store.append(record(1));
        store.append(record(2));
        store.append(boundary(1));
        assert_eq!(store.undo_depth(), 2);

        store.append(boundary(2));
        store.append(record(3));
        assert_eq!(store.undo_depth(), 3, "open transaction counts its records");
    }

    #[test]
    fn depth_limit_evicts_whole_units() {
        let mut store = HistoryStore::new(HistoryConfig::with_max_depth(2));
        store.append(boundary(0));
        store.append(record(0));
        store.append(record(1));
        store.append(boundary(1));
        store.append(record(2));
        store.append(record(3));

        assert_eq!(store.undo_depth(), 2);
        assert_eq!(store.len(), 2);
        assert!(store.entries().all(|e| e.as_record().is_some()));
    }

    #[test]
    fn depth_limit_never_splits_open_transaction() {
        let mut store = HistoryStore::new(HistoryConfig::with_max_depth(1));
        store.append(boundary(0));
        store.append(record(0));
        store.append(record(1));
        store.append(record(2));

        assert_eq!(store.len(), 4);
        assert!(store.current().and_then(HistoryEntry::as_record).is_some());
    }

    #[test]
    fn undo_depth_follows_cursor_and_branch_discard() {
        let mut store = HistoryStore::default();
        store.append(record(0));
        store.append(boundary(0));
        store.append(boundary(2));
        store.append(record(1));
        store.append(boundary(3));
        store.append(boundary(1));
        store.append(record(2));
        assert_eq!(store.undo_depth(), 3, "nested transaction is one unit");

        store.set_applied(1);
        assert_eq!(store.undo_depth(), 1);

        store.append(boundary(4));
        assert_eq!(store.len(), 2);
        assert_eq!(store.undo_depth(), 1);
        store.append(record(3));
        store.append(boundary(5));
        assert_eq!(store.undo_depth(), 2);
    }

    #[test]
    fn stray_end_boundary_counts_nothing() {
        let mut store = HistoryStore::new(HistoryConfig::with_max_depth(1));
        store.append(boundary(7));
        store.append(record(0));
        assert_eq!(store.undo_depth(), 1);

        store.append(record(1));
        assert_eq!(store.len(), 1, "stray boundary evicted with the oldest unit");
        assert_eq!(store.undo_depth(), 1);
    }

    #[test]
    fn long_run_stays_within_limit() {
        let mut store = HistoryStore::new(HistoryConfig::with_max_depth(3));
        for n in 0..10_000 {
            if n % 3 == 0 {
                store.append(boundary(2 * n as u64));
                store.append(record(n));
                store.append(boundary(2 * n as u64 + 1));
            } else {
                store.append(record(n));
            }
            assert!(store.undo_depth() <= 3);
        }
        assert_eq!(store.undo_depth(), 3);
    }

    #[test]
    fn clear_resets_cursor() {
        let mut store = HistoryStore::default();
        store.append(record(0));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.cursor(), None);
    }
}
