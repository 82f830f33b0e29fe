#![forbid(unsafe_code)]

//! The history engine.
//!
//! [`Engine`] owns an observation adapter, the history store, the filter and
//! merge rules, and the transaction id generator. Containers stay owned by
//! the application; the engine only holds handles.
//!
//! # Data flow
//!
//! ```text
//! container mutation ──► adapter (buffered) ──flush──► ingest
//!                                                       │ filter: drop untracked keys
//!                                                       │ observe written subtrees
//!                                                       │ merge: coalesce or append
//!                                                       ▼
//!                                                  HistoryStore
//! undo/redo ──flush──► reversal ──► containers (unwatched while written)
//! ```
//!
//! Every entry point that reasons about the cursor (`undo`, `redo`,
//! `start_flag`, `end_flag`) flushes pending adapter events first, so history
//! reflects every mutation made before the call.
//!
//! # Example
//!
//! ```rust
//! use revtree::{Engine, KeyedContainer};
//!
//! let doc = KeyedContainer::new();
//! let mut engine = Engine::with_root(&doc);
//!
//! doc.set("a", 1);
//! assert!(engine.undo().unwrap());
//! assert!(doc.is_empty());
//! assert!(engine.redo().unwrap());
//! assert_eq!(doc.get("a").and_then(|v| v.as_i64()), Some(1));
//! ```

use std::fmt;

use revtree_core::{Container, ContainerId, MutationEvent, ObservationAdapter, WatchAdapter};
use tracing::info_span;
use web_time::Instant;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::filter::FilterSpec;
use crate::flag::{FlagId, FlagIdGenerator, TransactionScope};
use crate::history::{HistoryEntry, HistoryStore, StoredRecord};
use crate::merge::{MergeConfig, MergeDecision, MergeSpec};
use crate::record::{MutationRecord, SlotEdit};
use crate::reversal;

/// Undo/redo engine over a tree of tracked containers.
pub struct Engine<A: ObservationAdapter = WatchAdapter> {
    adapter: A,
    history: HistoryStore,
    filters: FilterSpec,
    merges: MergeSpec,
    merge_config: MergeConfig,
    flags: FlagIdGenerator,
}

impl<A: ObservationAdapter> fmt::Debug for Engine<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("history", &self.history)
            .field("pending", &self.adapter.pending_count())
            .field("merge_config", &self.merge_config)
            .finish()
    }
}

impl Default for Engine<WatchAdapter> {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine<WatchAdapter> {
    /// Engine with the default adapter and configuration, tracking nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::build(WatchAdapter::new(), EngineConfig::default())
    }

    /// Engine tracking `root` and every container reachable from it.
    #[must_use]
    pub fn with_root(root: impl Into<Container>) -> Self {
        let mut engine = Self::new();
        engine.observe(root);
        engine
    }

    /// Engine with the default adapter, configured by `config`.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] if [`EngineConfig::validate`] reports
    /// anything.
    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_adapter(WatchAdapter::new(), config)
    }
}

impl<A: ObservationAdapter> Engine<A> {
    /// Engine driven by a custom adapter.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnsupportedEnvironment`] if the adapter's support check
    /// fails, [`EngineError::InvalidConfig`] if `config` does not validate.
    pub fn with_adapter(adapter: A, config: EngineConfig) -> Result<Self, EngineError> {
        adapter.check_support()?;
        let errors = config.validate();
        if !errors.is_empty() {
            tracing::warn!(errors = errors.len(), "engine config rejected");
            return Err(EngineError::InvalidConfig(errors));
        }
        Ok(Self::build(adapter, config))
    }

    fn build(adapter: A, config: EngineConfig) -> Self {
        let mut filters = FilterSpec::new();
        filters.add_global_allow(config.filter.allow);
        filters.add_global_deny(config.filter.deny);

        let mut merges = MergeSpec::new();
        merges.add_global_allow(config.merge_rules.allow);
        merges.add_global_deny(config.merge_rules.deny);
        for group in config.merge_rules.groups {
            merges.add_global_group(group);
        }

        Self {
            adapter,
            history: HistoryStore::new(config.history),
            filters,
            merges,
            merge_config: config.merge,
            flags: FlagIdGenerator::new(),
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Track `container` and its nested containers. Returns how many
    /// containers started being watched.
    ///
    /// Children of keyed containers are only entered when their key is
    /// tracked; a container already on the current path is not re-entered.
    pub fn observe(&mut self, container: impl Into<Container>) -> usize {
        let container = container.into();
        let root = container.id();
        let watched = self.observe_tree(container, &mut Vec::new());
        tracing::debug!(container = %root, watched, "observe");
        watched
    }

    /// Stop tracking `container` and everything reachable from it, dropping
    /// their filter and merge rules. Returns how many containers stopped
    /// being watched.
    pub fn unobserve(&mut self, container: impl Into<Container>) -> usize {
        let container = container.into();
        let root = container.id();
        let unwatched = self.unobserve_tree(container, &mut Vec::new());
        tracing::debug!(container = %root, unwatched, "unobserve");
        unwatched
    }

    #[must_use]
    pub fn is_observed(&self, id: ContainerId) -> bool {
        self.adapter.is_watching(id)
    }

    fn observe_tree(&mut self, container: Container, path: &mut Vec<ContainerId>) -> usize {
        let id = container.id();
        if path.contains(&id) {
            return 0;
        }
        let mut watched = usize::from(self.adapter.watch(&container));
        path.push(id);
        for (key, child) in container.child_containers() {
            if let Some(key) = key.as_deref()
                && !self.filters.is_tracked(id, key)
            {
                tracing::trace!(container = %id, key, "subtree not observed");
                continue;
            }
            watched += self.observe_tree(child, path);
        }
        path.pop();
        watched
    }

    fn unobserve_tree(&mut self, container: Container, path: &mut Vec<ContainerId>) -> usize {
        let id = container.id();
        if path.contains(&id) {
            return 0;
        }
        let mut unwatched = usize::from(self.adapter.unwatch(&container));
        self.filters.forget(id);
        self.merges.forget(id);
        path.push(id);
        for (_, child) in container.child_containers() {
            unwatched += self.unobserve_tree(child, path);
        }
        path.pop();
        unwatched
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Deliver every buffered adapter event into history. Returns the number
    /// of events drained (accepted or filtered out).
    pub fn flush_pending(&mut self) -> usize {
        let events = self.adapter.take_pending();
        let drained = events.len();
        self.ingest(events);
        self.adapter.settle();
        drained
    }

    /// Feed mutation events into history, in order.
    ///
    /// Events from containers the adapter is not watching are dropped.
    ///
    /// This is the entry point adapters deliver into; [`flush_pending`]
    /// calls it with whatever the engine's own adapter buffered.
    ///
    /// [`flush_pending`]: Self::flush_pending
    pub fn ingest(&mut self, events: impl IntoIterator<Item = MutationEvent>) {
        for event in events {
            self.ingest_event(event);
        }
    }

    fn ingest_event(&mut self, event: MutationEvent) {
        let id = event.container.id();
        if !self.adapter.is_watching(id) {
            tracing::trace!(
                container = %id,
                kind = %event.kind(),
                "mutation from unobserved container"
            );
            return;
        }
        if let Some(key) = event.mutation.key()
            && !self.filters.is_tracked(id, key)
        {
            tracing::trace!(container = %id, key, kind = %event.kind(), "mutation filtered out");
            return;
        }

        for value in event.mutation.written_values() {
            if let Some(child) = value.as_container() {
                self.observe_tree(child, &mut Vec::new());
            }
        }

        let Some(record) = MutationRecord::from_event(&event) else {
            return;
        };
        let decision = match event.mutation.key() {
            Some(key) => {
                self.merges
                    .decide(&self.history, id, key, event.timestamp, &self.merge_config)
            }
            None => MergeDecision::AppendNew,
        };
        match (decision, record) {
            (MergeDecision::Coalesce { index }, MutationRecord::Slot(edit)) => {
                self.coalesce(index, edit, event.timestamp);
            }
            (_, record) => self.append_record(record, event.timestamp),
        }
    }

    fn append_record(&mut self, record: MutationRecord, at: Instant) {
        let kind = record.kind();
        self.history
            .append(HistoryEntry::Record(StoredRecord::new(record, at)));
        tracing::debug!(%kind, len = self.history.len(), "record appended");
    }

    fn coalesce(&mut self, index: usize, edit: SlotEdit, at: Instant) {
        match self.history.get_mut(index) {
            Some(HistoryEntry::Record(stored)) if stored.record.keyed_edits().is_some() => {
                stored.record.absorb(edit);
                stored.touched_at = at;
                tracing::debug!(index, "write coalesced");
            }
            _ => self.append_record(MutationRecord::Slot(edit), at),
        }
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Undo one step (a record or a whole transaction).
    ///
    /// Returns `Ok(false)` when there is nothing to undo.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnpairedBoundary`] on a boundary with no reachable
    /// partner; [`EngineError::Reversal`] when a record no longer fits its
    /// container.
    pub fn undo(&mut self) -> Result<bool, EngineError> {
        self.flush_pending();
        let started = Instant::now();
        let span = info_span!(
            "revtree.undo",
            entries = tracing::field::Empty,
            duration_us = tracing::field::Empty
        )
        .entered();

        let result = reversal::undo(&mut self.history, &mut self.adapter);

        if let Ok(Some(entries)) = &result {
            span.record("entries", *entries as u64);
        }
        span.record("duration_us", started.elapsed().as_micros() as u64);
        result.map(|done| done.is_some())
    }

    /// Redo one step (a record or a whole transaction).
    ///
    /// Returns `Ok(false)` when there is nothing to redo.
    ///
    /// # Errors
    ///
    /// Same as [`undo`](Self::undo).
    pub fn redo(&mut self) -> Result<bool, EngineError> {
        self.flush_pending();
        let started = Instant::now();
        let span = info_span!(
            "revtree.redo",
            entries = tracing::field::Empty,
            duration_us = tracing::field::Empty
        )
        .entered();

        let result = reversal::redo(&mut self.history, &mut self.adapter);

        if let Ok(Some(entries)) = &result {
            span.record("entries", *entries as u64);
        }
        span.record("duration_us", started.elapsed().as_micros() as u64);
        result.map(|done| done.is_some())
    }

    /// Whether history has an applied step, as of the last flush.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    /// Whether history has a redo step, as of the last flush.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Open a transaction. Pass the returned id to [`end_flag`](Self::end_flag).
    pub fn start_flag(&mut self) -> FlagId {
        self.flush_pending();
        let (start, end) = self.flags.next_pair();
        self.history.append(HistoryEntry::Boundary(start));
        tracing::debug!(%start, "transaction opened");
        end
    }

    /// Close the transaction whose end id is `id`.
    pub fn end_flag(&mut self, id: FlagId) {
        self.flush_pending();
        if id.is_start() {
            tracing::warn!(%id, "end_flag called with a start id");
        }
        self.history.append(HistoryEntry::Boundary(id));
        tracing::debug!(%id, "transaction closed");
    }

    /// Run `f` inside one transaction and return its result.
    pub fn transaction<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let end = self.start_flag();
        let out = f(self);
        self.end_flag(end);
        out
    }

    /// Open a transaction closed when the returned guard drops.
    pub fn transaction_scope(&mut self) -> TransactionScope<'_, A> {
        TransactionScope::new(self)
    }

    /// Wrap `f` so that every call runs inside its own transaction.
    pub fn wrap<'a, Arg, R>(
        &'a mut self,
        mut f: impl FnMut(Arg) -> R + 'a,
    ) -> impl FnMut(Arg) -> R + 'a {
        move |arg: Arg| {
            let end = self.start_flag();
            let out = f(arg);
            self.end_flag(end);
            out
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Drop all history and any buffered events.
    pub fn clear_history(&mut self) {
        let dropped = self.adapter.take_pending().len();
        self.adapter.settle();
        self.history.clear();
        tracing::debug!(dropped, "history cleared");
    }

    #[must_use]
    pub fn filters(&self) -> &FilterSpec {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FilterSpec {
        &mut self.filters
    }

    #[must_use]
    pub fn merges(&self) -> &MergeSpec {
        &self.merges
    }

    pub fn merges_mut(&mut self) -> &mut MergeSpec {
        &mut self.merges
    }

    #[must_use]
    pub fn merge_config(&self) -> MergeConfig {
        self.merge_config
    }

    pub fn set_merge_config(&mut self, config: MergeConfig) {
        self.merge_config = config;
    }

    #[must_use]
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }
}
