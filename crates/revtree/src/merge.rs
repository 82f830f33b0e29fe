#![forbid(unsafe_code)]

//! Coalescing of repeated writes into one history step.
//!
//! Merging is opt-in. A key becomes mergeable through an allow-list, a merge
//! group, or by not being on an active deny-list. Eligibility is checked in
//! this order, first match wins:
//!
//! 1. key on the container's or the global merge deny-list: no
//! 2. key on the container's or the global merge allow-list: yes
//! 3. key in a container merge group or a global merge group: yes
//! 4. an allow-list applies (container list present, or global non-empty): no
//! 5. a deny-list applies (container list present, or global non-empty): yes
//! 6. no rule at all: no
//!
//! # Canonical slots
//!
//! Each (container, key) maps to a set of [`CanonicalSlot`]s: one per
//! container group and one per global group containing the key, or the bare
//! `(container, key)` when it is in no group. A write coalesces with the last
//! record when its slot set intersects the union of the slot sets of the keys
//! that record already holds. Container and global groups therefore never
//! shadow each other: membership in either is enough to join a run.
//!
//! Global groups span containers: `x` on one map and `x` on another coalesce
//! when a global group lists `x`.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use web_time::Instant;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use revtree_core::ContainerId;

use crate::filter::{ScopedLists, key_set};
use crate::history::{HistoryEntry, HistoryStore};

/// Timing limits on coalescing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct MergeConfig {
    /// Maximum time between the last coalesced write and the next one
    /// (milliseconds). `None` coalesces regardless of timing.
    pub max_delay_ms: Option<u64>,
}

impl MergeConfig {
    #[must_use]
    pub fn with_max_delay_ms(max_delay_ms: u64) -> Self {
        Self {
            max_delay_ms: Some(max_delay_ms),
        }
    }
}

/// The logical slot a write belongs to for coalescing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CanonicalSlot {
    /// A merge group of one container.
    Group {
        container: ContainerId,
        members: BTreeSet<String>,
    },
    /// A global merge group, shared by every container.
    Global { members: BTreeSet<String> },
    /// A key in no group.
    Key { container: ContainerId, key: String },
}

/// Outcome of [`MergeSpec::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Fold the write into the record at `index`.
    Coalesce { index: usize },
    AppendNew,
}

/// Merge rules for all containers.
///
/// Per-container rules are keyed by id and kept until [`forget`](Self::forget)
/// or `Engine::unobserve`, like [`FilterSpec`](crate::FilterSpec) lists.
#[derive(Debug, Clone, Default)]
pub struct MergeSpec {
    lists: ScopedLists,
    groups: HashMap<ContainerId, Vec<BTreeSet<String>>>,
    global_groups: Vec<BTreeSet<String>>,
}

impl MergeSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn set_allow_list<K: Into<String>>(
        &mut self,
        id: ContainerId,
        keys: impl IntoIterator<Item = K>,
    ) {
        self.lists.set_allow(id, key_set(keys));
    }

    pub fn set_deny_list<K: Into<String>>(
        &mut self,
        id: ContainerId,
        keys: impl IntoIterator<Item = K>,
    ) {
        self.lists.set_deny(id, key_set(keys));
    }

    pub fn remove_allow_list(&mut self, id: ContainerId) -> bool {
        self.lists.remove_allow(id)
    }

    pub fn remove_deny_list(&mut self, id: ContainerId) -> bool {
        self.lists.remove_deny(id)
    }

    /// Replace the merge groups of container `id`. Empty groups are dropped.
    pub fn set_groups<G, K>(&mut self, id: ContainerId, groups: G)
    where
        G: IntoIterator,
        G::Item: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let groups: Vec<_> = groups
            .into_iter()
            .map(|group| key_set(group))
            .filter(|g| !g.is_empty())
            .collect();
        self.groups.insert(id, groups);
    }

    pub fn remove_groups(&mut self, id: ContainerId) -> bool {
        self.groups.remove(&id).is_some()
    }

    #[must_use]
    pub fn groups(&self, id: ContainerId) -> &[BTreeSet<String>] {
        self.groups.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Add a global merge group. Returns false if an identical group exists
    /// or the group is empty.
    pub fn add_global_group<K: Into<String>>(&mut self, keys: impl IntoIterator<Item = K>) -> bool {
        let group = key_set(keys);
        if group.is_empty() || self.global_groups.contains(&group) {
            return false;
        }
        self.global_groups.push(group);
        true
    }

    pub fn remove_global_group<K: Into<String>>(
        &mut self,
        keys: impl IntoIterator<Item = K>,
    ) -> bool {
        let group = key_set(keys);
        let before = self.global_groups.len();
        self.global_groups.retain(|g| *g != group);
        self.global_groups.len() < before
    }

    #[must_use]
    pub fn global_groups(&self) -> &[BTreeSet<String>] {
        &self.global_groups
    }

    pub fn add_global_allow<K: Into<String>>(&mut self, keys: impl IntoIterator<Item = K>) {
        self.lists.global_allow_mut().extend(keys.into_iter().map(Into::into));
    }

    pub fn remove_global_allow<K: AsRef<str>>(&mut self, keys: impl IntoIterator<Item = K>) {
        for key in keys {
            self.lists.global_allow_mut().remove(key.as_ref());
        }
    }

    pub fn add_global_deny<K: Into<String>>(&mut self, keys: impl IntoIterator<Item = K>) {
        self.lists.global_deny_mut().extend(keys.into_iter().map(Into::into));
    }

    pub fn remove_global_deny<K: AsRef<str>>(&mut self, keys: impl IntoIterator<Item = K>) {
        for key in keys {
            self.lists.global_deny_mut().remove(key.as_ref());
        }
    }

    #[must_use]
    pub fn global_allow(&self) -> Vec<&str> {
        self.lists.global_allow().iter().map(String::as_str).collect()
    }

    #[must_use]
    pub fn global_deny(&self) -> Vec<&str> {
        self.lists.global_deny().iter().map(String::as_str).collect()
    }

    /// Drop every rule specific to container `id`.
    pub fn forget(&mut self, id: ContainerId) -> bool {
        let lists = self.lists.forget(id);
        let groups = self.groups.remove(&id).is_some();
        lists || groups
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Whether writes to `key` on container `id` may coalesce at all.
    #[must_use]
    pub fn is_mergeable(&self, id: ContainerId, key: &str) -> bool {
        let local_allow = self.lists.allow(id);
        let local_deny = self.lists.deny(id);
        let global_allow = self.lists.global_allow();
        let global_deny = self.lists.global_deny();

        if local_deny.is_some_and(|d| d.contains(key)) || global_deny.contains(key) {
            return false;
        }
        if local_allow.is_some_and(|a| a.contains(key)) || global_allow.contains(key) {
            return true;
        }
        if self.groups(id).iter().any(|g| g.contains(key))
            || self.global_groups.iter().any(|g| g.contains(key))
        {
            return true;
        }
        if local_allow.is_some() || !global_allow.is_empty() {
            return false;
        }
        local_deny.is_some() || !global_deny.is_empty()
    }

    /// Logical slots a write to `key` on container `id` belongs to.
    #[must_use]
    pub fn canonical_slots(&self, id: ContainerId, key: &str) -> BTreeSet<CanonicalSlot> {
        let mut slots: BTreeSet<CanonicalSlot> = self
            .groups(id)
            .iter()
            .filter(|g| g.contains(key))
            .map(|g| CanonicalSlot::Group {
                container: id,
                members: g.clone(),
            })
            .collect();
        slots.extend(
            self.global_groups
                .iter()
                .filter(|g| g.contains(key))
                .map(|g| CanonicalSlot::Global { members: g.clone() }),
        );
        if slots.is_empty() {
            slots.insert(CanonicalSlot::Key {
                container: id,
                key: key.to_owned(),
            });
        }
        slots
    }

    /// Decide whether a write to `key` on container `id` at time `at` folds
    /// into the last history entry.
    #[must_use]
    pub fn decide(
        &self,
        history: &HistoryStore,
        id: ContainerId,
        key: &str,
        at: Instant,
        config: &MergeConfig,
    ) -> MergeDecision {
        if !self.is_mergeable(id, key) || history.can_redo() {
            return MergeDecision::AppendNew;
        }
        let Some(index) = history.cursor() else {
            return MergeDecision::AppendNew;
        };
        let Some(HistoryEntry::Record(stored)) = history.get(index) else {
            return MergeDecision::AppendNew;
        };
        if let Some(max_delay_ms) = config.max_delay_ms
            && at.saturating_duration_since(stored.touched_at) > Duration::from_millis(max_delay_ms)
        {
            return MergeDecision::AppendNew;
        }
        let Some(edits) = stored.record.keyed_edits() else {
            return MergeDecision::AppendNew;
        };

        let mut existing = BTreeSet::new();
        for edit in edits {
            let container = edit.container.id();
            let Some(edit_key) = edit.key() else {
                return MergeDecision::AppendNew;
            };
            if !self.is_mergeable(container, edit_key) {
                return MergeDecision::AppendNew;
            }
            existing.extend(self.canonical_slots(container, edit_key));
        }

        let incoming = self.canonical_slots(id, key);
        if incoming.is_disjoint(&existing) {
            MergeDecision::AppendNew
        } else {
            MergeDecision::Coalesce { index }
        }
    }
}
