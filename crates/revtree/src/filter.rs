#![forbid(unsafe_code)]

//! Allow/deny filtering of tracked keys.
//!
//! Two scopes apply to every keyed mutation: the container's own lists and
//! the global lists. A key is tracked only if it survives both (AND):
//!
//! 1. container allow-list present and key not in it: reject
//! 2. key in the container deny-list: reject
//! 3. global allow-list non-empty and key not in it: reject
//! 4. key in the global deny-list: reject
//! 5. otherwise: track
//!
//! Sequence index updates and splices carry no key and are never filtered.
//! Lists configured for a container that is not observed are stored and have
//! no effect until it is.
//!
//! Per-container lists are keyed by [`ContainerId`] and stay until
//! [`FilterSpec::forget`] or `Engine::unobserve`. Ids are never reused, so
//! lists left behind by a dropped container match nothing; callers that
//! create and drop many configured containers should `forget` them.

use std::collections::{BTreeSet, HashMap};

use revtree_core::ContainerId;

/// Per-container and global key lists, shared by filtering and merging.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScopedLists {
    allow: HashMap<ContainerId, BTreeSet<String>>,
    deny: HashMap<ContainerId, BTreeSet<String>>,
    global_allow: BTreeSet<String>,
    global_deny: BTreeSet<String>,
}

pub(crate) fn key_set<K: Into<String>>(keys: impl IntoIterator<Item = K>) -> BTreeSet<String> {
    keys.into_iter().map(Into::into).collect()
}

impl ScopedLists {
    pub(crate) fn set_allow(&mut self, id: ContainerId, keys: BTreeSet<String>) {
        self.allow.insert(id, keys);
    }

    pub(crate) fn set_deny(&mut self, id: ContainerId, keys: BTreeSet<String>) {
        self.deny.insert(id, keys);
    }

    pub(crate) fn remove_allow(&mut self, id: ContainerId) -> bool {
        self.allow.remove(&id).is_some()
    }

    pub(crate) fn remove_deny(&mut self, id: ContainerId) -> bool {
        self.deny.remove(&id).is_some()
    }

    pub(crate) fn allow(&self, id: ContainerId) -> Option<&BTreeSet<String>> {
        self.allow.get(&id)
    }

    pub(crate) fn deny(&self, id: ContainerId) -> Option<&BTreeSet<String>> {
        self.deny.get(&id)
    }

    pub(crate) fn global_allow(&self) -> &BTreeSet<String> {
        &self.global_allow
    }

    pub(crate) fn global_deny(&self) -> &BTreeSet<String> {
        &self.global_deny
    }

    pub(crate) fn global_allow_mut(&mut self) -> &mut BTreeSet<String> {
        &mut self.global_allow
    }

    pub(crate) fn global_deny_mut(&mut self) -> &mut BTreeSet<String> {
        &mut self.global_deny
    }

    /// Rules 1-4 of the filter order; true when none rejects.
    pub(crate) fn passes(&self, id: ContainerId, key: &str) -> bool {
        if self.allow(id).is_some_and(|allow| !allow.contains(key)) {
            return false;
        }
        if self.deny(id).is_some_and(|deny| deny.contains(key)) {
            return false;
        }
        if !self.global_allow.is_empty() && !self.global_allow.contains(key) {
            return false;
        }
        !self.global_deny.contains(key)
    }

    pub(crate) fn forget(&mut self, id: ContainerId) -> bool {
        let allow = self.allow.remove(&id).is_some();
        let deny = self.deny.remove(&id).is_some();
        allow || deny
    }
}

/// Which keys produce history at all.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    lists: ScopedLists,
}

impl FilterSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only these keys of container `id` are tracked. Replaces any previous
    /// allow-list for `id`.
    pub fn set_allow_list<K: Into<String>>(
        &mut self,
        id: ContainerId,
        keys: impl IntoIterator<Item = K>,
    ) {
        self.lists.set_allow(id, key_set(keys));
    }

    /// These keys of container `id` are never tracked.
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

    #[must_use]
    pub fn allow_list(&self, id: ContainerId) -> Option<&BTreeSet<String>> {
        self.lists.allow(id)
    }

    #[must_use]
    pub fn deny_list(&self, id: ContainerId) -> Option<&BTreeSet<String>> {
        self.lists.deny(id)
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

    /// Global allow-list, sorted.
    #[must_use]
    pub fn global_allow(&self) -> Vec<&str> {
        self.lists.global_allow().iter().map(String::as_str).collect()
    }

    /// Global deny-list, sorted.
    #[must_use]
    pub fn global_deny(&self) -> Vec<&str> {
        self.lists.global_deny().iter().map(String::as_str).collect()
    }

    /// Whether a mutation of `key` on container `id` is recorded.
    #[must_use]
    pub fn is_tracked(&self, id: ContainerId, key: &str) -> bool {
        self.lists.passes(id, key)
    }

    /// Drop both lists of container `id`.
    pub fn forget(&mut self, id: ContainerId) -> bool {
        self.lists.forget(id)
    }
}
