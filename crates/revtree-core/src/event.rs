#![forbid(unsafe_code)]

//! Normalized mutation events emitted by tracked containers.
//!
//! Every mutating call on a [`KeyedContainer`](crate::KeyedContainer) or
//! [`IndexedSequence`](crate::IndexedSequence) produces at most one
//! [`MutationEvent`], delivered synchronously to every attached
//! [`MutationSink`]. Events carry the pre-mutation value(s) plus the value
//! written, because sinks are free to buffer them and the container may have
//! moved on by the time the event is consumed.

use std::fmt;

use web_time::Instant;

use crate::container::Container;
use crate::value::Value;

/// The four mutation shapes a container can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// A key that did not exist was set.
    Add,
    /// An existing key or in-range index was overwritten.
    Update,
    /// An existing key was removed.
    Delete,
    /// A run of sequence elements was replaced by another run.
    Splice,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Splice => "splice",
        };
        f.write_str(name)
    }
}

/// Address of a single scalar position inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    /// A key of a keyed container.
    Key(String),
    /// An index of a sequence.
    Index(usize),
}

impl Slot {
    /// The key, if this is a keyed slot.
    #[must_use]
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::Key(key) => Some(key),
            Self::Index(_) => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{key:?}"),
            Self::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// What changed, with the data needed to reverse it.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// `key` was absent and now holds `value`.
    Add { key: String, value: Value },
    /// `slot` held `old_value` and now holds `value`.
    Update {
        slot: Slot,
        old_value: Value,
        value: Value,
    },
    /// `key` held `old_value` and is now absent.
    Delete { key: String, old_value: Value },
    /// Starting at `index`, `removed` was replaced by `added_count` elements.
    ///
    /// `inserted` holds those elements as they were at mutation time. It is
    /// transient: history records only keep `removed` and `added_count`.
    Splice {
        index: usize,
        removed: Vec<Value>,
        added_count: usize,
        inserted: Vec<Value>,
    },
}

impl Mutation {
    /// The shape of this mutation.
    #[must_use]
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Add { .. } => MutationKind::Add,
            Self::Update { .. } => MutationKind::Update,
            Self::Delete { .. } => MutationKind::Delete,
            Self::Splice { .. } => MutationKind::Splice,
        }
    }

    /// The map key touched, for keyed scalar mutations.
    ///
    /// Index updates and splices return `None`: they are never subject to
    /// per-key rules.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Add { key, .. } | Self::Delete { key, .. } => Some(key),
            Self::Update { slot, .. } => slot.as_key(),
            Self::Splice { .. } => None,
        }
    }

    /// Values written into the container by this mutation.
    pub fn written_values(&self) -> impl Iterator<Item = &Value> {
        let values: &[Value] = match self {
            Self::Add { value, .. } | Self::Update { value, .. } => std::slice::from_ref(value),
            Self::Delete { .. } => &[],
            Self::Splice { inserted, .. } => inserted,
        };
        values.iter()
    }
}

/// One mutation of one container.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    /// The container that changed.
    pub container: Container,
    /// The change itself.
    pub mutation: Mutation,
    /// When the mutation happened (not when it was delivered).
    pub timestamp: Instant,
}

impl MutationEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(container: Container, mutation: Mutation) -> Self {
        Self {
            container,
            mutation,
            timestamp: Instant::now(),
        }
    }

    /// Shorthand for `self.mutation.kind()`.
    #[must_use]
    pub fn kind(&self) -> MutationKind {
        self.mutation.kind()
    }
}

/// Receiver of container mutation events.
///
/// Containers hold sinks weakly; a sink stops receiving events once its last
/// strong reference is dropped.
pub trait MutationSink {
    /// Accept one event. Called synchronously from inside the mutating call,
    /// after the container's own borrow has been released.
    fn deliver(&self, event: MutationEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let add = Mutation::Add {
            key: "a".into(),
            value: Value::Int(1),
        };
        assert_eq!(add.kind(), MutationKind::Add);
        assert_eq!(add.key(), Some("a"));

        let splice = Mutation::Splice {
            index: 0,
            removed: vec![],
            added_count: 1,
            inserted: vec![Value::Int(1)],
        };
        assert_eq!(splice.kind(), MutationKind::Splice);
        assert_eq!(splice.key(), None);
    }

    #[test]
    fn index_update_has_no_key() {
        let update = Mutation::Update {
            slot: Slot::Index(3),
            old_value: Value::Int(1),
            value: Value::Int(2),
        };
        assert_eq!(update.key(), None);
        assert_eq!(update.written_values().count(), 1);
    }

    #[test]
    fn delete_writes_nothing() {
        let delete = Mutation::Delete {
            key: "gone".into(),
            old_value: Value::Null,
        };
        assert_eq!(delete.written_values().count(), 0);
    }

    #[test]
    fn display_names() {
        assert_eq!(MutationKind::Splice.to_string(), "splice");
        assert_eq!(Slot::Index(2).to_string(), "[2]");
        assert_eq!(Slot::Key("x".into()).to_string(), "\"x\"");
    }
}
