#![forbid(unsafe_code)]

//! Transaction boundaries.
//!
//! A transaction is delimited by two [`FlagId`] boundary entries in history:
//! a start id `k` (even) and its end id `k + 1` (odd). Everything recorded
//! between them undoes and redoes as one step. Ids come from a per-engine
//! [`FlagIdGenerator`], so two engines never share a counter.
//!
//! ```rust,ignore
//! let end = engine.start_flag();
//! doc.set("a", 0);
//! doc.set("b", 1);
//! engine.end_flag(end);
//!
//! // or, scoped:
//! {
//!     let _tx = engine.transaction_scope();
//!     doc.set("c", 2);
//! } // end boundary written here
//! ```
//!
//! # Invariants
//!
//! 1. Start ids are even, end ids odd; `start.partner() == end`.
//! 2. Nested transactions nest their boundaries; undo of the outer end
//!    reverses everything back to the outer start.

use std::fmt;
use std::ops::{Deref, DerefMut};

use revtree_core::ObservationAdapter;

use crate::engine::Engine;

/// Id of a transaction boundary.
///
/// [`Engine::start_flag`] returns the *end* id; pass it to
/// [`Engine::end_flag`] to close the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use = "pass the id to end_flag to close the transaction"]
pub struct FlagId(u64);

impl FlagId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// True for the opening boundary of a transaction.
    #[must_use]
    pub const fn is_start(self) -> bool {
        self.0 % 2 == 0
    }

    /// The other boundary of the same transaction.
    pub const fn partner(self) -> Self {
        if self.is_start() {
            Self(self.0 + 1)
        } else {
            Self(self.0 - 1)
        }
    }
}

impl fmt::Display for FlagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.is_start() { "start" } else { "end" };
        write!(f, "flag {} ({side})", self.0)
    }
}

/// Issues boundary id pairs for one engine.
#[derive(Debug, Default, Clone)]
pub struct FlagIdGenerator {
    next: u64,
}

impl FlagIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next `(start, end)` pair.
    pub fn next_pair(&mut self) -> (FlagId, FlagId) {
        let start = FlagId(self.next);
        self.next += 2;
        (start, start.partner())
    }
}

/// RAII guard for a transaction.
///
/// Created by [`Engine::transaction_scope`]. The end boundary is written when
/// the guard drops (or on [`end`](Self::end)). The guard derefs to the engine,
/// so nested scopes and configuration stay reachable while it lives.
pub struct TransactionScope<'a, A: ObservationAdapter> {
    engine: &'a mut Engine<A>,
    end: Option<FlagId>,
}

impl<'a, A: ObservationAdapter> TransactionScope<'a, A> {
    pub(crate) fn new(engine: &'a mut Engine<A>) -> Self {
        let end = engine.start_flag();
        Self {
            engine,
            end: Some(end),
        }
    }

    /// Id of the end boundary this scope will write.
    pub fn end_id(&self) -> Option<FlagId> {
        self.end
    }

    /// Close the transaction now.
    pub fn end(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(end) = self.end.take() {
            self.engine.end_flag(end);
        }
    }
}

impl<A: ObservationAdapter> Deref for TransactionScope<'_, A> {
    type Target = Engine<A>;

    fn deref(&self) -> &Self::Target {
        self.engine
    }
}

impl<A: ObservationAdapter> DerefMut for TransactionScope<'_, A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.engine
    }
}

impl<A: ObservationAdapter> Drop for TransactionScope<'_, A> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<A: ObservationAdapter> fmt::Debug for TransactionScope<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionScope")
            .field("end", &self.end)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_are_even_then_odd() {
        let mut ids = FlagIdGenerator::new();
        let (s0, e0) = ids.next_pair();
        let (s1, e1) = ids.next_pair();
        assert_eq!((s0.raw(), e0.raw()), (0, 1));
        assert_eq!((s1.raw(), e1.raw()), (2, 3));
        assert!(s0.is_start());
        assert!(!e0.is_start());
    }

    #[test]
    fn partner_is_symmetric() {
        let start = FlagId::new(4);
        assert_eq!(start.partner(), FlagId::new(5));
        assert_eq!(start.partner().partner(), start);
    }

    #[test]
    fn generators_are_independent() {
        let mut a = FlagIdGenerator::new();
        let mut b = FlagIdGenerator::new();
        let _ = a.next_pair();
        assert_eq!(b.next_pair().0.raw(), 0);
    }

    #[test]
    fn display_names_side() {
        assert_eq!(FlagId::new(2).to_string(), "flag 2 (start)");
        assert_eq!(FlagId::new(3).to_string(), "flag 3 (end)");
    }
}
