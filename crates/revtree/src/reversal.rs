#![forbid(unsafe_code)]

//! Undo/redo traversals over the history store.
//!
//! Both directions call the same [`MutationRecord::reverse`] transform; only
//! the walk differs:
//!
//! - **undo** looks at the entry at the cursor. A record is reversed alone.
//!   An end boundary `k + 1` pulls in everything back to its start `k`,
//!   reversed newest first, and the cursor lands just before the start.
//! - **redo** looks at the entry after the cursor. A start boundary `k`
//!   pulls in everything up to its end `k + 1`, replayed oldest first.
//!
//! While a record is reversed its containers are unwatched, so the reversal
//! does not echo back into history as a fresh mutation.
//!
//! # Failure Modes
//!
//! - **Unpaired boundary**: the partner is not reachable, or undo meets a
//!   start boundary (an open transaction). Nothing is touched and
//!   [`EngineError::UnpairedBoundary`] is returned.
//! - **Container mismatch** mid-unit: entries already reversed stay reversed
//!   and the cursor is moved past them, so history and tree stay consistent
//!   entry by entry.

use revtree_core::{Container, ContainerError, ObservationAdapter};

use crate::error::EngineError;
use crate::flag::FlagId;
use crate::history::{HistoryEntry, HistoryStore};
use crate::record::MutationRecord;

fn unpaired(id: FlagId, index: usize) -> EngineError {
    tracing::warn!(%id, index, "unpaired transaction boundary");
    EngineError::UnpairedBoundary { id, index }
}

/// Reverse `record` with its containers temporarily unwatched.
pub(crate) fn reverse_record<A: ObservationAdapter>(
    adapter: &mut A,
    record: &mut MutationRecord,
) -> Result<(), ContainerError> {
    let silenced: Vec<Container> = record
        .containers()
        .into_iter()
        .filter(|c| adapter.unwatch(c))
        .collect();
    let result = record.reverse();
    for container in &silenced {
        adapter.watch(container);
    }
    result
}

fn reverse_entry<A: ObservationAdapter>(
    history: &mut HistoryStore,
    adapter: &mut A,
    index: usize,
) -> Result<usize, ContainerError> {
    match history.get_mut(index) {
        Some(HistoryEntry::Record(stored)) => {
            reverse_record(adapter, &mut stored.record)?;
            Ok(1)
        }
        _ => Ok(0),
    }
}

/// Undo one unit. `Ok(None)` when there is nothing to undo, otherwise the
/// number of records reversed.
pub(crate) fn undo<A: ObservationAdapter>(
    history: &mut HistoryStore,
    adapter: &mut A,
) -> Result<Option<usize>, EngineError> {
    let Some(top) = history.cursor() else {
        return Ok(None);
    };
    let start = match history.get(top) {
        Some(HistoryEntry::Boundary(id)) => {
            let id = *id;
            if id.is_start() {
                return Err(unpaired(id, top));
            }
            history
                .find_backward(id.partner(), top)
                .ok_or_else(|| unpaired(id, top))?
        }
        _ => top,
    };

    let mut reversed = 0;
    for index in (start..=top).rev() {
        match reverse_entry(history, adapter, index) {
            Ok(n) => reversed += n,
            Err(err) => {
                history.set_applied(index + 1);
                return Err(err.into());
            }
        }
    }
    history.set_applied(start);
    Ok(Some(reversed))
}

/// Redo one unit. `Ok(None)` when there is nothing to redo, otherwise the
/// number of records replayed.
pub(crate) fn redo<A: ObservationAdapter>(
    history: &mut HistoryStore,
    adapter: &mut A,
) -> Result<Option<usize>, EngineError> {
    if !history.can_redo() {
        return Ok(None);
    }
    let next = history.cursor().map_or(0, |cursor| cursor + 1);
    let end = match history.get(next) {
        Some(HistoryEntry::Boundary(id)) => {
            let id = *id;
            if !id.is_start() {
                return Err(unpaired(id, next));
            }
            history
                .find_forward(id.partner(), next + 1, history.len())
                .ok_or_else(|| unpaired(id, next))?
        }
        _ => next,
    };

    let mut replayed = 0;
    for index in next..=end {
        match reverse_entry(history, adapter, index) {
            Ok(n) => replayed += n,
            Err(err) => {
                history.set_applied(index);
                return Err(err.into());
            }
        }
    }
    history.set_applied(end + 1);
    Ok(Some(replayed))
}
