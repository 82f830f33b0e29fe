#![forbid(unsafe_code)]

//! Self-invertible mutation records.
//!
//! A [`MutationRecord`] is derived from one accepted [`MutationEvent`] and is
//! then flipped in place on every traversal: [`MutationRecord::reverse`]
//! mutates the container back *and* rewrites the record so that reversing it
//! again replays the original change. Undo and redo share this one transform.
//!
//! # Record shapes
//!
//! | record  | holds                                   | reversal                              |
//! |---------|-----------------------------------------|---------------------------------------|
//! | `Slot`  | one key/index with `before` / `after`   | write `before`, swap sides            |
//! | `Group` | several keyed slot edits (coalesced)    | reverse each edit, newest first       |
//! | `Splice`| `index`, `added_count`, `removed` run   | re-splice, swap counts and runs       |
//!
//! Keyed `Add` / `Update` / `Delete` are all slot edits; the kind is derived
//! from which side is absent, so `Add` reversed is `Delete` and vice versa
//! without a separate tag.

use revtree_core::{
    Container, ContainerError, ContainerId, IndexedSequence, Mutation, MutationEvent,
    MutationKind, Slot, Value,
};

/// A change to one slot of a container.
///
/// `before` is what a reversal writes back; `after` is what the slot holds
/// while the edit is applied. `None` on a keyed slot means the key is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotEdit {
    pub container: Container,
    pub slot: Slot,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl SlotEdit {
    /// The mutation this edit currently represents.
    ///
    /// An edit with both sides absent (a key added then deleted within one
    /// coalesced run) reports `Delete` and reverses as a no-op.
    #[must_use]
    pub fn kind(&self) -> MutationKind {
        match (&self.before, &self.after) {
            (_, None) => MutationKind::Delete,
            (None, Some(_)) => MutationKind::Add,
            (Some(_), Some(_)) => MutationKind::Update,
        }
    }

    /// The key, for edits on a keyed container.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.slot.as_key()
    }

    fn reverse(&mut self) -> Result<(), ContainerError> {
        let current = self.container.read_slot(&self.slot)?;
        self.container.write_slot(&self.slot, self.before.clone())?;
        self.after = self.before.take();
        self.before = current;
        Ok(())
    }
}

/// A splice of a sequence.
///
/// The elements inserted by the splice are not stored: they are whatever the
/// sequence holds at `index..index + added_count` when the record is reversed.
#[derive(Debug, Clone, PartialEq)]
pub struct SpliceEdit {
    pub sequence: IndexedSequence,
    pub index: usize,
    pub added_count: usize,
    pub removed: Vec<Value>,
}

impl SpliceEdit {
    fn reverse(&mut self) -> Result<(), ContainerError> {
        let length = self.sequence.len();
        if self.index + self.added_count > length {
            return Err(ContainerError::IndexOutOfBounds {
                index: self.index + self.added_count,
                length,
            });
        }
        let displaced = self
            .sequence
            .splice(self.index, self.added_count, self.removed.clone())?;
        self.added_count = self.removed.len();
        self.removed = displaced;
        Ok(())
    }
}

/// One step of history (or one member of a transaction).
#[derive(Debug, Clone, PartialEq)]
pub enum MutationRecord {
    Slot(SlotEdit),
    /// Coalesced edits to several keys of one merge group.
    Group(Vec<SlotEdit>),
    Splice(SpliceEdit),
}

impl MutationRecord {
    /// Normalize an event into a record.
    ///
    /// Returns `None` for a splice reported by something other than a
    /// sequence.
    #[must_use]
    pub fn from_event(event: &MutationEvent) -> Option<Self> {
        let container = event.container.clone();
        let record = match &event.mutation {
            Mutation::Add { key, value } => Self::Slot(SlotEdit {
                container,
                slot: Slot::Key(key.clone()),
                before: None,
                after: Some(value.clone()),
            }),
            Mutation::Update {
                slot,
                old_value,
                value,
            } => Self::Slot(SlotEdit {
                container,
                slot: slot.clone(),
                before: Some(old_value.clone()),
                after: Some(value.clone()),
            }),
            Mutation::Delete { key, old_value } => Self::Slot(SlotEdit {
                container,
                slot: Slot::Key(key.clone()),
                before: Some(old_value.clone()),
                after: None,
            }),
            Mutation::Splice {
                index,
                removed,
                added_count,
                ..
            } => Self::Splice(SpliceEdit {
                sequence: container.as_indexed()?.clone(),
                index: *index,
                added_count: *added_count,
                removed: removed.clone(),
            }),
        };
        Some(record)
    }

    /// Kind of the record; a group reports the kind of its first edit.
    #[must_use]
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Slot(edit) => edit.kind(),
            Self::Group(edits) => edits.first().map_or(MutationKind::Update, SlotEdit::kind),
            Self::Splice(_) => MutationKind::Splice,
        }
    }

    /// Slot edits of a record that only touches keyed slots.
    ///
    /// `None` for splices and index updates: those never coalesce.
    #[must_use]
    pub fn keyed_edits(&self) -> Option<&[SlotEdit]> {
        let edits = match self {
            Self::Slot(edit) => std::slice::from_ref(edit),
            Self::Group(edits) => edits.as_slice(),
            Self::Splice(_) => return None,
        };
        edits.iter().all(|e| e.key().is_some()).then_some(edits)
    }

    /// Distinct containers this record mutates when reversed.
    #[must_use]
    pub fn containers(&self) -> Vec<Container> {
        let mut out: Vec<Container> = Vec::new();
        let mut push = |c: Container| {
            if !out.iter().any(|seen| seen.id() == c.id()) {
                out.push(c);
            }
        };
        match self {
            Self::Slot(edit) => push(edit.container.clone()),
            Self::Group(edits) => edits.iter().for_each(|e| push(e.container.clone())),
            Self::Splice(edit) => push(Container::Indexed(edit.sequence.clone())),
        }
        out
    }

    /// True if this record touches `slot` of container `id`.
    #[must_use]
    pub fn touches(&self, id: ContainerId, slot: &Slot) -> bool {
        self.keyed_edits()
            .is_some_and(|edits| edits.iter().any(|e| e.container.id() == id && e.slot == *slot))
    }

    /// Fold a later write into this record.
    ///
    /// A write to a slot already in the record only replaces its `after`
    /// side, keeping the first captured `before`. A write to a new slot adds
    /// an edit, turning a single-slot record into a group. Returns false (and
    /// changes nothing) for splice records.
    pub fn absorb(&mut self, edit: SlotEdit) -> bool {
        let existing = match self {
            Self::Splice(_) => return false,
            Self::Slot(current) => {
                if current.container.id() == edit.container.id() && current.slot == edit.slot {
                    current.after = edit.after;
                    return true;
                }
                current.clone()
            }
            Self::Group(edits) => {
                if let Some(current) = edits
                    .iter_mut()
                    .find(|e| e.container.id() == edit.container.id() && e.slot == edit.slot)
                {
                    current.after = edit.after;
                } else {
                    edits.push(edit);
                }
                return true;
            }
        };
        *self = Self::Group(vec![existing, edit]);
        true
    }

    /// Apply the inverse of this record to its container(s) and flip it.
    ///
    /// # Errors
    ///
    /// Propagates [`ContainerError`] when the container no longer matches
    /// the record (e.g. a sequence shrank outside of history).
    pub fn reverse(&mut self) -> Result<(), ContainerError> {
        match self {
            Self::Slot(edit) => edit.reverse(),
            Self::Group(edits) => edits.iter_mut().rev().try_for_each(SlotEdit::reverse),
            Self::Splice(edit) => edit.reverse(),
        }
    }
}
