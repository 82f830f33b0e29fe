#![forbid(unsafe_code)]

//! Tracked containers for revtree.
//!
//! This crate provides the data side of the history engine:
//!
//! - [`KeyedContainer`] / [`IndexedSequence`] - shared handles to a map or a
//!   sequence, each reporting its own mutations
//! - [`Value`] - the dynamically typed content of a container slot
//! - [`MutationEvent`] - one normalized change, with pre-mutation data
//! - [`ObservationAdapter`] / [`WatchAdapter`] - how events reach the engine
//!
//! # Role in revtree
//! `revtree-core` knows nothing about history. The `revtree` crate consumes
//! the event stream produced here, turns it into reversible records, and
//! mutates containers back through [`Container::write_slot`] and
//! [`IndexedSequence::splice`].

pub mod adapter;
pub mod container;
pub mod event;
pub mod value;

pub use adapter::{ObservationAdapter, UnsupportedEnvironment, WatchAdapter};
pub use container::{
    Container, ContainerError, ContainerId, IndexedSequence, KeyedContainer, WeakContainer,
};
pub use event::{Mutation, MutationEvent, MutationKind, MutationSink, Slot};
pub use value::Value;
