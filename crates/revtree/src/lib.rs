#![forbid(unsafe_code)]

//! revtree: undo/redo history for trees of maps and sequences.
//!
//! Attach an [`Engine`] to a root container; every mutation anywhere in the
//! tree becomes a reversible history step.
//!
//! # Key Components
//!
//! - [`Engine`] - observation, ingestion, undo/redo, transactions
//! - [`HistoryStore`] - linear history with a cursor and branch truncation
//! - [`MutationRecord`] - self-invertible record of one accepted mutation
//! - [`FilterSpec`] - which keys are tracked at all
//! - [`MergeSpec`] - which writes coalesce into one step
//! - [`FlagId`] / [`TransactionScope`] - atomic multi-mutation steps
//! - [`EngineConfig`] - limits and global rules, loadable from TOML/JSON with
//!   the `config` feature
//!
//! # Role in revtree
//! The data model (containers, values, mutation events, adapters) lives in
//! [`revtree_core`]; its public types are re-exported at the crate root.

pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod flag;
pub mod history;
pub mod merge;
pub mod record;
mod reversal;

pub use revtree_core::{
    Container, ContainerError, ContainerId, IndexedSequence, KeyedContainer, Mutation,
    MutationEvent, MutationKind, MutationSink, ObservationAdapter, Slot, UnsupportedEnvironment,
    Value, WatchAdapter, WeakContainer,
};

pub use config::{ConfigError, EngineConfig, GlobalFilterConfig, GlobalMergeRules};
pub use engine::Engine;
pub use error::EngineError;
pub use filter::FilterSpec;
pub use flag::{FlagId, FlagIdGenerator, TransactionScope};
pub use history::{HistoryConfig, HistoryEntry, HistoryStore, StoredRecord};
pub use merge::{CanonicalSlot, MergeConfig, MergeDecision, MergeSpec};
pub use record::{MutationRecord, SlotEdit, SpliceEdit};
