#![forbid(unsafe_code)]

//! Engine error type.
//!
//! Nothing-to-undo and nothing-to-redo are not errors: [`Engine::undo`] and
//! [`Engine::redo`] return `Ok(false)` for them.
//!
//! [`Engine::undo`]: crate::Engine::undo
//! [`Engine::redo`]: crate::Engine::redo

use revtree_core::{ContainerError, UnsupportedEnvironment};

use crate::flag::FlagId;

/// Errors surfaced by the engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The observation adapter cannot deliver notifications.
    #[error(transparent)]
    UnsupportedEnvironment(#[from] UnsupportedEnvironment),
    /// A traversal met a boundary whose partner is unreachable. History and
    /// tree are left as they were before the call.
    #[error("corrupted history: {id} at entry {index} has no reachable partner")]
    UnpairedBoundary { id: FlagId, index: usize },
    /// The engine configuration failed validation.
    #[error("invalid engine config: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),
    /// A record no longer matches its container.
    #[error("reversal failed: {0}")]
    Reversal(#[from] ContainerError),
}

impl EngineError {
    /// True for errors that indicate history and tree are out of sync.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::UnpairedBoundary { .. } | Self::Reversal(_))
    }
}
