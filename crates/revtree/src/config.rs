#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! [`EngineConfig`] groups the history limit, the merge timing window and the
//! global filter/merge lists an engine starts with. With the `config` feature
//! it can be loaded from TOML or JSON:
//!
//! ```toml
//! # revtree.toml
//! [history]
//! max_depth = 200
//!
//! [merge]
//! max_delay_ms = 750
//!
//! [filter]
//! deny = ["cursor", "selection"]
//!
//! [merge_rules]
//! allow = ["title"]
//! groups = [["width", "height"]]
//! ```
//!
//! ```rust,ignore
//! let config = EngineConfig::from_toml_file("revtree.toml")?;
//! let engine = Engine::with_config(config)?;
//! ```
//!
//! # Defaults
//!
//! `EngineConfig::default()` is unbounded history, no merge window and empty
//! lists: every key tracked, nothing coalesced.

#[cfg(feature = "config")]
use std::path::Path;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use crate::history::HistoryConfig;
use crate::merge::MergeConfig;

// ---------------------------------------------------------------------------
// Top-level EngineConfig
// ---------------------------------------------------------------------------

/// Everything an [`Engine`](crate::Engine) is configured with at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct EngineConfig {
    pub history: HistoryConfig,
    pub merge: MergeConfig,
    /// Global filter lists.
    pub filter: GlobalFilterConfig,
    /// Global merge lists and groups.
    pub merge_rules: GlobalMergeRules,
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_merge(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: GlobalFilterConfig) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_merge_rules(mut self, merge_rules: GlobalMergeRules) -> Self {
        self.merge_rules = merge_rules;
        self
    }

    /// Load from a TOML string.
    #[cfg(feature = "config")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "config")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "config")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Check the configuration for contradictions.
    ///
    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.history.max_depth == Some(0) {
            errors.push("history.max_depth must be > 0 when set".into());
        }
        if self.merge.max_delay_ms == Some(0) {
            errors.push("merge.max_delay_ms must be > 0 when set".into());
        }

        for key in &self.filter.allow {
            if self.filter.deny.contains(key) {
                errors.push(format!("filter: key {key:?} is both allowed and denied"));
            }
        }
        for key in &self.merge_rules.allow {
            if self.merge_rules.deny.contains(key) {
                errors.push(format!("merge_rules: key {key:?} is both allowed and denied"));
            }
        }
        for (i, group) in self.merge_rules.groups.iter().enumerate() {
            if group.is_empty() {
                errors.push(format!("merge_rules.groups[{i}] is empty"));
            }
        }

        let all_keys = self
            .filter
            .allow
            .iter()
            .chain(&self.filter.deny)
            .chain(&self.merge_rules.allow)
            .chain(&self.merge_rules.deny)
            .chain(self.merge_rules.groups.iter().flatten());
        if all_keys.into_iter().any(String::is_empty) {
            errors.push("keys must not be empty strings".into());
        }

        errors
    }

    /// Like [`validate`](Self::validate), as a `Result`.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Global allow/deny lists for tracking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct GlobalFilterConfig {
    /// When non-empty, only these keys are tracked anywhere.
    pub allow: Vec<String>,
    /// These keys are never tracked.
    pub deny: Vec<String>,
}

/// Global merge lists and groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct GlobalMergeRules {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    /// Groups of keys treated as one slot across all containers.
    pub groups: Vec<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur when loading an engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[cfg(feature = "config")]
    #[error("TOML parse error: {0}")]
    Toml(#[source] toml::de::Error),
    #[cfg(feature = "config")]
    #[error("JSON parse error: {0}")]
    Json(#[source] serde_json::Error),
    #[error("validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validates_clean() {
        let errors = EngineConfig::default().validate();
        assert!(errors.is_empty(), "default should validate: {errors:?}");
    }

    #[test]
    fn validate_catches_zero_limits() {
        let config = EngineConfig::new()
            .with_history(HistoryConfig::with_max_depth(0))
            .with_merge(MergeConfig::with_max_delay_ms(0));
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("history.max_depth")));
        assert!(errors.iter().any(|e| e.contains("merge.max_delay_ms")));
    }

    #[test]
    fn validate_catches_contradicting_lists() {
        let config = EngineConfig::new().with_filter(GlobalFilterConfig {
            allow: vec!["a".into()],
            deny: vec!["a".into()],
        });
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("\"a\""));
    }

    #[test]
    fn validate_catches_empty_group_and_key() {
        let config = EngineConfig::new().with_merge_rules(GlobalMergeRules {
            groups: vec![vec![], vec![String::new()]],
            ..GlobalMergeRules::default()
        });
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("groups[0]")));
        assert!(errors.iter().any(|e| e.contains("empty strings")));
    }

    #[test]
    fn validated_wraps_errors() {
        let err = EngineConfig::new()
            .with_history(HistoryConfig::with_max_depth(0))
            .validated()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref e) if e.len() == 1));
        assert!(err.to_string().starts_with("validation errors:"));
    }

    #[cfg(feature = "config")]
    #[test]
    fn toml_sections_are_optional() {
        let config = EngineConfig::from_toml_str("[merge]\nmax_delay_ms = 250\n").unwrap();
        assert_eq!(config.merge.max_delay_ms, Some(250));
        assert_eq!(config.history, HistoryConfig::default());
    }
}
