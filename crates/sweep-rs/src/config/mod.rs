//! Configuration for the compaction engine.
//!
//! Every strategy is **enabled by default** with defaults tuned for coding
//! agents. Override specific strategies through [`SweepConfig`] struct
//! fields, or use the builder methods for common settings.
//!
//! # Examples
//!
//! Minimal configuration, everything uses defaults:
//!
//! ```
//! let config = sweep_rs::config::SweepConfig::default();
//! assert!(config.enabled);
//! ```
//!
//! Disabling a strategy and protecting a tool:
//!
//! ```
//! use sweep_rs::config::{Strategies, SweepConfig, Toggle};
//!
//! let config = SweepConfig {
//!     strategies: Strategies {
//!         truncation: Toggle::disabled(),
//!         ..Strategies::default()
//!     },
//!     ..SweepConfig::default()
//! }
//! .protect_tool("task")
//! .with_turn_protection(4);
//! assert!(!config.strategies.truncation.enabled);
//! ```
//!
//! On disk the schema is versioned ([`CURRENT_VERSION`]); older files are
//! migrated by [`loader::migrate`] before validation.

pub mod loader;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use loader::{ConfigCache, LoadedConfig, default_config_paths, load_layers};

/// Schema version written by this crate.
pub const CURRENT_VERSION: u32 = 2;

/// Default bound on the number of tool calls remembered per session.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

// ── Generic toggle ────────────────────────────────────────────────

/// Generic enabled/disabled wrapper for strategy configurations.
///
/// When `enabled` is `false`, the strategy is skipped regardless of the
/// inner config values.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Toggle<T: Default> {
    /// Whether this strategy is active.
    pub enabled: bool,
    /// Strategy-specific configuration.
    #[serde(flatten)]
    pub config: T,
}

impl<T: Default> Toggle<T> {
    /// Create a disabled instance with default inner config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: T::default(),
        }
    }

    /// Create an enabled instance with the given inner config.
    pub fn enabled(config: T) -> Self {
        Self {
            enabled: true,
            config,
        }
    }
}

impl<T: Default> Default for Toggle<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            config: T::default(),
        }
    }
}

// ── Top-level config ──────────────────────────────────────────────

/// Engine configuration. Every field has a default, so a config file only
/// needs the keys it overrides.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SweepConfig {
    /// Schema version of the file this config was read from.
    pub version: u32,
    /// Master switch. When off, synchronization leaves messages untouched.
    pub enabled: bool,
    /// Maximum number of tool calls remembered per session.
    pub cache_capacity: usize,
    /// Characters per token used by every size estimate.
    pub chars_per_token: f64,
    /// Characters of original text kept in pruned message previews.
    pub preview_chars: usize,
    /// Recent calls are never pruned.
    pub turn_protection: TurnProtection,
    /// Tools that are never pruned and never supersede other calls.
    pub protected_tools: Vec<String>,
    /// Glob patterns; calls on matching paths are never pruned.
    pub protected_file_patterns: Vec<String>,
    pub strategies: Strategies,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            enabled: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            chars_per_token: crate::context::DEFAULT_CHARS_PER_TOKEN,
            preview_chars: 80,
            turn_protection: TurnProtection::default(),
            protected_tools: vec![crate::tools::names::TASK.to_string()],
            protected_file_patterns: Vec::new(),
            strategies: Strategies::default(),
        }
    }
}

impl SweepConfig {
    /// Add a protected tool name.
    pub fn protect_tool(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.protected_tools.contains(&name) {
            self.protected_tools.push(name);
        }
        self
    }

    /// Add a protected file glob.
    pub fn protect_files(mut self, pattern: impl Into<String>) -> Self {
        self.protected_file_patterns.push(pattern.into());
        self
    }

    /// Enable turn protection for the last `turns` turns.
    pub fn with_turn_protection(mut self, turns: u32) -> Self {
        self.turn_protection = TurnProtection {
            enabled: true,
            turns,
        };
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// JSON Schema for the on-disk format, used by the loader to validate
    /// config files.
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(SweepConfig);
        serde_json::to_value(schema)
            .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
    }
}

/// Window of recent turns whose calls are too young to prune.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TurnProtection {
    pub enabled: bool,
    /// Calls less than this many turns old are protected.
    pub turns: u32,
}

impl Default for TurnProtection {
    fn default() -> Self {
        Self {
            enabled: false,
            turns: 4,
        }
    }
}

impl TurnProtection {
    /// Whether a call made at `turn` is still protected at `current_turn`.
    pub fn protects(&self, turn: u32, current_turn: u32) -> bool {
        self.enabled && current_turn.saturating_sub(turn) < self.turns
    }
}

// ── Strategies ────────────────────────────────────────────────────

/// Per-strategy toggles and settings.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Strategies {
    pub supersede: Toggle<SupersedeConfig>,
    pub deduplication: Toggle<DedupConfig>,
    pub truncation: Toggle<TruncationConfig>,
    pub reasoning_compression: Toggle<ReasoningCompressionConfig>,
    pub file_masking: Toggle<FileMaskingConfig>,
}

/// Which supersede rules run.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SupersedeConfig {
    pub identical: bool,
    pub files: bool,
    pub todos: bool,
    pub context: bool,
    pub urls: bool,
    pub state_queries: bool,
    pub snapshots: bool,
    pub retries: bool,
}

impl Default for SupersedeConfig {
    fn default() -> Self {
        Self {
            identical: true,
            files: true,
            todos: true,
            context: true,
            urls: true,
            state_queries: true,
            snapshots: true,
            retries: true,
        }
    }
}

#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    /// Also prune reads whose line range is covered by a newer read.
    pub fuzzy: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { fuzzy: true }
    }
}

#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TruncationConfig {
    /// Tool names whose outputs may be truncated.
    pub tools: Vec<String>,
    /// Minimum age in turns before an output is truncated.
    pub min_turn_age: u32,
    /// Outputs above this many estimated tokens are truncated.
    pub token_threshold: usize,
    /// Share of the threshold budget kept from the start of the output.
    pub head_ratio: f64,
    /// Share of the threshold budget kept from the end of the output.
    pub tail_ratio: f64,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        use crate::tools::names;
        Self {
            tools: [
                names::READ,
                names::GREP,
                names::GLOB,
                names::BASH,
                names::WEBFETCH,
                names::LIST,
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            min_turn_age: 5,
            token_threshold: 2000,
            head_ratio: 0.4,
            tail_ratio: 0.2,
        }
    }
}

#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ReasoningCompressionConfig {
    pub min_turn_age: u32,
    pub token_threshold: usize,
    /// Maximum sentences kept in a compressed block.
    pub max_sentences: usize,
}

impl Default for ReasoningCompressionConfig {
    fn default() -> Self {
        Self {
            min_turn_age: 5,
            token_threshold: 1000,
            max_sentences: 4,
        }
    }
}

#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FileMaskingConfig {
    pub min_turn_age: u32,
    /// Attachments smaller than this are left in place.
    pub min_bytes: usize,
}

impl Default for FileMaskingConfig {
    fn default() -> Self {
        Self {
            min_turn_age: 3,
            min_bytes: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let config: SweepConfig = serde_json::from_str(
            r#"{"cache_capacity": 50, "strategies": {"truncation": {"enabled": false}}}"#,
        )
        .unwrap();
        assert_eq!(config.cache_capacity, 50);
        assert!(!config.strategies.truncation.enabled);
        assert_eq!(config.strategies.truncation.config.token_threshold, 2000);
        assert!(config.strategies.deduplication.enabled);
        assert_eq!(config.version, CURRENT_VERSION);
    }

    #[test]
    fn toggle_settings_are_flattened() {
        let config: SweepConfig = serde_json::from_str(
            r#"{"strategies": {"deduplication": {"enabled": true, "fuzzy": false}}}"#,
        )
        .unwrap();
        assert!(!config.strategies.deduplication.config.fuzzy);
    }

    #[test]
    fn turn_protection_window() {
        let tp = TurnProtection {
            enabled: true,
            turns: 4,
        };
        assert!(tp.protects(6, 6));
        assert!(tp.protects(3, 6));
        assert!(!tp.protects(2, 6));
        assert!(!TurnProtection::default().protects(6, 6));
    }

    #[test]
    fn builders() {
        let config = SweepConfig::default()
            .protect_tool("task")
            .protect_tool("skill")
            .with_turn_protection(3)
            .with_cache_capacity(10);
        assert_eq!(config.protected_tools, vec!["task", "skill"]);
        assert!(config.turn_protection.enabled);
        assert_eq!(config.cache_capacity, 10);
    }

    #[test]
    fn schema_describes_top_level_keys() {
        let schema = SweepConfig::json_schema();
        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("cache_capacity"));
        assert!(props.contains_key("strategies"));
    }
}
