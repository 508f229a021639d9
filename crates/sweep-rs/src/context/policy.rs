//! Protection rules compiled from [`SweepConfig`] for one pass.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use tracing::warn;

use super::cache::ToolEntry;
use crate::config::{SweepConfig, TurnProtection};

/// What may be pruned during a pass at `current_turn`.
#[derive(Debug, Clone)]
pub struct Policy {
    protected_tools: HashSet<String>,
    protected_paths: GlobSet,
    turn_protection: TurnProtection,
    current_turn: u32,
}

impl Policy {
    pub fn new(config: &SweepConfig, current_turn: u32) -> Self {
        Self {
            protected_tools: config
                .protected_tools
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            protected_paths: compile_globs(&config.protected_file_patterns),
            turn_protection: config.turn_protection.clone(),
            current_turn,
        }
    }

    pub fn current_turn(&self) -> u32 {
        self.current_turn
    }

    pub fn is_protected_tool(&self, tool: &str) -> bool {
        self.protected_tools.contains(&tool.to_ascii_lowercase())
    }

    pub fn is_protected_path(&self, path: Option<&str>) -> bool {
        path.is_some_and(|p| self.protected_paths.is_match(p))
    }

    /// Whether content from `turn` is still too young to touch.
    pub fn is_turn_protected(&self, turn: u32) -> bool {
        self.turn_protection.protects(turn, self.current_turn)
    }

    /// Whether `entry` may never be pruned, however old it gets.
    pub fn is_exempt(&self, entry: &ToolEntry) -> bool {
        self.is_protected_tool(&entry.tool) || self.is_protected_path(entry.path.as_deref())
    }

    /// Whether `entry` may be marked pruned.
    pub fn can_prune(&self, entry: &ToolEntry) -> bool {
        !self.is_exempt(entry) && !self.is_turn_protected(entry.turn)
    }

    /// Whether `entry` may make older calls obsolete. Young calls can;
    /// protected tools can't.
    pub fn can_supersede(&self, entry: &ToolEntry) -> bool {
        !self.is_protected_tool(&entry.tool)
    }
}

/// Compile glob patterns, skipping (and logging) invalid ones.
fn compile_globs(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!(pattern = %pattern, error = %e, "Ignoring invalid protected file pattern"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build protected file patterns");
        GlobSet::empty()
    })
}
