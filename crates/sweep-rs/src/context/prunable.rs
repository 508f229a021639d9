//! Listing of ids that can still be pruned.

use serde::Serialize;

use super::hashes::{HashCategory, Location};
use crate::session::SessionState;

/// Bulk selector accepted by [`SessionState::mark_targets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrunableFilter {
    Tools,
    Messages,
    Thinking,
    Segments,
    All,
}

impl PrunableFilter {
    /// Parse a bracketed pattern such as `[tools]` or `[*]`.
    pub fn parse(pattern: &str) -> Option<Self> {
        match pattern.trim().to_ascii_lowercase().as_str() {
            "[tools]" => Some(Self::Tools),
            "[messages]" => Some(Self::Messages),
            "[thinking]" => Some(Self::Thinking),
            "[segments]" => Some(Self::Segments),
            "[*]" | "[all]" => Some(Self::All),
            _ => None,
        }
    }

    pub fn includes(self, category: HashCategory) -> bool {
        matches!(
            (self, category),
            (Self::All, _)
                | (Self::Tools, HashCategory::Tool)
                | (Self::Messages, HashCategory::Message)
                | (Self::Thinking, HashCategory::Reasoning)
                | (Self::Segments, HashCategory::Segment)
        )
    }
}

/// One prunable id with its estimated size.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PrunableItem {
    pub hash: String,
    pub category: HashCategory,
    pub size_estimate: usize,
}

/// Every registered id matching `filter` that isn't pruned yet, grouped by
/// category (tools, messages, reasoning, segments) and sorted by id.
pub fn enumerate_prunable(state: &SessionState, filter: PrunableFilter) -> Vec<PrunableItem> {
    let mut items = Vec::new();
    for category in [
        HashCategory::Tool,
        HashCategory::Message,
        HashCategory::Reasoning,
        HashCategory::Segment,
    ] {
        if !filter.includes(category) {
            continue;
        }
        let pruned = state.prune.set(category);
        for (hash, entry) in state.hashes.map(category).iter() {
            let key = match &entry.location {
                Location::Tool { call_id } => call_id,
                _ => hash,
            };
            if pruned.contains(key) {
                continue;
            }
            items.push(PrunableItem {
                hash: hash.clone(),
                category,
                size_estimate: entry.tokens,
            });
        }
    }
    items
}
