//! Deduplication of repeated tool calls.
//!
//! Exact dedup keeps only the most recent call of each signature. Fuzzy
//! dedup prunes a read whose line range is covered by a newer read of the
//! same file.

use std::collections::HashMap;
use tracing::trace;

use super::cache::ToolEntry;
use super::policy::Policy;
use crate::config::DedupConfig;
use crate::session::{SessionState, Strategy};
use crate::tools::ToolCategory;

/// Counts from one dedup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupReport {
    pub exact: usize,
    pub fuzzy: usize,
}

impl DedupReport {
    pub fn total(&self) -> usize {
        self.exact + self.fuzzy
    }
}

pub fn deduplicate(state: &mut SessionState, config: &DedupConfig, policy: &Policy) -> DedupReport {
    let mut report = DedupReport::default();
    for (id, tokens) in exact_duplicates(state, policy) {
        if state.prune_tool(&id) {
            state.stats.record(Strategy::Deduplication, tokens);
            report.exact += 1;
            trace!(call_id = %id, "Pruned exact duplicate");
        }
    }
    if config.fuzzy {
        for (id, tokens) in covered_reads(state, policy) {
            if state.prune_tool(&id) {
                state.stats.record(Strategy::FuzzyDeduplication, tokens);
                report.fuzzy += 1;
                trace!(call_id = %id, "Pruned read covered by a newer read");
            }
        }
    }
    report
}

fn candidate(state: &SessionState, entry: &ToolEntry) -> bool {
    entry.is_completed() && !state.prune.tools.contains(&entry.call_id)
}

/// Every call but the most recent of each signature.
fn exact_duplicates(state: &SessionState, policy: &Policy) -> Vec<(String, usize)> {
    let mut groups: HashMap<&str, Vec<(usize, &ToolEntry)>> = HashMap::new();
    for (order, entry) in state.tool_cache.iter().enumerate() {
        if candidate(state, entry) && !policy.is_protected_tool(&entry.tool) {
            groups.entry(&entry.signature).or_default().push((order, entry));
        }
    }

    let mut out = Vec::new();
    for group in groups.values().filter(|g| g.len() > 1) {
        let Some(&(keep, _)) = group.iter().max_by_key(|(order, e)| (e.turn, *order)) else {
            continue;
        };
        out.extend(
            group
                .iter()
                .filter(|(order, e)| *order != keep && policy.can_prune(e))
                .map(|(order, e)| (*order, e.call_id.clone(), e.output_tokens)),
        );
    }
    // Stable order for logs and stats.
    out.sort_by_key(|(order, _, _)| *order);
    out.into_iter().map(|(_, id, tokens)| (id, tokens)).collect()
}

/// Reads whose range is contained in a newer read of the same path.
fn covered_reads(state: &SessionState, policy: &Policy) -> Vec<(String, usize)> {
    let reads: Vec<&ToolEntry> = state
        .tool_cache
        .iter()
        .filter(|e| e.category == ToolCategory::Read && e.is_completed() && e.path.is_some())
        .collect();

    reads
        .iter()
        .enumerate()
        .filter(|(_, older)| candidate(state, older) && policy.can_prune(older))
        .filter(|(i, older)| {
            reads[i + 1..].iter().any(|newer| {
                newer.path == older.path
                    && match (newer.range, older.range) {
                        (Some(n), Some(o)) => n.contains(&o),
                        _ => false,
                    }
            })
        })
        .map(|(_, older)| (older.call_id.clone(), older.output_tokens))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SweepConfig;
    use crate::context::cache::ToolEntry;
    use crate::{Part, ToolStatus};
    use serde_json::{Value, json};

    fn record(state: &mut SessionState, id: &str, tool: &str, input: Value, turn: u32) {
        let Part::Tool(part) = Part::tool(id, tool, input, "out") else {
            unreachable!()
        };
        state.tool_cache.insert(ToolEntry::from_part(&part, turn, 3.5));
    }

    fn read(path: &str, offset: u64, limit: Option<u64>) -> Value {
        match limit {
            Some(l) => json!({"filePath": path, "offset": offset, "limit": l}),
            None => json!({"filePath": path, "offset": offset}),
        }
    }

    fn run(state: &mut SessionState) -> DedupReport {
        let config = SweepConfig::default();
        let policy = Policy::new(&config, 10);
        deduplicate(state, &DedupConfig::default(), &policy)
    }

    #[test]
    fn exact_keeps_most_recent_turn() {
        let mut state = SessionState::new(10);
        record(&mut state, "c1", "grep", json!({"pattern": "x"}), 1);
        record(&mut state, "c2", "grep", json!({"pattern": "x"}), 3);
        record(&mut state, "c3", "grep", json!({"pattern": "x"}), 2);
        record(&mut state, "c4", "grep", json!({"pattern": "y"}), 2);

        let report = run(&mut state);
        assert_eq!(report.exact, 2);
        assert!(state.prune.tools.contains("c1"));
        assert!(state.prune.tools.contains("c3"));
        assert!(!state.prune.tools.contains("c2"));
        assert!(!state.prune.tools.contains("c4"));
    }

    #[test]
    fn contained_range_is_pruned() {
        let mut state = SessionState::new(10);
        record(&mut state, "r1", "read", read("/a", 0, Some(50)), 1);
        record(&mut state, "r2", "read", read("/a", 0, Some(100)), 2);
        assert_eq!(run(&mut state).fuzzy, 1);
        assert!(state.prune.tools.contains("r1"));
        assert!(!state.prune.tools.contains("r2"));
    }

    #[test]
    fn disjoint_ranges_are_kept() {
        let mut state = SessionState::new(10);
        record(&mut state, "r1", "read", read("/a", 0, Some(50)), 1);
        record(&mut state, "r2", "read", read("/a", 100, Some(50)), 2);
        assert_eq!(run(&mut state).total(), 0);
    }

    #[test]
    fn open_ended_newer_read_covers_bounded_older() {
        let mut state = SessionState::new(10);
        record(&mut state, "r1", "read", read("/a", 20, Some(10)), 1);
        record(&mut state, "r2", "read", read("/a", 0, None), 2);
        record(&mut state, "r3", "read", read("/b", 0, None), 3);
        record(&mut state, "r4", "read", read("/b", 0, Some(10)), 4);
        run(&mut state);
        assert!(state.prune.tools.contains("r1"));
        assert!(!state.prune.tools.contains("r3"));
    }

    #[test]
    fn failed_calls_are_ignored() {
        let mut state = SessionState::new(10);
        let Part::Tool(part) = Part::tool_error("e1", "grep", json!({"pattern": "x"}), "bad") else {
            unreachable!()
        };
        let entry = ToolEntry::from_part(&part, 1, 3.5);
        assert_eq!(entry.status, ToolStatus::Error);
        state.tool_cache.insert(entry);
        record(&mut state, "c2", "grep", json!({"pattern": "x"}), 3);
        assert_eq!(run(&mut state).total(), 0);
    }
}
