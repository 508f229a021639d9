//! Ingestion: record new tool calls in the cache and run supersede
//! detection against what was already there.
//!
//! Supersede targets that were too young when their replacement arrived are
//! kept in [`SessionState::deferred`] and pruned by a later scan once they
//! age out.

use serde_json::Value;
use std::collections::BTreeSet;
use tracing::trace;

use super::cache::ToolEntry;
use super::policy::Policy;
use super::supersede::{DeferredSupersede, SupersedeContext};
use super::turns::Turns;
use crate::config::SweepConfig;
use crate::session::{SessionState, TodoItem};
use crate::tools::ToolCategory;
use crate::{Message, Part};

/// Counts from one ingestion scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub ingested: usize,
    pub superseded: usize,
    pub evicted: usize,
}

/// Scan the window once and record every finished tool call not seen
/// before, in message order.
pub fn ingest(
    state: &mut SessionState,
    config: &SweepConfig,
    policy: &Policy,
    messages: &[Message],
    turns: &Turns,
) -> IngestReport {
    let mut report = IngestReport::default();
    let mut live = BTreeSet::new();

    for (msg_idx, msg) in messages.iter().enumerate().skip(turns.start) {
        for (part_idx, part) in msg.parts.iter().enumerate() {
            let Part::Tool(tool) = part else {
                continue;
            };
            if tool.call_id.is_empty() {
                trace!(message = %msg.id, part = part_idx, "Skipping tool part without call id");
                continue;
            }
            live.insert(tool.call_id.as_str());
            if !tool.status.is_terminal() || state.tool_cache.has_seen(&tool.call_id) {
                continue;
            }

            let entry = ToolEntry::from_part(tool, turns.turn(msg_idx, part_idx), config.chars_per_token);

            if entry.is_completed() && entry.category == ToolCategory::TodoWrite {
                match parse_todos(&tool.input) {
                    Some(todos) => state.replace_todos(todos, entry.turn),
                    None => trace!(call_id = %entry.call_id, "Todo write without a readable list"),
                }
            }

            if config.strategies.supersede.enabled {
                let supersession = SupersedeContext {
                    cache: &state.tool_cache,
                    policy,
                    pruned: &state.prune.tools,
                    rules: &config.strategies.supersede.config,
                }
                .detect(&entry);

                if let Some(s) = supersession {
                    for target in &s.targets {
                        let tokens = state.tool_cache.get(target).map_or(0, |e| e.output_tokens);
                        if state.prune_tool(target) {
                            state.stats.record_supersede(s.kind, tokens);
                            report.superseded += 1;
                            trace!(call_id = %target, by = %entry.call_id, kind = %s.kind, "Superseded");
                        }
                    }
                    for target in s.deferred {
                        if state.deferred.iter().all(|d| d.call_id != target) {
                            trace!(call_id = %target, by = %entry.call_id, kind = %s.kind, "Supersede deferred");
                            state.deferred.push(DeferredSupersede {
                                call_id: target,
                                kind: s.kind,
                            });
                        }
                    }
                }
            }

            let evicted = state.tool_cache.insert(entry);
            report.ingested += 1;
            report.evicted += evicted.len();
            for id in evicted {
                trace!(call_id = %id, "Evicted from tool cache");
            }
        }
    }

    let forgotten = state.tool_cache.forget_retired_except(&live);
    if forgotten > 0 {
        trace!(forgotten, "Forgot evicted calls no longer in the message list");
    }
    if config.strategies.supersede.enabled {
        report.superseded += release_deferred(state, policy);
    }
    report
}

/// Prune deferred targets that are no longer turn-protected. Targets since
/// pruned, evicted, or exempt are dropped.
fn release_deferred(state: &mut SessionState, policy: &Policy) -> usize {
    let mut released = 0;
    for d in std::mem::take(&mut state.deferred) {
        let Some(entry) = state.tool_cache.get(&d.call_id) else {
            continue;
        };
        if state.prune.tools.contains(&d.call_id) || policy.is_exempt(entry) {
            continue;
        }
        if policy.is_turn_protected(entry.turn) {
            state.deferred.push(d);
            continue;
        }
        let tokens = entry.output_tokens;
        if state.prune_tool(&d.call_id) {
            state.stats.record_supersede(d.kind, tokens);
            released += 1;
            trace!(call_id = %d.call_id, kind = %d.kind, "Superseded after aging out");
        }
    }
    released
}

fn parse_todos(input: &Value) -> Option<Vec<TodoItem>> {
    serde_json::from_value(input.get("todos")?.clone()).ok()
}
