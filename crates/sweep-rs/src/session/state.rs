//! Per-session compaction state.
//!
//! One [`SessionState`] exists per conversation. It is mutated only by
//! [`synchronize`](crate::context::synchronize) and the explicit marking
//! methods below, and is serialized whole by a
//! [`SessionStore`](super::SessionStore).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::context::cache::ToolCache;
use crate::context::hashes::{HashCategory, HashRegistry, Location};
use crate::context::prunable::{PrunableFilter, enumerate_prunable};
use crate::context::supersede::{DeferredSupersede, SupersedeKind};

// ── Prune sets ─────────────────────────────────────────────────────

/// Everything marked for removal. Entries are only ever added.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct PruneSets {
    /// Tool call ids.
    pub tools: BTreeSet<String>,
    /// Message text part ids.
    pub messages: BTreeSet<String>,
    /// Reasoning part ids.
    pub reasoning: BTreeSet<String>,
    /// Segment ids.
    pub segments: BTreeSet<String>,
    /// Caller summaries, keyed like the sets above (call id for tools, id
    /// otherwise).
    pub distilled: BTreeMap<String, String>,
    pub replacements: Vec<TextReplacement>,
}

impl PruneSets {
    pub fn len(&self) -> usize {
        self.tools.len() + self.messages.len() + self.reasoning.len() + self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.replacements.is_empty()
    }

    fn set_mut(&mut self, category: HashCategory) -> &mut BTreeSet<String> {
        match category {
            HashCategory::Tool => &mut self.tools,
            HashCategory::Message => &mut self.messages,
            HashCategory::Reasoning => &mut self.reasoning,
            HashCategory::Segment => &mut self.segments,
        }
    }

    pub fn set(&self, category: HashCategory) -> &BTreeSet<String> {
        match category {
            HashCategory::Tool => &self.tools,
            HashCategory::Message => &self.messages,
            HashCategory::Reasoning => &self.reasoning,
            HashCategory::Segment => &self.segments,
        }
    }
}

/// Surgical edit of a character range inside one text part.
///
/// `start..end` are byte offsets into the part's text as first seen with a
/// replacement pending, id tags removed. An empty `replacement` deletes the
/// range.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TextReplacement {
    pub message_id: String,
    pub part_index: usize,
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

/// Items whose heuristic rewrite has already been counted in the stats.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppliedSets {
    /// Truncated tool call ids.
    pub truncated: BTreeSet<String>,
    /// Compressed reasoning locations, as `message_id:part_index`.
    pub compressed: BTreeSet<String>,
    /// Breadcrumb ids of masked file parts.
    pub masked: BTreeSet<String>,
    /// Text parts carrying range replacements, as `message_id:part_index`.
    pub rewritten: BTreeMap<String, RewrittenText>,
}

/// What a text part looked like before its range replacements.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct RewrittenText {
    /// Untagged text the replacement offsets refer to.
    pub original: String,
    /// Number of the part's replacements the rewritten text reflects.
    pub applied: usize,
}

// ── Todos ──────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl std::fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TodoStatus::Pending => write!(f, "[ ]"),
            TodoStatus::InProgress => write!(f, "[~]"),
            TodoStatus::Completed => write!(f, "[x]"),
        }
    }
}

/// A task from the agent's todo list.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TodoItem {
    #[serde(default)]
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Turn at which the task last entered `in_progress`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_progress_since: Option<u32>,
}

// ── Stats ──────────────────────────────────────────────────────────

/// Non-supersede reasons content gets removed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Deduplication,
    FuzzyDeduplication,
    Truncation,
    ReasoningCompression,
    FileMasking,
    /// Explicit prune requests by id or bulk pattern.
    Manual,
    Distillation,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counter {
    pub items: u64,
    pub tokens: u64,
}

impl Counter {
    fn add(&mut self, tokens: usize) {
        self.items += 1;
        self.tokens += tokens as u64;
    }
}

/// Reporting-only counters. Compaction decisions never read these.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SweepStats {
    pub supersede: BTreeMap<SupersedeKind, Counter>,
    pub strategies: BTreeMap<Strategy, Counter>,
}

impl SweepStats {
    pub fn record_supersede(&mut self, kind: SupersedeKind, tokens: usize) {
        self.supersede.entry(kind).or_default().add(tokens);
    }

    pub fn record(&mut self, strategy: Strategy, tokens: usize) {
        self.strategies.entry(strategy).or_default().add(tokens);
    }

    pub fn supersede_count(&self, kind: SupersedeKind) -> u64 {
        self.supersede.get(&kind).map_or(0, |c| c.items)
    }

    pub fn strategy_count(&self, strategy: Strategy) -> u64 {
        self.strategies.get(&strategy).map_or(0, |c| c.items)
    }

    pub fn total_items(&self) -> u64 {
        self.supersede
            .values()
            .chain(self.strategies.values())
            .map(|c| c.items)
            .sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.supersede
            .values()
            .chain(self.strategies.values())
            .map(|c| c.tokens)
            .sum()
    }
}

// ── Marking ────────────────────────────────────────────────────────

/// Result of [`SessionState::mark_targets`].
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkOutcome {
    /// Ids newly marked.
    pub marked: Vec<String>,
    /// Ids that don't resolve to anything.
    pub unknown: Vec<String>,
    /// Ids that were already marked.
    pub already: Vec<String>,
}

enum Marked {
    New,
    Already,
    Unknown,
}

// ── SessionState ───────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SessionState {
    /// Highest turn observed. Only the turn-counting step advances it.
    pub(crate) current_turn: u32,
    /// Turns counted before the last host compaction.
    #[serde(default)]
    pub(crate) turn_offset: u32,
    /// Id of the message carrying the last host compaction marker.
    #[serde(default)]
    pub compaction_marker: Option<String>,
    #[serde(default)]
    pub tool_cache: ToolCache,
    #[serde(default)]
    pub hashes: HashRegistry,
    #[serde(default)]
    pub prune: PruneSets,
    #[serde(default)]
    pub applied: AppliedSets,
    /// Supersede targets still too young to prune.
    #[serde(default)]
    pub deferred: Vec<DeferredSupersede>,
    #[serde(default)]
    pub todos: Vec<TodoItem>,
    #[serde(default)]
    pub stats: SweepStats,
    #[serde(default)]
    pub last_compaction: Option<DateTime<Utc>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CACHE_CAPACITY)
    }
}

impl SessionState {
    /// Empty state with a tool cache of `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            current_turn: 0,
            turn_offset: 0,
            compaction_marker: None,
            tool_cache: ToolCache::new(capacity),
            hashes: HashRegistry::new(),
            prune: PruneSets::default(),
            applied: AppliedSets::default(),
            deferred: Vec::new(),
            todos: Vec::new(),
            stats: SweepStats::default(),
            last_compaction: None,
        }
    }

    pub fn current_turn(&self) -> u32 {
        self.current_turn
    }

    /// Forget everything tied to the message list after the host summarized
    /// the conversation. Turn numbering continues; stats and todos survive.
    pub fn reset_for_compaction(&mut self, now: DateTime<Utc>) {
        self.tool_cache.clear();
        self.hashes.clear();
        self.prune = PruneSets::default();
        self.applied = AppliedSets::default();
        self.deferred.clear();
        self.turn_offset = self.current_turn;
        self.last_compaction = Some(now);
        debug!(turn = self.current_turn, "Session state reset after compaction");
    }

    /// Mark ids or bulk patterns (`[tools]`, `[messages]`, `[thinking]`,
    /// `[segments]`, `[*]`, `[all]`) for pruning.
    pub fn mark_targets(&mut self, targets: &[&str]) -> MarkOutcome {
        let mut outcome = MarkOutcome::default();
        for target in targets {
            let target = target.trim();
            let hashes: Vec<String> = match PrunableFilter::parse(target) {
                Some(filter) => enumerate_prunable(self, filter)
                    .into_iter()
                    .map(|item| item.hash)
                    .collect(),
                None => vec![target.to_string()],
            };
            for hash in hashes {
                match self.mark_hash(&hash, Strategy::Manual) {
                    Marked::New => outcome.marked.push(hash),
                    Marked::Already => outcome.already.push(hash),
                    Marked::Unknown => outcome.unknown.push(hash),
                }
            }
        }
        outcome
    }

    /// Replace the content behind `hash` with `summary`. Returns `false`
    /// when the id is unknown or already pruned.
    pub fn distill(&mut self, hash: &str, summary: impl Into<String>) -> bool {
        let Some(key) = self.prune_key(hash) else {
            return false;
        };
        if self.prune.set(key.0).contains(&key.1) {
            return false;
        }
        self.prune.distilled.insert(key.1.clone(), summary.into());
        matches!(self.mark_hash(hash, Strategy::Distillation), Marked::New)
    }

    /// Queue a character-range replacement inside a text part.
    pub fn add_replacement(&mut self, replacement: TextReplacement) {
        if !self.prune.replacements.contains(&replacement) {
            self.prune.replacements.push(replacement);
        }
    }

    /// The prune set and key an id maps to: the call id for tools, the id
    /// itself otherwise.
    fn prune_key(&self, hash: &str) -> Option<(HashCategory, String)> {
        let (category, entry) = self.hashes.resolve(hash)?;
        match (&entry.location, category) {
            (Location::Tool { call_id }, HashCategory::Tool) => {
                Some((HashCategory::Tool, call_id.clone()))
            }
            (_, HashCategory::Tool) => None,
            (_, other) => Some((other, hash.to_string())),
        }
    }

    fn mark_hash(&mut self, hash: &str, strategy: Strategy) -> Marked {
        let Some((category, key)) = self.prune_key(hash) else {
            return Marked::Unknown;
        };
        if self.prune.set(category).contains(&key) {
            return Marked::Already;
        }
        let tokens = self
            .hashes
            .resolve(hash)
            .map_or(0, |(_, entry)| entry.tokens);
        self.prune.set_mut(category).insert(key);
        self.stats.record(strategy, tokens);
        Marked::New
    }

    /// Mark a tool call pruned. Returns `true` if it wasn't already.
    pub(crate) fn prune_tool(&mut self, call_id: &str) -> bool {
        self.prune.tools.insert(call_id.to_string())
    }

    /// Replace the todo list written at `turn`, carrying
    /// `in_progress_since` over for tasks that stay in progress.
    pub(crate) fn replace_todos(&mut self, mut todos: Vec<TodoItem>, turn: u32) {
        for todo in &mut todos {
            if todo.status != TodoStatus::InProgress {
                todo.in_progress_since = None;
                continue;
            }
            let previous = self
                .todos
                .iter()
                .find(|t| t.id == todo.id && t.status == TodoStatus::InProgress)
                .and_then(|t| t.in_progress_since);
            todo.in_progress_since = Some(previous.unwrap_or(turn));
        }
        self.todos = todos;
    }
}
