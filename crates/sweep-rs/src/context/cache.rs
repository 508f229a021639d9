//! Bounded record of recent tool calls and the cursor indices used for
//! supersede detection.
//!
//! Entries are keyed by call id and evicted strictly in insertion order once
//! the cache exceeds its capacity. Eviction removes the id from every index
//! that referenced it, so no cursor ever points at a call the cache no
//! longer knows about.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::tools::params::{self, ReadRange};
use crate::tools::{ToolCategory, canonicalize, signature};
use crate::{ToolPart, ToolStatus};

/// What the cache remembers about one tool call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolEntry {
    pub call_id: String,
    pub tool: String,
    /// Parameters with keys sorted recursively.
    pub params: Value,
    pub signature: String,
    pub category: ToolCategory,
    pub turn: u32,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// State-query signature (tool plus normalized command).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<ReadRange>,
    /// Estimated tokens of the output (or error) when ingested.
    #[serde(default)]
    pub output_tokens: usize,
}

impl ToolEntry {
    /// Build an entry from a tool part observed at `turn`.
    pub fn from_part(part: &ToolPart, turn: u32, chars_per_token: f64) -> Self {
        let category = ToolCategory::classify(&part.tool, &part.input);
        let path = if category.is_path_indexed() {
            params::extract_path(&part.input)
        } else {
            None
        };
        let output_len = part.output.as_ref().map_or(0, String::len)
            + part.error.as_ref().map_or(0, String::len);
        Self {
            call_id: part.call_id.clone(),
            tool: part.tool.to_ascii_lowercase(),
            params: canonicalize(&part.input),
            signature: signature(&part.tool, &part.input),
            category,
            turn,
            status: part.status,
            path,
            url: match category {
                ToolCategory::Fetch => params::extract_url(&part.input),
                _ => None,
            },
            query: match category {
                ToolCategory::StateQuery => {
                    Some(params::state_query_signature(&part.tool, &part.input))
                }
                _ => None,
            },
            range: match category {
                ToolCategory::Read => Some(ReadRange::from_input(&part.input)),
                _ => None,
            },
            output_tokens: super::budget::estimate_tokens_len(output_len, chars_per_token),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ToolStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == ToolStatus::Error
    }
}

/// Per-category pointers to the calls supersede rules compare against.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Cursors {
    pub todo_write: Option<String>,
    pub todo_read: Option<String>,
    pub context: Option<String>,
    /// Normalized path → calls touching it.
    pub files: BTreeMap<String, Vec<String>>,
    pub urls: BTreeMap<String, Vec<String>>,
    /// State-query signature → calls.
    pub queries: BTreeMap<String, Vec<String>>,
    pub snapshots: Vec<String>,
    pub latest_snapshot: Option<String>,
    /// Signature of a failed call → failed calls with that signature.
    pub retries: BTreeMap<String, Vec<String>>,
}

impl Cursors {
    /// Whether any index references `call_id`.
    pub fn references(&self, call_id: &str) -> bool {
        let id = Some(call_id);
        self.todo_write.as_deref() == id
            || self.todo_read.as_deref() == id
            || self.context.as_deref() == id
            || self.latest_snapshot.as_deref() == id
            || self.snapshots.iter().any(|s| s == call_id)
            || [&self.files, &self.urls, &self.queries, &self.retries]
                .iter()
                .any(|index| index.values().any(|ids| ids.iter().any(|s| s == call_id)))
    }

    /// Every id referenced by any index.
    pub fn referenced_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = [
            &self.todo_write,
            &self.todo_read,
            &self.context,
            &self.latest_snapshot,
        ]
        .into_iter()
        .filter_map(|c| c.as_deref())
        .collect();
        ids.extend(self.snapshots.iter().map(String::as_str));
        for index in [&self.files, &self.urls, &self.queries, &self.retries] {
            ids.extend(index.values().flatten().map(String::as_str));
        }
        ids
    }

    fn forget(&mut self, call_id: &str) {
        for index in [
            &mut self.files,
            &mut self.urls,
            &mut self.queries,
            &mut self.retries,
        ] {
            index.retain(|_, ids| {
                ids.retain(|id| id != call_id);
                !ids.is_empty()
            });
        }
        self.snapshots.retain(|id| id != call_id);
    }
}

/// FIFO-bounded tool call cache.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, ToolEntry>,
    /// Evicted calls still present in the message list, so they aren't
    /// ingested again. Ids that leave the list are forgotten.
    #[serde(default)]
    retired: BTreeSet<String>,
    #[serde(default)]
    pub cursors: Cursors,
}

impl ToolCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
            retired: BTreeSet::new(),
            cursors: Cursors::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, evicting the oldest entries if it shrank.
    /// Returns the evicted call ids.
    pub fn set_capacity(&mut self, capacity: usize) -> Vec<String> {
        self.capacity = capacity.max(1);
        self.evict_overflow()
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.entries.contains_key(call_id)
    }

    /// Whether the call was ever recorded (including evicted calls).
    pub fn has_seen(&self, call_id: &str) -> bool {
        self.entries.contains_key(call_id) || self.retired.contains(call_id)
    }

    pub fn get(&self, call_id: &str) -> Option<&ToolEntry> {
        self.entries.get(call_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    /// Forget evicted ids that `live` no longer contains. Returns how many
    /// were dropped.
    pub fn forget_retired_except(&mut self, live: &BTreeSet<&str>) -> usize {
        let before = self.retired.len();
        self.retired.retain(|id| live.contains(id.as_str()));
        before - self.retired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ToolEntry> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    /// Look up several ids, skipping unknown ones.
    pub fn entries_for<'a>(
        &'a self,
        ids: impl IntoIterator<Item = &'a String>,
    ) -> impl Iterator<Item = &'a ToolEntry> {
        ids.into_iter().filter_map(|id| self.entries.get(id))
    }

    /// Record a call and update its indices. Returns the call ids evicted to
    /// stay within capacity. Re-inserting a seen id is a no-op.
    pub fn insert(&mut self, entry: ToolEntry) -> Vec<String> {
        if self.has_seen(&entry.call_id) {
            return Vec::new();
        }
        self.index(&entry);
        self.order.push_back(entry.call_id.clone());
        self.entries.insert(entry.call_id.clone(), entry);
        self.evict_overflow()
    }

    fn index(&mut self, entry: &ToolEntry) {
        let id = entry.call_id.clone();
        let cursors = &mut self.cursors;

        if entry.is_failed() {
            cursors
                .retries
                .entry(entry.signature.clone())
                .or_default()
                .push(id);
            return;
        }

        if let Some(path) = &entry.path {
            cursors.files.entry(path.clone()).or_default().push(id.clone());
        }
        if let Some(url) = &entry.url {
            cursors.urls.entry(url.clone()).or_default().push(id.clone());
        }
        if let Some(query) = &entry.query {
            cursors.queries.entry(query.clone()).or_default().push(id.clone());
        }
        match entry.category {
            ToolCategory::TodoWrite => cursors.todo_write = Some(id),
            ToolCategory::TodoRead => cursors.todo_read = Some(id),
            ToolCategory::Context => cursors.context = Some(id),
            ToolCategory::Snapshot => {
                cursors.snapshots.push(id.clone());
                cursors.latest_snapshot = Some(id);
            }
            _ => {}
        }
    }

    fn evict_overflow(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                self.cursors.forget(&oldest);
                self.retired.insert(oldest.clone());
                evicted.push(oldest);
            }
        }
        if !evicted.is_empty() {
            self.repair_scalar_cursors(&evicted);
        }
        evicted
    }

    /// Point scalar cursors that referenced an evicted id at the newest
    /// remaining call of their category, or clear them.
    fn repair_scalar_cursors(&mut self, evicted: &[String]) {
        let stale = |c: &Option<String>| c.as_ref().is_some_and(|id| evicted.contains(id));

        if stale(&self.cursors.todo_write) {
            self.cursors.todo_write = self.newest(ToolCategory::TodoWrite);
        }
        if stale(&self.cursors.todo_read) {
            self.cursors.todo_read = self.newest(ToolCategory::TodoRead);
        }
        if stale(&self.cursors.context) {
            self.cursors.context = self.newest(ToolCategory::Context);
        }
        if stale(&self.cursors.latest_snapshot) {
            self.cursors.latest_snapshot = self.newest(ToolCategory::Snapshot);
        }
    }

    fn newest(&self, category: ToolCategory) -> Option<String> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.entries.get(id))
            .find(|e| e.category == category && !e.is_failed())
            .map(|e| e.call_id.clone())
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
        self.retired.clear();
        self.cursors = Cursors::default();
    }
}

impl Default for ToolCache {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CACHE_CAPACITY)
    }
}
