//! Content-addressed short identifiers for prunable content.
//!
//! Every piece of content the agent may refer to (a tool output, an
//! assistant text part, a reasoning block, a tagged segment inside a text
//! part) gets a 6-hex-character id derived from a SHA-256 digest of its
//! stable serialization. Ids are shown to the agent as trailing
//! `<ctx-id>…</ctx-id>` tags so that previews and truncation, which work on
//! the head of the content, never cut them off.
//!
//! Collisions are resolved by suffixing (`abc123_2`, `abc123_3`, …). Once
//! an id is bound to a location it stays bound for the rest of the session.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use crate::tools::stable_json;

/// Hex characters kept from the digest.
pub const HASH_LEN: usize = 6;

pub const TAG_OPEN: &str = "<ctx-id>";
pub const TAG_CLOSE: &str = "</ctx-id>";
pub const SEGMENT_OPEN: &str = "<segment>";
pub const SEGMENT_CLOSE: &str = "</segment>";

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*<ctx-id>[0-9a-f]{6}(?:_\d+)?</ctx-id>").expect("static regex")
});

/// Which registry an id lives in.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HashCategory {
    Tool,
    Message,
    Reasoning,
    Segment,
}

impl std::fmt::Display for HashCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HashCategory::Tool => "tool",
            HashCategory::Message => "message",
            HashCategory::Reasoning => "reasoning",
            HashCategory::Segment => "segment",
        })
    }
}

/// Where hashed content lives in the message list.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    /// A tool call, identified by its call id.
    Tool { call_id: String },
    /// A whole text or reasoning part.
    Part {
        message_id: String,
        part_index: usize,
    },
    /// The `ordinal`-th `<segment>` inside a text part.
    Segment {
        message_id: String,
        part_index: usize,
        ordinal: usize,
    },
}

/// A registered id: where it points and roughly how big the content was.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HashEntry {
    pub location: Location,
    /// Estimated tokens of the content when it was registered.
    #[serde(default)]
    pub tokens: usize,
}

/// One direction is serialized; the reverse index is rebuilt on load.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(
    from = "BTreeMap<String, HashEntry>",
    into = "BTreeMap<String, HashEntry>"
)]
pub struct BiMap {
    forward: HashMap<String, HashEntry>,
    reverse: HashMap<Location, String>,
}

impl BiMap {
    pub fn get(&self, hash: &str) -> Option<&HashEntry> {
        self.forward.get(hash)
    }

    pub fn hash_of(&self, location: &Location) -> Option<&str> {
        self.reverse.get(location).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Entries sorted by id.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &HashEntry)> {
        let mut entries: Vec<_> = self.forward.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter()
    }

    fn insert(&mut self, hash: String, entry: HashEntry) {
        self.reverse.insert(entry.location.clone(), hash.clone());
        self.forward.insert(hash, entry);
    }

    fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }
}

impl From<BTreeMap<String, HashEntry>> for BiMap {
    fn from(map: BTreeMap<String, HashEntry>) -> Self {
        let mut bimap = BiMap::default();
        for (hash, entry) in map {
            bimap.insert(hash, entry);
        }
        bimap
    }
}

impl From<BiMap> for BTreeMap<String, HashEntry> {
    fn from(bimap: BiMap) -> Self {
        bimap.forward.into_iter().collect()
    }
}

/// What a masked file attachment was, kept so the agent can ask for it
/// again by id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileBreadcrumb {
    pub message_id: String,
    pub part_index: usize,
    pub filename: Option<String>,
    pub mime: String,
    pub bytes: usize,
    pub turn: u32,
}

/// The four id registries plus file breadcrumbs.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct HashRegistry {
    pub tools: BiMap,
    pub messages: BiMap,
    pub reasoning: BiMap,
    pub segments: BiMap,
    pub breadcrumbs: BTreeMap<String, FileBreadcrumb>,
}

impl HashRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign (or return the existing) id for `content` at `location`.
    pub fn assign(
        &mut self,
        category: HashCategory,
        content: &Value,
        location: Location,
        tokens: usize,
    ) -> String {
        if let Some(existing) = self.map(category).hash_of(&location) {
            return existing.to_string();
        }
        let hash = self.unique_hash(&digest(content));
        self.map_mut(category)
            .insert(hash.clone(), HashEntry { location, tokens });
        hash
    }

    /// Record a masked file attachment under a fresh id.
    pub fn add_breadcrumb(&mut self, content: &Value, breadcrumb: FileBreadcrumb) -> String {
        if let Some((hash, _)) = self.breadcrumbs.iter().find(|(_, b)| {
            b.message_id == breadcrumb.message_id && b.part_index == breadcrumb.part_index
        }) {
            return hash.clone();
        }
        let hash = self.unique_hash(&digest(content));
        self.breadcrumbs.insert(hash.clone(), breadcrumb);
        hash
    }

    /// Look an id up in every registry.
    pub fn resolve(&self, hash: &str) -> Option<(HashCategory, &HashEntry)> {
        [
            HashCategory::Tool,
            HashCategory::Message,
            HashCategory::Reasoning,
            HashCategory::Segment,
        ]
        .into_iter()
        .find_map(|category| self.map(category).get(hash).map(|e| (category, e)))
    }

    pub fn hash_of(&self, category: HashCategory, location: &Location) -> Option<&str> {
        self.map(category).hash_of(location)
    }

    pub fn map(&self, category: HashCategory) -> &BiMap {
        match category {
            HashCategory::Tool => &self.tools,
            HashCategory::Message => &self.messages,
            HashCategory::Reasoning => &self.reasoning,
            HashCategory::Segment => &self.segments,
        }
    }

    fn map_mut(&mut self, category: HashCategory) -> &mut BiMap {
        match category {
            HashCategory::Tool => &mut self.tools,
            HashCategory::Message => &mut self.messages,
            HashCategory::Reasoning => &mut self.reasoning,
            HashCategory::Segment => &mut self.segments,
        }
    }

    fn is_taken(&self, hash: &str) -> bool {
        self.resolve(hash).is_some() || self.breadcrumbs.contains_key(hash)
    }

    fn unique_hash(&self, base: &str) -> String {
        if !self.is_taken(base) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}_{n}");
            if !self.is_taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Total ids across all registries (breadcrumbs included).
    pub fn len(&self) -> usize {
        self.tools.len()
            + self.messages.len()
            + self.reasoning.len()
            + self.segments.len()
            + self.breadcrumbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.tools.clear();
        self.messages.clear();
        self.reasoning.clear();
        self.segments.clear();
        self.breadcrumbs.clear();
    }
}

/// First [`HASH_LEN`] hex characters of the SHA-256 of the stable JSON.
pub fn digest(content: &Value) -> String {
    let bytes = Sha256::digest(stable_json(content).as_bytes());
    hex::encode(&bytes[..HASH_LEN / 2])
}

/// The tag appended to content carrying `hash`.
pub fn tag(hash: &str) -> String {
    format!("\n{TAG_OPEN}{hash}{TAG_CLOSE}")
}

/// The tag placed right after a segment's closing marker.
pub fn inline_tag(hash: &str) -> String {
    format!("{TAG_OPEN}{hash}{TAG_CLOSE}")
}

/// Remove every id tag (and the whitespace before it) from `text`.
pub fn strip(text: &str) -> String {
    TAG_RE.replace_all(text, "").into_owned()
}
