//! Auto-supersede: decide which recorded calls a new call makes obsolete.
//!
//! Rules are tried in order and the first one that finds at least one
//! eligible target wins. A call that no rule touches now can still be
//! superseded by a later call. Targets that are only too young to prune are
//! deferred and pruned once they age out of turn protection.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::cache::{ToolCache, ToolEntry};
use super::policy::Policy;
use crate::config::SupersedeConfig;
use crate::tools::ToolCategory;

/// The rule that superseded a call.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SupersedeKind {
    /// Same tool and parameters, earlier turn.
    Identical,
    /// A write to the file an earlier read or glob looked at.
    File,
    Todo,
    Context,
    Url,
    StateQuery,
    Snapshot,
    /// A success after failures with the same signature.
    Retry,
}

impl std::fmt::Display for SupersedeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SupersedeKind::Identical => "identical",
            SupersedeKind::File => "file",
            SupersedeKind::Todo => "todo",
            SupersedeKind::Context => "context",
            SupersedeKind::Url => "url",
            SupersedeKind::StateQuery => "state_query",
            SupersedeKind::Snapshot => "snapshot",
            SupersedeKind::Retry => "retry",
        })
    }
}

/// Calls made obsolete by one new call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supersession {
    pub kind: SupersedeKind,
    /// Prunable now.
    pub targets: Vec<String>,
    /// Still turn-protected.
    pub deferred: Vec<String>,
}

/// A supersede target waiting to age out of turn protection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeferredSupersede {
    pub call_id: String,
    pub kind: SupersedeKind,
}

enum Eligibility {
    Now,
    Later,
    Never,
}

/// Everything a rule needs to look at.
pub struct SupersedeContext<'a> {
    pub cache: &'a ToolCache,
    pub policy: &'a Policy,
    pub pruned: &'a BTreeSet<String>,
    pub rules: &'a SupersedeConfig,
}

/// Order in which rules are tried.
const RULE_ORDER: [SupersedeKind; 8] = [
    SupersedeKind::Identical,
    SupersedeKind::File,
    SupersedeKind::Todo,
    SupersedeKind::Context,
    SupersedeKind::Url,
    SupersedeKind::StateQuery,
    SupersedeKind::Snapshot,
    SupersedeKind::Retry,
];

impl<'a> SupersedeContext<'a> {
    fn eligibility(&self, entry: &ToolEntry, new: &ToolEntry) -> Eligibility {
        if entry.call_id == new.call_id
            || self.pruned.contains(&entry.call_id)
            || self.policy.is_exempt(entry)
        {
            Eligibility::Never
        } else if self.policy.is_turn_protected(entry.turn) {
            Eligibility::Later
        } else {
            Eligibility::Now
        }
    }

    /// Matching candidates split into (prunable now, deferred).
    fn collect<'e>(
        &self,
        new: &ToolEntry,
        candidates: impl Iterator<Item = &'e ToolEntry>,
        filter: impl Fn(&ToolEntry) -> bool,
    ) -> (Vec<String>, Vec<String>) {
        let mut now = Vec::new();
        let mut later = Vec::new();
        for e in candidates.filter(|&e| filter(e)) {
            match self.eligibility(e, new) {
                Eligibility::Now => now.push(e.call_id.clone()),
                Eligibility::Later => later.push(e.call_id.clone()),
                Eligibility::Never => {}
            }
        }
        (now, later)
    }

    /// Evaluate `new` against the cache before it is inserted.
    pub fn detect(&self, new: &ToolEntry) -> Option<Supersession> {
        if !new.is_completed() || !self.policy.can_supersede(new) {
            return None;
        }
        RULE_ORDER
            .into_iter()
            .filter(|kind| self.enabled(*kind))
            .find_map(|kind| {
                let (targets, deferred) = self.targets(kind, new);
                (!targets.is_empty() || !deferred.is_empty()).then_some(Supersession {
                    kind,
                    targets,
                    deferred,
                })
            })
    }

    fn enabled(&self, kind: SupersedeKind) -> bool {
        let rules = self.rules;
        match kind {
            SupersedeKind::Identical => rules.identical,
            SupersedeKind::File => rules.files,
            SupersedeKind::Todo => rules.todos,
            SupersedeKind::Context => rules.context,
            SupersedeKind::Url => rules.urls,
            SupersedeKind::StateQuery => rules.state_queries,
            SupersedeKind::Snapshot => rules.snapshots,
            SupersedeKind::Retry => rules.retries,
        }
    }

    fn targets(&self, kind: SupersedeKind, new: &ToolEntry) -> (Vec<String>, Vec<String>) {
        let cache = self.cache;
        let cursors = &cache.cursors;
        let bucket = |index: &'a BTreeMap<String, Vec<String>>, key: &Option<String>| {
            let ids = key.as_ref().and_then(|k| index.get(k));
            cache.entries_for(ids.into_iter().flatten())
        };

        match (kind, new.category) {
            (SupersedeKind::Identical, _) => self.collect(new, cache.iter(), |e| {
                e.is_completed() && e.signature == new.signature && e.turn < new.turn
            }),
            (SupersedeKind::File, ToolCategory::Write) => {
                self.collect(new, bucket(&cursors.files, &new.path), |e| {
                    matches!(e.category, ToolCategory::Read | ToolCategory::Glob)
                })
            }
            (SupersedeKind::Todo, ToolCategory::TodoWrite) => {
                self.collect(new, cache.entries_for(&cursors.todo_write), |_| true)
            }
            (SupersedeKind::Todo, ToolCategory::TodoRead) => {
                self.collect(new, cache.entries_for(&cursors.todo_read), |_| true)
            }
            (SupersedeKind::Context, ToolCategory::Context) => {
                self.collect(new, cache.entries_for(&cursors.context), |_| true)
            }
            (SupersedeKind::Url, ToolCategory::Fetch) => {
                self.collect(new, bucket(&cursors.urls, &new.url), |_| true)
            }
            (SupersedeKind::StateQuery, ToolCategory::StateQuery) => {
                self.collect(new, bucket(&cursors.queries, &new.query), |_| true)
            }
            (SupersedeKind::Snapshot, ToolCategory::Snapshot) => {
                self.collect(new, cache.entries_for(&cursors.snapshots), |_| true)
            }
            (SupersedeKind::Retry, _) => {
                let signature = Some(new.signature.clone());
                self.collect(new, bucket(&cursors.retries, &signature), ToolEntry::is_failed)
            }
            _ => (Vec::new(), Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SweepConfig;
    use crate::{Part, ToolPart};
    use serde_json::{Value, json};

    fn part(id: &str, tool: &str, input: Value) -> ToolPart {
        let Part::Tool(part) = Part::tool(id, tool, input, "output") else {
            unreachable!()
        };
        part
    }

    fn entry(id: &str, tool: &str, input: Value, turn: u32) -> ToolEntry {
        ToolEntry::from_part(&part(id, tool, input), turn, 3.5)
    }

    fn failed(id: &str, tool: &str, input: Value, turn: u32) -> ToolEntry {
        let Part::Tool(part) = Part::tool_error(id, tool, input, "boom") else {
            unreachable!()
        };
        ToolEntry::from_part(&part, turn, 3.5)
    }

    struct Fixture {
        cache: ToolCache,
        policy: Policy,
        pruned: BTreeSet<String>,
        rules: SupersedeConfig,
    }

    impl Fixture {
        fn new(config: &SweepConfig, current_turn: u32) -> Self {
            Self {
                cache: ToolCache::new(100),
                policy: Policy::new(config, current_turn),
                pruned: BTreeSet::new(),
                rules: SupersedeConfig::default(),
            }
        }

        fn detect(&self, new: &ToolEntry) -> Option<Supersession> {
            SupersedeContext {
                cache: &self.cache,
                policy: &self.policy,
                pruned: &self.pruned,
                rules: &self.rules,
            }
            .detect(new)
        }
    }

    fn sup(kind: SupersedeKind, targets: &[&str]) -> Option<Supersession> {
        Some(Supersession {
            kind,
            targets: targets.iter().map(|t| t.to_string()).collect(),
            deferred: Vec::new(),
        })
    }

    #[test]
    fn identical_requires_earlier_turn() {
        let mut f = Fixture::new(&SweepConfig::default(), 6);
        f.cache.insert(entry("c1", "read", json!({"filePath": "/a.ts"}), 1));

        let same_turn = entry("c2", "read", json!({"filePath": "/a.ts"}), 1);
        assert_eq!(f.detect(&same_turn), None);

        let later = entry("c3", "read", json!({"filePath": "/a.ts"}), 6);
        assert_eq!(
            f.detect(&later),
            sup(SupersedeKind::Identical, &["c1"])
        );
    }

    #[test]
    fn write_supersedes_reads_and_globs_of_path() {
        let mut f = Fixture::new(&SweepConfig::default(), 4);
        f.cache.insert(entry("r1", "read", json!({"filePath": "/a.ts"}), 1));
        f.cache.insert(entry("r2", "read", json!({"filePath": "/b.ts"}), 1));
        f.cache.insert(entry("w0", "edit", json!({"filePath": "/a.ts", "old": "x"}), 2));

        let write = entry("w1", "write", json!({"filePath": "/a.ts", "content": "y"}), 4);
        assert_eq!(
            f.detect(&write),
            sup(SupersedeKind::File, &["r1"])
        );
    }

    #[test]
    fn cursor_rules() {
        let mut f = Fixture::new(&SweepConfig::default(), 5);
        f.cache.insert(entry("t1", "todowrite", json!({"todos": []}), 1));
        f.cache.insert(entry("x1", "context", json!({"a": 1}), 1));
        f.cache.insert(entry("u1", "webfetch", json!({"url": "https://a.dev/"}), 1));
        f.cache.insert(entry("q1", "bash", json!({"command": "git status"}), 1));
        f.cache.insert(entry("s1", "browser_snapshot", json!({"n": 1}), 1));
        f.cache.insert(entry("s2", "browser_snapshot", json!({"n": 2}), 2));

        let cases = [
            (entry("t2", "todowrite", json!({"todos": [1]}), 3), SupersedeKind::Todo, vec!["t1"]),
            (entry("x2", "context", json!({"a": 2}), 3), SupersedeKind::Context, vec!["x1"]),
            (entry("u2", "webfetch", json!({"url": "https://a.dev", "format": "md"}), 3), SupersedeKind::Url, vec!["u1"]),
            (entry("q2", "bash", json!({"command": "git  status", "timeout": 1}), 3), SupersedeKind::StateQuery, vec!["q1"]),
            (entry("s3", "browser_snapshot", json!({"n": 3}), 3), SupersedeKind::Snapshot, vec!["s1", "s2"]),
        ];
        for (new, kind, targets) in cases {
            assert_eq!(f.detect(&new), sup(kind, &targets));
        }
    }

    #[test]
    fn success_supersedes_failed_retry() {
        let mut f = Fixture::new(&SweepConfig::default(), 3);
        f.cache.insert(failed("e1", "bash", json!({"command": "cargo test"}), 1));
        f.cache.insert(failed("e2", "bash", json!({"command": "cargo test"}), 2));

        let ok = entry("ok", "bash", json!({"command": "cargo test"}), 3);
        assert_eq!(
            f.detect(&ok),
            sup(SupersedeKind::Retry, &["e1", "e2"])
        );

        // Failures never supersede anything.
        let again = failed("e3", "bash", json!({"command": "cargo test"}), 3);
        assert_eq!(f.detect(&again), None);
    }

    #[test]
    fn protection_blocks_targets_and_triggers() {
        let config = SweepConfig::default().protect_files("/keep/**");
        let mut f = Fixture::new(&config, 6);
        f.cache.insert(entry("k1", "read", json!({"filePath": "/keep/a"}), 1));
        f.cache.insert(entry("t1", "task", json!({"p": 1}), 1));
        f.pruned.insert("done".into());
        f.cache.insert(entry("done", "read", json!({"filePath": "/b"}), 1));

        assert_eq!(f.detect(&entry("k2", "read", json!({"filePath": "/keep/a"}), 6)), None);
        assert_eq!(f.detect(&entry("t2", "task", json!({"p": 1}), 6)), None);
        assert_eq!(f.detect(&entry("b2", "read", json!({"filePath": "/b"}), 6)), None);
    }

    #[test]
    fn young_targets_are_deferred() {
        let config = SweepConfig::default().with_turn_protection(2);
        let mut f = Fixture::new(&config, 3);
        f.cache.insert(entry("r1", "read", json!({"filePath": "/a.ts"}), 1));
        f.cache.insert(entry("r2", "read", json!({"filePath": "/a.ts"}), 2));

        let write = entry("w1", "write", json!({"filePath": "/a.ts", "content": "y"}), 3);
        assert_eq!(
            f.detect(&write),
            Some(Supersession {
                kind: SupersedeKind::File,
                targets: vec!["r1".into()],
                deferred: vec!["r2".into()],
            })
        );
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let mut f = Fixture::new(&SweepConfig::default(), 6);
        f.rules.identical = false;
        f.cache.insert(entry("c1", "read", json!({"filePath": "/a.ts"}), 1));
        assert_eq!(f.detect(&entry("c2", "read", json!({"filePath": "/a.ts"}), 6)), None);
    }
}
