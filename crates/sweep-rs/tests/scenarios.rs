//! End-to-end synchronization scenarios over realistic message lists.

use serde_json::{Value, json};
use sweep_rs::config::SweepConfig;
use sweep_rs::context::hashes::{self, HashCategory, Location};
use sweep_rs::context::{PrunableFilter, SupersedeKind, enumerate_prunable, synchronize};
use sweep_rs::session::{SessionState, Strategy, TextReplacement};
use sweep_rs::{Message, Part, ToolPart};

// ── Helpers ────────────────────────────────────────────────────────

/// One assistant message per turn, each opened by a step-start marker.
fn turns(calls: Vec<Vec<Part>>) -> Vec<Message> {
    let mut messages = vec![Message::user("u0", "please fix the parser")];
    for (i, parts) in calls.into_iter().enumerate() {
        let mut all = vec![Part::step_start()];
        all.extend(parts);
        messages.push(Message::assistant(format!("a{}", i + 1), all));
    }
    messages
}

fn read(id: &str, path: &str) -> Part {
    Part::tool(id, "read", json!({"filePath": path}), format!("contents of {path}"))
}

fn tool<'a>(messages: &'a [Message], call_id: &str) -> &'a ToolPart {
    messages
        .iter()
        .flat_map(|m| &m.parts)
        .find_map(|p| match p {
            Part::Tool(t) if t.call_id == call_id => Some(t),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no tool call {call_id}"))
}

fn output(messages: &[Message], call_id: &str) -> String {
    tool(messages, call_id).output.clone().unwrap_or_default()
}

fn is_pruned(messages: &[Message], call_id: &str) -> bool {
    output(messages, call_id).starts_with("[Output pruned:")
}

// ── Supersede ──────────────────────────────────────────────────────

#[test]
fn identical_read_prunes_the_older_one() {
    let config = SweepConfig::default();
    let mut state = SessionState::default();
    let mut messages = turns(vec![
        vec![read("c1", "/src/lib.rs")],
        vec![],
        vec![],
        vec![],
        vec![],
        vec![read("c6", "/src/lib.rs")],
    ]);

    let report = synchronize(&mut state, &config, &mut messages);
    assert_eq!(report.current_turn, 6);
    assert_eq!(report.superseded, 1);
    assert!(is_pruned(&messages, "c1"));
    assert_eq!(state.stats.supersede_count(SupersedeKind::Identical), 1);

    let hash = state
        .hashes
        .hash_of(
            HashCategory::Tool,
            &Location::Tool {
                call_id: "c6".into(),
            },
        )
        .expect("newer read is hashed")
        .to_string();
    assert!(output(&messages, "c6").ends_with(&hashes::tag(&hash)));
}

#[test]
fn write_supersedes_earlier_read() {
    let config = SweepConfig::default();
    let mut state = SessionState::default();
    let mut messages = turns(vec![
        vec![read("r1", "/src/parser.rs")],
        vec![],
        vec![],
        vec![Part::tool(
            "w4",
            "write",
            json!({"filePath": "/src/parser.rs", "content": "fn main() {}"}),
            "wrote 1 line",
        )],
    ]);

    synchronize(&mut state, &config, &mut messages);
    assert!(is_pruned(&messages, "r1"));
    assert!(!is_pruned(&messages, "w4"));
    assert_eq!(state.stats.supersede_count(SupersedeKind::File), 1);
}

#[test]
fn todo_list_rewrite_keeps_latest_only() {
    let config = SweepConfig::default();
    let mut state = SessionState::default();
    let todos = |status: &str| {
        json!({"todos": [{"id": "1", "content": "fix lexer", "status": status, "priority": "high"}]})
    };
    let mut messages = turns(vec![
        vec![Part::tool("t1", "todowrite", todos("pending"), "ok")],
        vec![Part::tool("t2", "todowrite", todos("in_progress"), "ok")],
    ]);

    synchronize(&mut state, &config, &mut messages);
    assert!(is_pruned(&messages, "t1"));
    assert_eq!(state.stats.supersede_count(SupersedeKind::Todo), 1);
    assert_eq!(state.todos.len(), 1);
    assert_eq!(state.todos[0].in_progress_since, Some(2));
}

#[test]
fn protected_tools_never_pruned() {
    let config = SweepConfig::default();
    let mut state = SessionState::default();
    let task = |id: &str| Part::tool(id, "task", json!({"prompt": "explore"}), "found it");
    let mut messages = turns(vec![vec![task("k1")], vec![task("k2")]]);

    synchronize(&mut state, &config, &mut messages);
    assert!(!is_pruned(&messages, "k1"));
    state.mark_targets(&["[*]"]);
    synchronize(&mut state, &config, &mut messages);
    assert!(!is_pruned(&messages, "k1"));
    assert!(!is_pruned(&messages, "k2"));
}

#[test]
fn young_read_pruned_after_it_ages_out() {
    let config = SweepConfig::default().with_turn_protection(2);
    let mut state = SessionState::default();
    let mut messages = turns(vec![
        vec![read("r1", "/a.ts")],
        vec![Part::tool("w1", "write", json!({"filePath": "/a.ts", "content": "x"}), "ok")],
    ]);

    synchronize(&mut state, &config, &mut messages);
    assert!(!is_pruned(&messages, "r1"));

    for turn in 3..=11 {
        messages.push(Message::assistant(
            format!("a{turn}"),
            vec![Part::step_start(), Part::text(format!("step {turn}"))],
        ));
        synchronize(&mut state, &config, &mut messages);
    }
    assert!(is_pruned(&messages, "r1"));
    assert_eq!(state.stats.supersede_count(SupersedeKind::File), 1);
}

// ── Cache bound ────────────────────────────────────────────────────

#[test]
fn oldest_call_evicted_from_every_index() {
    let config = SweepConfig::default();
    assert_eq!(config.cache_capacity, 1000);
    let mut state = SessionState::new(config.cache_capacity);
    let calls = (0..1001)
        .map(|i| vec![read(&format!("c{i}"), &format!("/src/f{i}.rs"))])
        .collect();
    let mut messages = turns(calls);

    let report = synchronize(&mut state, &config, &mut messages);
    assert_eq!(report.ingested, 1001);
    assert_eq!(report.evicted, 1);
    assert_eq!(state.tool_cache.len(), 1000);
    assert!(!state.tool_cache.contains("c0"));
    assert!(!state.tool_cache.cursors.references("c0"));
    assert!(!state.tool_cache.cursors.files.contains_key("/src/f0.rs"));
    assert!(state.tool_cache.contains("c1000"));

    for id in state.tool_cache.cursors.referenced_ids() {
        assert!(state.tool_cache.contains(id), "dangling cursor {id}");
    }

    // The evicted call is not ingested again on the next pass.
    assert_eq!(synchronize(&mut state, &config, &mut messages).ingested, 0);
    assert_eq!(state.tool_cache.retired_len(), 1);

    // Once the host drops it from the list, it is forgotten.
    messages.remove(1);
    synchronize(&mut state, &config, &mut messages);
    assert_eq!(state.tool_cache.retired_len(), 0);
    assert_eq!(state.tool_cache.len(), 1000);
}

// ── Idempotence ────────────────────────────────────────────────────

fn busy_session() -> Vec<Message> {
    let big: String = (0..3000).map(|i| format!("log line {i}\n")).collect();
    let thinking = format!("{} So the fix is in the lexer.", "Looking around the code. ".repeat(250));
    let mut calls = vec![
        vec![
            Part::reasoning(thinking),
            read("c1", "/src/lexer.rs"),
            Part::tool("b1", "bash", json!({"command": "cargo test"}), big),
        ],
        vec![Part::text("Found it, editing now.")],
        vec![Part::tool("w1", "edit", json!({"filePath": "/src/lexer.rs"}), "ok")],
        vec![Part::tool("g1", "grep", json!({"pattern": "Token"}), "src/lexer.rs:3")],
        vec![Part::tool("g2", "grep", json!({"pattern": "Token"}), "src/lexer.rs:3")],
    ];
    calls.extend((0..6).map(|_| vec![]));
    let mut messages = turns(calls);
    messages[1].reasoning_content = Some("mirror".into());
    messages.push(Message::user(
        "u9",
        "Here is the trace: <segment>frame 1\nframe 2</segment> thanks",
    ));
    messages
}

#[test]
fn second_pass_changes_nothing() {
    let config = SweepConfig::default();
    let mut state = SessionState::default();
    let mut messages = busy_session();

    let first = synchronize(&mut state, &config, &mut messages);
    assert!(first.changed());
    assert_eq!(first.truncated, 1);
    assert_eq!(first.compressed, 1);
    assert!(is_pruned(&messages, "c1"));
    assert!(is_pruned(&messages, "g1"));

    let after_first = messages.clone();
    let stats = state.stats.clone();
    let second = synchronize(&mut state, &config, &mut messages);
    assert!(!second.changed(), "{}", second.to_log_string());
    assert_eq!(messages, after_first);
    assert_eq!(state.stats, stats);
}

#[test]
fn replaying_the_original_list_gives_the_same_result() {
    let config = SweepConfig::default();
    let mut state = SessionState::default();
    let mut messages = busy_session();
    synchronize(&mut state, &config, &mut messages);
    let stats = state.stats.clone();

    let mut original = busy_session();
    synchronize(&mut state, &config, &mut original);
    assert_eq!(original, messages);
    assert_eq!(state.stats, stats);
}

// ── Manual marking and distillation ────────────────────────────────

#[test]
fn bulk_marking_prunes_every_listed_tool() {
    let config = SweepConfig::default();
    let mut state = SessionState::default();
    let mut messages = turns(vec![
        vec![read("c1", "/a.rs"), read("c2", "/b.rs")],
        vec![Part::tool("g1", "grep", json!({"pattern": "x"}), "a.rs:1")],
    ]);
    synchronize(&mut state, &config, &mut messages);

    let listed = enumerate_prunable(&state, PrunableFilter::Tools);
    assert_eq!(listed.len(), 3);

    let outcome = state.mark_targets(&["[tools]", "ffffff"]);
    assert_eq!(outcome.marked.len(), 3);
    assert_eq!(outcome.unknown, vec!["ffffff".to_string()]);
    synchronize(&mut state, &config, &mut messages);

    for id in ["c1", "c2", "g1"] {
        assert!(is_pruned(&messages, id), "{id} should be pruned");
    }
    assert!(enumerate_prunable(&state, PrunableFilter::Tools).is_empty());
    assert_eq!(state.stats.strategy_count(Strategy::Manual), 3);

    let again = state.mark_targets(&[listed[0].hash.as_str()]);
    assert_eq!(again.already, vec![listed[0].hash.clone()]);
}

#[test]
fn distilled_tool_output_keeps_the_summary() {
    let config = SweepConfig::default();
    let mut state = SessionState::default();
    let mut messages = turns(vec![vec![Part::tool(
        "g1",
        "grep",
        json!({"pattern": "fn parse"}),
        "src/a.rs:10\nsrc/b.rs:20",
    )]]);
    synchronize(&mut state, &config, &mut messages);

    let hash = enumerate_prunable(&state, PrunableFilter::Tools)[0].hash.clone();
    assert!(state.distill(&hash, "two definitions, a.rs and b.rs"));
    assert!(!state.distill(&hash, "again"));
    synchronize(&mut state, &config, &mut messages);

    assert_eq!(
        output(&messages, "g1"),
        "[Distilled: grep(pattern=\"fn parse\")] two definitions, a.rs and b.rs"
    );
}

#[test]
fn pruned_assistant_text_becomes_a_preview() {
    let config = SweepConfig {
        preview_chars: 12,
        ..SweepConfig::default()
    };
    let mut state = SessionState::default();
    let mut messages = turns(vec![vec![Part::text("The lexer drops trailing whitespace tokens.")]]);
    synchronize(&mut state, &config, &mut messages);
    state.mark_targets(&["[messages]"]);
    synchronize(&mut state, &config, &mut messages);

    let Part::Text(text) = &messages[1].parts[1] else {
        panic!("text part expected");
    };
    assert_eq!(text.text, "The lexer dr... [pruned]");
}

#[test]
fn range_replacement_after_a_segment_keeps_the_segment_tag() {
    let config = SweepConfig::default();
    let mut state = SessionState::default();
    let original = "<segment>log</segment> hello world";
    let start = original.find("world").unwrap();
    state.add_replacement(TextReplacement {
        message_id: "u1".into(),
        part_index: 0,
        start,
        end: start + "world".len(),
        replacement: "EARTH".into(),
    });
    let mut messages = vec![Message::user("u1", original)];
    synchronize(&mut state, &config, &mut messages);

    let segment = state
        .hashes
        .hash_of(
            HashCategory::Segment,
            &Location::Segment {
                message_id: "u1".into(),
                part_index: 0,
                ordinal: 0,
            },
        )
        .expect("segment is tagged")
        .to_string();
    let Part::Text(text) = &messages[0].parts[0] else {
        panic!("text part expected");
    };
    assert_eq!(
        text.text,
        format!("<segment>log</segment>{} hello EARTH", hashes::inline_tag(&segment))
    );
    assert!(state.hashes.resolve(&segment).is_some());

    let once = messages.clone();
    assert!(!synchronize(&mut state, &config, &mut messages).changed());
    assert_eq!(messages, once);

    let mut replayed = vec![Message::user("u1", original)];
    synchronize(&mut state, &config, &mut replayed);
    assert_eq!(replayed, once);
}

// ── Host compaction ────────────────────────────────────────────────

#[test]
fn content_before_compaction_marker_is_ignored() {
    let config = SweepConfig::default();
    let mut state = SessionState::default();
    let mut messages = turns(vec![vec![read("c1", "/a.rs")], vec![]]);
    messages.push(Message::assistant(
        "s1",
        vec![Part::compaction(), Part::text("Summary of the work so far.")],
    ));
    messages.push(Message::assistant(
        "a3",
        vec![Part::step_start(), read("c2", "/a.rs")],
    ));

    let report = synchronize(&mut state, &config, &mut messages);
    assert!(report.reset);
    assert_eq!(report.ingested, 1);
    assert!(!is_pruned(&messages, "c1"));
    assert!(!is_pruned(&messages, "c2"));
    assert!(!output(&messages, "c1").contains("<ctx-id>"));
}

#[test]
fn malformed_parts_are_skipped() {
    let config = SweepConfig::default();
    let mut state = SessionState::default();
    let raw: Value = json!([
        {"id": "a1", "role": "assistant", "parts": [
            {"type": "marker", "kind": "step_start"},
            {"type": "tool", "call_id": "", "tool": "read", "input": {"filePath": "/a"}, "status": "completed", "output": "x"},
            {"type": "tool", "call_id": "p1", "tool": "read", "input": {"filePath": "/a"}, "status": "running"}
        ]}
    ]);
    let mut messages: Vec<Message> = serde_json::from_value(raw).unwrap();
    let report = synchronize(&mut state, &config, &mut messages);
    assert_eq!(report.ingested, 0);
    assert!(state.tool_cache.is_empty());
}
