//! Pruning application pass: rewrite the live message list from the prune
//! sets.
//!
//! Pruned content is replaced in place, keeping the part (and its variant)
//! so hosts that expect a fixed part layout still find it. Every rewrite
//! leaves a marker, and a part that already carries its marker is skipped:
//! the same list may arrive again, either already rewritten or restored
//! from the host's original copy, and both must come out the same.

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::trace;

use super::budget::estimate_tokens;
use super::hashes::{self, HashCategory, Location, SEGMENT_CLOSE, SEGMENT_OPEN};
use crate::session::{RewrittenText, SessionState, TextReplacement};
use crate::tools::summarize_args;
use crate::{Message, Part, ToolPart, ToolStatus};

/// Start of every pruned tool output. A body starting with it is never
/// rewritten again.
pub const PRUNED_PREFIX: &str = "[Output pruned:";

/// Prefix of tool outputs replaced by a caller summary.
pub const DISTILLED_PREFIX: &str = "[Distilled:";

/// Suffix of pruned text and reasoning previews.
pub const PREVIEW_SUFFIX: &str = "... [pruned]";

/// Prefix of text and reasoning replaced by a caller summary.
pub const TEXT_DISTILLED_PREFIX: &str = "[distilled]";

pub const SEGMENT_PLACEHOLDER: &str = "[segment pruned]";

/// Input strings longer than this are elided from pruned tool calls.
const MAX_INPUT_STRING: usize = 256;

/// Rewrite every pruned or distilled part from `start` onward. Returns how
/// many parts changed.
pub fn apply_prunes(
    state: &SessionState,
    messages: &mut [Message],
    start: usize,
    preview_chars: usize,
    chars_per_token: f64,
) -> usize {
    let mut rewritten = 0;

    for msg in messages.iter_mut().skip(start) {
        let mut reasoning_changed = false;
        for (part_idx, part) in msg.parts.iter_mut().enumerate() {
            let location = Location::Part {
                message_id: msg.id.clone(),
                part_index: part_idx,
            };
            let changed = match part {
                Part::Tool(tool) => prune_tool(state, tool, chars_per_token),
                Part::Text(text) if !text.synthetic => {
                    let mut changed = prune_segments(state, &msg.id, part_idx, &mut text.text);
                    changed |= prune_whole(
                        state,
                        HashCategory::Message,
                        &location,
                        &mut text.text,
                        preview_chars,
                    );
                    changed
                }
                Part::Reasoning(reasoning) => {
                    let changed = prune_whole(
                        state,
                        HashCategory::Reasoning,
                        &location,
                        &mut reasoning.text,
                        preview_chars,
                    );
                    reasoning_changed |= changed;
                    changed
                }
                _ => false,
            };
            if changed {
                rewritten += 1;
                trace!(message = %msg.id, part = part_idx, "Applied prune");
            }
        }
        if reasoning_changed {
            refresh_reasoning_mirror(msg);
        }
    }

    rewritten
}

/// Recompute `reasoning_content` from the message's reasoning parts when
/// the message carries tool calls and a mirror.
pub fn refresh_reasoning_mirror(msg: &mut Message) {
    if !msg.has_tool_calls() || msg.reasoning_content.is_none() {
        return;
    }
    let mirror: Vec<String> = msg
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::Reasoning(r) => Some(hashes::strip(&r.text)),
            _ => None,
        })
        .collect();
    msg.reasoning_content = Some(mirror.join("\n"));
}

// ── Tool parts ─────────────────────────────────────────────────────

fn prune_tool(state: &SessionState, tool: &mut ToolPart, chars_per_token: f64) -> bool {
    if !state.prune.tools.contains(&tool.call_id) {
        return false;
    }
    let body = match tool.status {
        ToolStatus::Error => &mut tool.error,
        _ => &mut tool.output,
    };
    if body
        .as_deref()
        .is_some_and(|b| b.starts_with(PRUNED_PREFIX) || b.starts_with(DISTILLED_PREFIX))
    {
        return false;
    }

    let args = summarize_args(&tool.input, 80);
    let tokens = body
        .as_deref()
        .map_or(0, |b| estimate_tokens(&hashes::strip(b), chars_per_token));
    let placeholder = match state.prune.distilled.get(&tool.call_id) {
        Some(summary) => format!("{DISTILLED_PREFIX} {}({args})] {summary}", tool.tool),
        None => format!("{PRUNED_PREFIX} {}({args}), ~{tokens} tokens]", tool.tool),
    };
    *body = Some(placeholder);
    elide_long_strings(&mut tool.input);
    true
}

/// Replace long string values in tool input with a length note.
fn elide_long_strings(value: &mut Value) {
    match value {
        Value::String(s) if s.chars().count() > MAX_INPUT_STRING => {
            *s = format!("[elided {} chars]", s.chars().count());
        }
        Value::Array(items) => items.iter_mut().for_each(elide_long_strings),
        Value::Object(map) => map.values_mut().for_each(elide_long_strings),
        _ => {}
    }
}

// ── Text and reasoning parts ───────────────────────────────────────

fn prune_whole(
    state: &SessionState,
    category: HashCategory,
    location: &Location,
    text: &mut String,
    preview_chars: usize,
) -> bool {
    let Some(hash) = state.hashes.hash_of(category, location) else {
        return false;
    };
    if !state.prune.set(category).contains(hash) {
        return false;
    }
    let replacement = match state.prune.distilled.get(hash) {
        Some(summary) => {
            if text.starts_with(TEXT_DISTILLED_PREFIX) {
                return false;
            }
            format!("{TEXT_DISTILLED_PREFIX} {summary}")
        }
        None => {
            if text.ends_with(PREVIEW_SUFFIX) {
                return false;
            }
            let preview: String = hashes::strip(text).chars().take(preview_chars).collect();
            format!("{}{PREVIEW_SUFFIX}", preview.trim_end())
        }
    };
    *text = replacement;
    true
}

// ── Range replacements ─────────────────────────────────────────────

/// Apply stored range replacements to every text part from `start` onward.
/// Returns how many parts changed.
///
/// Runs before ids are injected, on text with its tags removed. The first
/// time a part has a replacement pending, its untagged text is kept as the
/// original that offsets refer to. The rewritten text is always rebuilt from
/// that original, so a part is changed only when it arrives as the original
/// again or when new replacements were added since the last pass.
pub fn apply_replacements(state: &mut SessionState, messages: &mut [Message], start: usize) -> usize {
    let SessionState {
        prune,
        applied,
        hashes: registry,
        ..
    } = state;
    if prune.replacements.is_empty() {
        return 0;
    }
    let mut by_part: BTreeMap<&str, BTreeMap<usize, Vec<&TextReplacement>>> = BTreeMap::new();
    for r in &prune.replacements {
        by_part
            .entry(r.message_id.as_str())
            .or_default()
            .entry(r.part_index)
            .or_default()
            .push(r);
    }

    let mut rewritten = 0;
    for msg in messages.iter_mut().skip(start) {
        for (part_idx, part) in msg.parts.iter_mut().enumerate() {
            let Part::Text(text) = part else {
                continue;
            };
            let Some(entries) = by_part
                .get(msg.id.as_str())
                .and_then(|parts| parts.get(&part_idx))
            else {
                continue;
            };
            if text.synthetic {
                continue;
            }
            let location = Location::Part {
                message_id: msg.id.clone(),
                part_index: part_idx,
            };
            if registry
                .hash_of(HashCategory::Message, &location)
                .is_some_and(|h| prune.messages.contains(h))
            {
                continue;
            }

            let current = hashes::strip(&text.text);
            let record = applied
                .rewritten
                .entry(format!("{}:{part_idx}", msg.id))
                .or_insert_with(|| RewrittenText {
                    original: current.clone(),
                    applied: 0,
                });
            if current != record.original && record.applied == entries.len() {
                continue;
            }

            let result = splice(&record.original, entries);
            record.applied = entries.len();
            if result == current {
                continue;
            }
            text.text = result;
            rewritten += 1;
            trace!(message = %msg.id, part = part_idx, "Applied range replacements");
        }
    }
    rewritten
}

/// `original` with every in-range replacement applied, highest start first
/// so earlier edits never move later ones. Entries overlapping a higher one
/// are skipped.
fn splice(original: &str, entries: &[&TextReplacement]) -> String {
    let mut ordered = entries.to_vec();
    ordered.sort_by(|a, b| (b.start, b.end).cmp(&(a.start, a.end)));

    let mut text = original.to_string();
    let mut floor = original.len();
    for r in ordered {
        if r.start > r.end
            || r.end > floor
            || !original.is_char_boundary(r.start)
            || !original.is_char_boundary(r.end)
        {
            trace!(message = %r.message_id, part = r.part_index, "Skipping out-of-range replacement");
            continue;
        }
        text.replace_range(r.start..r.end, &r.replacement);
        floor = r.start;
    }
    text
}

/// Replace each pruned segment of this part, together with its tag.
fn prune_segments(
    state: &SessionState,
    message_id: &str,
    part_index: usize,
    text: &mut String,
) -> bool {
    let mut changed = false;
    for hash in &state.prune.segments {
        let Some(entry) = state.hashes.segments.get(hash) else {
            continue;
        };
        let Location::Segment {
            message_id: seg_message,
            part_index: seg_part,
            ..
        } = &entry.location
        else {
            continue;
        };
        if seg_message != message_id || *seg_part != part_index {
            continue;
        }

        let tag = hashes::inline_tag(hash);
        let Some(tag_start) = text.find(&tag) else {
            continue;
        };
        let Some(before) = text.get(..tag_start) else {
            continue;
        };
        if !before.ends_with(SEGMENT_CLOSE) {
            continue;
        }
        let Some(open) = before.rfind(SEGMENT_OPEN) else {
            continue;
        };
        let placeholder = match state.prune.distilled.get(hash) {
            Some(summary) => format!("[segment distilled: {summary}]"),
            None => SEGMENT_PLACEHOLDER.to_string(),
        };
        text.replace_range(open..tag_start + tag.len(), &placeholder);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::hashes::tag;
    use serde_json::json;

    fn part_loc(message: &str, index: usize) -> Location {
        Location::Part {
            message_id: message.into(),
            part_index: index,
        }
    }

    fn text_of(part: &Part) -> &str {
        match part {
            Part::Text(t) => &t.text,
            Part::Reasoning(r) => &r.text,
            Part::Tool(t) => t.output.as_deref().or(t.error.as_deref()).unwrap_or(""),
            _ => "",
        }
    }

    #[test]
    fn pruned_tool_gets_placeholder_once() {
        let mut state = SessionState::new(10);
        state.prune.tools.insert("c1".into());
        let long = "x".repeat(400);
        let mut messages = vec![Message::assistant(
            "a1",
            vec![Part::tool("c1", "write", json!({"filePath": "/a", "content": long}), "y".repeat(35))],
        )];

        assert_eq!(apply_prunes(&state, &mut messages, 0, 80, 3.5), 1);
        let out = text_of(&messages[0].parts[0]).to_string();
        assert!(out.starts_with("[Output pruned: write("));
        assert!(out.ends_with("~10 tokens]"));
        let Part::Tool(t) = &messages[0].parts[0] else {
            unreachable!()
        };
        assert_eq!(t.input["content"], "[elided 400 chars]");

        let once = messages.clone();
        assert_eq!(apply_prunes(&state, &mut messages, 0, 80, 3.5), 0);
        assert_eq!(messages, once);
    }

    #[test]
    fn distilled_tool_carries_summary() {
        let mut state = SessionState::new(10);
        state.prune.tools.insert("c1".into());
        state.prune.distilled.insert("c1".into(), "three matches in lib.rs".into());
        let mut messages = vec![Message::assistant(
            "a1",
            vec![Part::tool_error("c1", "grep", json!({"pattern": "x"}), "boom")],
        )];
        apply_prunes(&state, &mut messages, 0, 80, 3.5);
        assert_eq!(
            text_of(&messages[0].parts[0]),
            "[Distilled: grep(pattern=\"x\")] three matches in lib.rs"
        );
    }

    #[test]
    fn pruned_text_becomes_preview() {
        let mut state = SessionState::new(10);
        let hash = state.hashes.assign(HashCategory::Message, &json!("t"), part_loc("a1", 0), 1);
        state.prune.messages.insert(hash.clone());
        let mut messages = vec![Message::assistant(
            "a1",
            vec![Part::text(format!("{}{}", "word ".repeat(40), tag(&hash)))],
        )];
        apply_prunes(&state, &mut messages, 0, 20, 3.5);
        assert_eq!(text_of(&messages[0].parts[0]), "word word word word... [pruned]");
        assert_eq!(apply_prunes(&state, &mut messages, 0, 20, 3.5), 0);
    }

    #[test]
    fn pruned_reasoning_updates_mirror() {
        let mut state = SessionState::new(10);
        let hash = state.hashes.assign(HashCategory::Reasoning, &json!("r"), part_loc("a1", 0), 1);
        state.prune.reasoning.insert(hash);
        let mut msg = Message::assistant(
            "a1",
            vec![
                Part::reasoning("a long chain of thought"),
                Part::tool("c1", "read", json!({}), "ok"),
            ],
        );
        msg.reasoning_content = Some("a long chain of thought".into());
        let mut messages = vec![msg];

        apply_prunes(&state, &mut messages, 0, 7, 3.5);
        assert_eq!(messages[0].reasoning_content.as_deref(), Some("a long... [pruned]"));
    }

    fn replace(state: &mut SessionState, start: usize, end: usize, replacement: &str) {
        state.add_replacement(TextReplacement {
            message_id: "u1".into(),
            part_index: 0,
            start,
            end,
            replacement: replacement.into(),
        });
    }

    #[test]
    fn replacements_apply_descending_and_once() {
        let mut state = SessionState::new(10);
        replace(&mut state, 0, 5, "HI");
        replace(&mut state, 6, 11, "THERE");
        let mut messages = vec![Message::user("u1", "hello world and more")];
        assert_eq!(apply_replacements(&mut state, &mut messages, 0), 1);
        assert_eq!(text_of(&messages[0].parts[0]), "HI THERE and more");
        assert_eq!(apply_replacements(&mut state, &mut messages, 0), 0);
        assert_eq!(text_of(&messages[0].parts[0]), "HI THERE and more");

        // Offsets of a later replacement still refer to the original text.
        replace(&mut state, 16, 20, "less");
        assert_eq!(apply_replacements(&mut state, &mut messages, 0), 1);
        assert_eq!(text_of(&messages[0].parts[0]), "HI THERE and less");

        let mut replayed = vec![Message::user("u1", "hello world and more")];
        apply_replacements(&mut state, &mut replayed, 0);
        assert_eq!(replayed, messages);
    }

    #[test]
    fn replacement_that_prefixes_the_range_still_applies() {
        let mut state = SessionState::new(10);
        replace(&mut state, 0, 5, "he");
        replace(&mut state, 6, 11, "there");
        let mut messages = vec![Message::user("u1", "hello world")];
        apply_replacements(&mut state, &mut messages, 0);
        assert_eq!(text_of(&messages[0].parts[0]), "he there");
        assert_eq!(apply_replacements(&mut state, &mut messages, 0), 0);
        assert_eq!(text_of(&messages[0].parts[0]), "he there");
    }

    #[test]
    fn deletion_and_overlap() {
        let mut state = SessionState::new(10);
        replace(&mut state, 5, 11, "");
        replace(&mut state, 3, 8, "overlaps");
        replace(&mut state, 40, 50, "out of range");
        let mut messages = vec![Message::user("u1", "hello world")];
        apply_replacements(&mut state, &mut messages, 0);
        assert_eq!(text_of(&messages[0].parts[0]), "hello");
    }

    #[test]
    fn replacement_offsets_ignore_id_tags() {
        let mut state = SessionState::new(10);
        replace(&mut state, 29, 34, "EARTH");
        let text = "<segment>log</segment><ctx-id>abcdef</ctx-id> hello world\n<ctx-id>123456</ctx-id>";
        let mut messages = vec![Message::user("u1", text)];
        apply_replacements(&mut state, &mut messages, 0);
        assert_eq!(text_of(&messages[0].parts[0]), "<segment>log</segment> hello EARTH");
    }

    #[test]
    fn segment_span_replaced() {
        let mut state = SessionState::new(10);
        let loc = Location::Segment {
            message_id: "u1".into(),
            part_index: 0,
            ordinal: 1,
        };
        let hash = state.hashes.assign(HashCategory::Segment, &json!("b"), loc, 1);
        state.prune.segments.insert(hash.clone());
        let text = format!(
            "<segment>a</segment><ctx-id>aaaaaa</ctx-id> mid <segment>b</segment>{} end",
            hashes::inline_tag(&hash)
        );
        let mut messages = vec![Message::user("u1", text)];
        apply_prunes(&state, &mut messages, 0, 80, 3.5);
        assert_eq!(
            text_of(&messages[0].parts[0]),
            "<segment>a</segment><ctx-id>aaaaaa</ctx-id> mid [segment pruned] end"
        );
    }
}
