//! Assign ids to prunable content and make them visible to the agent.
//!
//! Tags are appended, never prepended, and a part that already ends with its
//! tag is left alone. Pruned and protected content gets no tag.

use regex::{Captures, Regex};
use serde_json::json;
use std::sync::LazyLock;

use super::budget::estimate_tokens;
use super::hashes::{self, HashCategory, Location, SEGMENT_CLOSE, SEGMENT_OPEN};
use super::policy::Policy;
use super::turns::Turns;
use crate::session::SessionState;
use crate::tools::params;
use crate::{Message, MessageRole, Part};

static SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?s){}(.*?){}(<ctx-id>[0-9a-f]{{6}}(?:_\d+)?</ctx-id>)?",
        regex::escape(SEGMENT_OPEN),
        regex::escape(SEGMENT_CLOSE),
    ))
    .expect("static regex")
});

/// Tag every eligible part in the window. Returns how many tags were added.
pub fn inject_hashes(
    state: &mut SessionState,
    policy: &Policy,
    messages: &mut [Message],
    turns: &Turns,
    chars_per_token: f64,
) -> usize {
    let mut tagged = 0;

    for (msg_idx, msg) in messages.iter_mut().enumerate().skip(turns.start) {
        let assistant = msg.role == MessageRole::Assistant;
        for (part_idx, part) in msg.parts.iter_mut().enumerate() {
            let turn = turns.turn(msg_idx, part_idx);
            if policy.is_turn_protected(turn) {
                continue;
            }
            let location = Location::Part {
                message_id: msg.id.clone(),
                part_index: part_idx,
            };
            match part {
                Part::Tool(tool) => {
                    if tool.call_id.is_empty()
                        || !tool.status.is_terminal()
                        || state.prune.tools.contains(&tool.call_id)
                        || policy.is_protected_tool(&tool.tool)
                        || policy.is_protected_path(params::extract_path(&tool.input).as_deref())
                    {
                        continue;
                    }
                    let Some(body) = tool.output.as_mut().or(tool.error.as_mut()) else {
                        continue;
                    };
                    let hash = state.hashes.assign(
                        HashCategory::Tool,
                        &json!({"tool": tool.tool.to_ascii_lowercase(), "input": tool.input}),
                        Location::Tool {
                            call_id: tool.call_id.clone(),
                        },
                        estimate_tokens(body, chars_per_token),
                    );
                    let tag = hashes::tag(&hash);
                    if !body.contains(&tag) {
                        body.push_str(&tag);
                        tagged += 1;
                    }
                }
                Part::Text(text) if !text.synthetic => {
                    let (segmented, added) =
                        tag_segments(state, &msg.id, part_idx, &text.text, chars_per_token);
                    if let Some(segmented) = segmented {
                        text.text = segmented;
                        tagged += added;
                    }
                    if assistant
                        && tag_part(
                            state,
                            HashCategory::Message,
                            location,
                            &mut text.text,
                            chars_per_token,
                        )
                    {
                        tagged += 1;
                    }
                }
                Part::Reasoning(reasoning) if assistant => {
                    if tag_part(
                        state,
                        HashCategory::Reasoning,
                        location,
                        &mut reasoning.text,
                        chars_per_token,
                    ) {
                        tagged += 1;
                    }
                }
                _ => {}
            }
        }
    }

    tagged
}

/// Hash a whole text or reasoning part and append its tag.
fn tag_part(
    state: &mut SessionState,
    category: HashCategory,
    location: Location,
    text: &mut String,
    chars_per_token: f64,
) -> bool {
    if let Some(existing) = state.hashes.hash_of(category, &location)
        && state.prune.set(category).contains(existing)
    {
        return false;
    }
    let content = hashes::strip(text);
    if content.trim().is_empty() {
        return false;
    }
    let hash = state.hashes.assign(
        category,
        &json!(content),
        location,
        estimate_tokens(&content, chars_per_token),
    );
    let tag = hashes::tag(&hash);
    if text.ends_with(&tag) {
        return false;
    }
    text.push_str(&tag);
    true
}

/// Tag every `<segment>` not yet followed by a tag. Returns the rewritten
/// text (if anything changed) and the number of tags added.
fn tag_segments(
    state: &mut SessionState,
    message_id: &str,
    part_index: usize,
    text: &str,
    chars_per_token: f64,
) -> (Option<String>, usize) {
    if !text.contains(SEGMENT_OPEN) {
        return (None, 0);
    }
    let mut ordinal = 0;
    let mut added = 0;
    let rewritten = SEGMENT_RE.replace_all(text, |caps: &Captures| {
        let whole = caps.get(0).map_or("", |m| m.as_str());
        let current = ordinal;
        ordinal += 1;
        if caps.get(2).is_some() {
            return whole.to_string();
        }
        let inner = caps.get(1).map_or("", |m| m.as_str());
        let hash = state.hashes.assign(
            HashCategory::Segment,
            &json!(inner),
            Location::Segment {
                message_id: message_id.to_string(),
                part_index,
                ordinal: current,
            },
            estimate_tokens(inner, chars_per_token),
        );
        added += 1;
        format!("{whole}{}", hashes::inline_tag(&hash))
    });
    if added == 0 {
        return (None, 0);
    }
    (Some(rewritten.into_owned()), added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SweepConfig;
    use serde_json::json;

    fn run(state: &mut SessionState, config: &SweepConfig, messages: &mut [Message]) -> usize {
        let turns = Turns::compute(messages, 0);
        let policy = Policy::new(config, turns.last);
        inject_hashes(state, &policy, messages, &turns, 3.5)
    }

    fn session() -> Vec<Message> {
        vec![
            Message::user("u1", "Look at <segment>the long log</segment> please"),
            Message::assistant(
                "a1",
                vec![
                    Part::step_start(),
                    Part::reasoning("thinking"),
                    Part::text("answer"),
                    Part::tool("c1", "read", json!({"filePath": "/a"}), "contents"),
                ],
            ),
        ]
    }

    #[test]
    fn tags_every_kind_once() {
        let config = SweepConfig::default();
        let mut state = SessionState::new(10);
        let mut messages = session();

        assert_eq!(run(&mut state, &config, &mut messages), 4);
        let once = messages.clone();
        assert_eq!(run(&mut state, &config, &mut messages), 0);
        assert_eq!(messages, once);

        let seg = state.hashes.segments.iter().next().map(|(h, _)| h.clone()).unwrap();
        let Part::Text(user) = &messages[0].parts[0] else {
            unreachable!()
        };
        assert_eq!(
            user.text,
            format!("Look at <segment>the long log</segment><ctx-id>{seg}</ctx-id> please")
        );
        let Part::Tool(tool) = &messages[1].parts[3] else {
            unreachable!()
        };
        assert!(tool.output.as_deref().unwrap().starts_with("contents\n<ctx-id>"));
    }

    #[test]
    fn young_and_protected_content_untagged() {
        let config = SweepConfig::default().with_turn_protection(2).protect_tool("read");
        let mut state = SessionState::new(10);
        let mut messages = session();
        // Everything is in turn 1, which is the current turn.
        assert_eq!(run(&mut state, &config, &mut messages), 0);

        let config = SweepConfig::default().protect_tool("read");
        assert_eq!(run(&mut state, &config, &mut messages), 3);
        assert!(state.hashes.tools.is_empty());
    }

    #[test]
    fn pruned_parts_are_not_tagged() {
        let config = SweepConfig::default();
        let mut state = SessionState::new(10);
        state.prune.tools.insert("c1".into());
        let mut messages = session();
        run(&mut state, &config, &mut messages);
        let Part::Tool(tool) = &messages[1].parts[3] else {
            unreachable!()
        };
        assert_eq!(tool.output.as_deref(), Some("contents"));
    }
}
