//! Age- and size-gated shrinking of old tool outputs and reasoning blocks.
//!
//! Both rewrites leave a marker in the content. Content carrying the marker
//! is skipped, so a pass over an already rewritten list changes nothing.

use regex::Regex;
use std::sync::LazyLock;
use tracing::trace;

use super::apply::refresh_reasoning_mirror;
use super::budget::estimate_tokens;
use super::hashes::{self, HashCategory, Location};
use super::policy::Policy;
use super::turns::Turns;
use crate::config::{ReasoningCompressionConfig, SweepConfig, TruncationConfig};
use crate::session::{SessionState, Strategy};
use crate::tools::params;
use crate::{Message, MessageRole, Part, ToolStatus};

/// Start of the line inserted where truncated lines were.
pub const TRUNCATION_MARKER: &str = "[truncated:";

/// Prefix of compressed reasoning blocks.
pub const COMPRESSED_PREFIX: &str = "[compressed reasoning]";

static CONCLUSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(therefore|thus|so i|so the|in summary|to summarize|overall|in conclusion|conclusion|i will|i'll|i should|the fix|the answer|the issue is|the problem is|decided|next step|plan is)\b",
    )
    .expect("static regex")
});

/// Counts from one heuristics pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShrinkReport {
    pub truncated: usize,
    pub compressed: usize,
}

/// Truncate old tool outputs and compress old reasoning, as enabled.
pub fn shrink(
    state: &mut SessionState,
    config: &SweepConfig,
    policy: &Policy,
    messages: &mut [Message],
    turns: &Turns,
) -> ShrinkReport {
    let mut report = ShrinkReport::default();
    let truncation = &config.strategies.truncation;
    let compression = &config.strategies.reasoning_compression;

    for (msg_idx, msg) in messages.iter_mut().enumerate().skip(turns.start) {
        let mut reasoning_changed = false;
        for (part_idx, part) in msg.parts.iter_mut().enumerate() {
            let age = policy.current_turn().saturating_sub(turns.turn(msg_idx, part_idx));
            match part {
                Part::Tool(tool) if truncation.enabled => {
                    if tool.status != ToolStatus::Completed
                        || state.prune.tools.contains(&tool.call_id)
                        || age < truncation.config.min_turn_age
                        || !is_target_tool(&truncation.config, &tool.tool)
                        || policy.is_protected_tool(&tool.tool)
                        || policy.is_protected_path(params::extract_path(&tool.input).as_deref())
                    {
                        continue;
                    }
                    let Some(output) = tool.output.as_mut() else {
                        continue;
                    };
                    let before = estimate_tokens(output, config.chars_per_token);
                    if before <= truncation.config.token_threshold
                        || output.contains(TRUNCATION_MARKER)
                    {
                        continue;
                    }
                    let budget = truncation.config.token_threshold as f64 * config.chars_per_token;
                    let Some(shortened) = truncate_lines(
                        output,
                        (budget * truncation.config.head_ratio) as usize,
                        (budget * truncation.config.tail_ratio) as usize,
                    ) else {
                        continue;
                    };
                    *output = shortened;
                    if state.applied.truncated.insert(tool.call_id.clone()) {
                        let after = estimate_tokens(output, config.chars_per_token);
                        state.stats.record(Strategy::Truncation, before.saturating_sub(after));
                        report.truncated += 1;
                    }
                    trace!(call_id = %tool.call_id, "Truncated tool output");
                }
                Part::Reasoning(reasoning)
                    if compression.enabled && msg.role == MessageRole::Assistant =>
                {
                    if age < compression.config.min_turn_age
                        || reasoning.text.starts_with(COMPRESSED_PREFIX)
                    {
                        continue;
                    }
                    let location = Location::Part {
                        message_id: msg.id.clone(),
                        part_index: part_idx,
                    };
                    if state
                        .hashes
                        .hash_of(HashCategory::Reasoning, &location)
                        .is_some_and(|h| state.prune.reasoning.contains(h))
                    {
                        continue;
                    }
                    let text = hashes::strip(&reasoning.text);
                    let before = estimate_tokens(&text, config.chars_per_token);
                    if before <= compression.config.token_threshold {
                        continue;
                    }
                    reasoning.text = compress_reasoning(&text, &compression.config);
                    reasoning_changed = true;
                    if state
                        .applied
                        .compressed
                        .insert(format!("{}:{part_idx}", msg.id))
                    {
                        let after = estimate_tokens(&reasoning.text, config.chars_per_token);
                        state
                            .stats
                            .record(Strategy::ReasoningCompression, before.saturating_sub(after));
                        report.compressed += 1;
                    }
                    trace!(message = %msg.id, part = part_idx, "Compressed reasoning");
                }
                _ => {}
            }
        }
        if reasoning_changed {
            refresh_reasoning_mirror(msg);
        }
    }

    report
}

fn is_target_tool(config: &TruncationConfig, tool: &str) -> bool {
    config.tools.iter().any(|t| t.eq_ignore_ascii_case(tool))
}

/// Keep whole lines from the start (up to `head_chars`) and from the end
/// (up to `tail_chars`), replacing the rest with a marker line. Returns
/// `None` when no line would be dropped.
pub fn truncate_lines(text: &str, head_chars: usize, tail_chars: usize) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let head = lines_within(head_chars, lines.iter());
    let tail = lines_within(tail_chars, lines[head..].iter().rev());
    let omitted = lines.len() - head - tail;
    if omitted == 0 {
        return None;
    }

    let mut out = lines[..head].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(&format!("{TRUNCATION_MARKER} {omitted} lines omitted]"));
    if tail > 0 {
        out.push('\n');
        out.push_str(&lines[lines.len() - tail..].join("\n"));
    }
    Some(out)
}

/// How many leading lines of `lines` fit in `budget` characters.
fn lines_within<'a>(budget: usize, lines: impl Iterator<Item = &'a &'a str>) -> usize {
    let mut used = 0;
    lines
        .take_while(|line| {
            used += line.len() + 1;
            used <= budget
        })
        .count()
}

/// Reduce reasoning to the sentences that state conclusions, falling back
/// to the first and last sentence.
pub fn compress_reasoning(text: &str, config: &ReasoningCompressionConfig) -> String {
    let sentences = split_sentences(text);
    let mut kept: Vec<&str> = sentences
        .iter()
        .copied()
        .filter(|s| CONCLUSION_RE.is_match(s))
        .take(config.max_sentences.max(1))
        .collect();
    if kept.is_empty() {
        kept.extend(sentences.first().copied());
        if sentences.len() > 1 {
            kept.extend(sentences.last().copied());
        }
    }
    format!("{COMPRESSED_PREFIX} {}", kept.join(" "))
}

/// Split on sentence-ending punctuation followed by whitespace, and on
/// newlines.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => Some(i),
            '.' | '!' | '?' => match chars.peek() {
                Some((_, next)) if next.is_whitespace() => Some(i + c.len_utf8()),
                None => Some(i + c.len_utf8()),
                _ => None,
            },
            _ => None,
        };
        if let Some(end) = boundary {
            if let Some(s) = text.get(start..end).map(str::trim)
                && !s.is_empty()
            {
                sentences.push(s);
            }
            start = end;
        }
    }
    if let Some(rest) = text.get(start..).map(str::trim)
        && !rest.is_empty()
    {
        sentences.push(rest);
    }
    sentences
}
