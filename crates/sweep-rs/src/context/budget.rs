//! Token accounting: heuristic size estimates and the per-role breakdown
//! shown by the context report.
//!
//! Estimates are character-based. They only need to be consistent with each
//! other so thresholds and savings are comparable across passes.

use crate::session::SessionState;
use crate::{Message, MessageRole, Part};
use serde::Serialize;

/// Default characters per token for English text and code.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Estimate tokens for a piece of text.
pub fn estimate_tokens(text: &str, chars_per_token: f64) -> usize {
    estimate_tokens_len(text.len(), chars_per_token)
}

/// Estimate tokens for `len` bytes of text.
pub fn estimate_tokens_len(len: usize, chars_per_token: f64) -> usize {
    if chars_per_token <= 0.0 {
        return len;
    }
    (len as f64 / chars_per_token).ceil() as usize
}

/// Estimated tokens by origin, as reported to the context command.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenBreakdown {
    pub system: usize,
    pub user: usize,
    /// Assistant text and reasoning.
    pub assistant: usize,
    /// Tool inputs and outputs.
    pub tools: usize,
    /// Tokens already removed by compaction over the session.
    pub pruned_tokens: usize,
    /// `system + user + assistant + tools`.
    pub total: usize,
}

impl TokenBreakdown {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens (system {}, user {}, assistant {}, tools {}; {} pruned)",
            self.total, self.system, self.user, self.assistant, self.tools, self.pruned_tokens,
        )
    }
}

/// Compute the token breakdown of `messages` with the default ratio.
pub fn compute_token_breakdown(state: &SessionState, messages: &[Message]) -> TokenBreakdown {
    compute_token_breakdown_with(state, messages, DEFAULT_CHARS_PER_TOKEN)
}

/// Compute the token breakdown of `messages` with an explicit ratio.
pub fn compute_token_breakdown_with(
    state: &SessionState,
    messages: &[Message],
    chars_per_token: f64,
) -> TokenBreakdown {
    let mut breakdown = TokenBreakdown::default();

    for msg in messages {
        for part in &msg.parts {
            let (bucket, chars) = match part {
                Part::Text(t) => (role_bucket(msg.role), t.text.len()),
                Part::Reasoning(r) => (role_bucket(msg.role), r.text.len()),
                Part::Tool(t) => {
                    let input = if t.input.is_null() {
                        0
                    } else {
                        t.input.to_string().len()
                    };
                    let output = t.output.as_ref().map_or(0, String::len)
                        + t.error.as_ref().map_or(0, String::len);
                    (Bucket::Tools, input + output)
                }
                Part::File(f) => (role_bucket(msg.role), f.url.len()),
                Part::Marker(_) => continue,
            };
            let tokens = estimate_tokens_len(chars, chars_per_token);
            match bucket {
                Bucket::System => breakdown.system += tokens,
                Bucket::User => breakdown.user += tokens,
                Bucket::Assistant => breakdown.assistant += tokens,
                Bucket::Tools => breakdown.tools += tokens,
            }
        }
    }

    breakdown.pruned_tokens = state.stats.total_tokens() as usize;
    breakdown.total = breakdown.system + breakdown.user + breakdown.assistant + breakdown.tools;
    breakdown
}

enum Bucket {
    System,
    User,
    Assistant,
    Tools,
}

fn role_bucket(role: MessageRole) -> Bucket {
    match role {
        MessageRole::System => Bucket::System,
        MessageRole::User => Bucket::User,
        MessageRole::Assistant => Bucket::Assistant,
    }
}
