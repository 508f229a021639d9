//! Context compaction engine for long-running coding agents.
//!
//! `sweep-rs` decides which prior tool outputs, assistant text, and reasoning
//! blocks in a conversation can be removed, summarized, or collapsed without
//! losing information the agent still needs. The host hands the full message
//! list for a session to [`synchronize()`](context::synchronize) on every
//! qualifying lifecycle event; the engine mutates the list in place and keeps
//! its bookkeeping in a serializable [`SessionState`](session::SessionState).
//!
//! # Getting started
//!
//! ```ignore
//! use sweep_rs::prelude::*;
//!
//! let config = SweepConfig::default();
//! let mut state = SessionState::new(config.cache_capacity);
//!
//! // Messages come from the host, usually deserialized from JSON.
//! let mut messages: Vec<Message> = serde_json::from_str(&raw)?;
//!
//! let report = synchronize(&mut state, &config, &mut messages);
//! println!("{}", report.to_log_string());
//!
//! // Surfaces for reminders and the context report.
//! let breakdown = compute_token_breakdown(&state, &messages);
//! let prunable = enumerate_prunable(&state, PrunableFilter::All);
//! ```
//!
//! # Where to find things
//!
//! - **The pass itself:** [`context::sync`] runs, in order, cache ingestion
//!   with auto-supersede ([`context::ingest`], [`context::supersede`]),
//!   deduplication ([`context::dedup`]), truncation and reasoning compression
//!   ([`context::truncation`]), id injection ([`context::hashes`]), and the
//!   rewriting pass ([`context::apply`]).
//!
//! - **Identifiers the agent sees:** [`HashRegistry`](context::hashes::HashRegistry)
//!   assigns six-hex-char ids and appends them to content as trailing
//!   `<ctx-id>…</ctx-id>` tags.
//!
//! - **Tool-call bookkeeping:** [`ToolCache`](context::cache::ToolCache) is the
//!   bounded FIFO record of recent calls, together with the cursor indices used
//!   to detect supersede relationships.
//!
//! - **Configuration:** [`SweepConfig`](config::SweepConfig) and the layered
//!   loader in [`config::loader`].
//!
//! - **Persistence and the engine facade:** [`session::Sweeper`] pairs a
//!   config with an optional [`SessionStore`](session::SessionStore) and saves
//!   state in the background after each pass.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | Hash registry, tool cache, supersede rules, dedup, truncation, application pass, token accounting |
//! | [`session`] | Session state, persistence collaborator, [`Sweeper`](session::Sweeper) facade |
//! | [`config`] | Versioned config schema, layered loading, migration, validation |
//! | [`tools`] | Tool name constants, categories, parameter canonicalization |

pub mod config;
pub mod context;
pub mod error;
pub mod prelude;
pub mod session;
pub mod tools;

use serde::{Deserialize, Serialize};

pub use error::{Error, Result};

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in the conversation, made of ordered parts.
///
/// `reasoning_content` mirrors the message's reasoning parts for providers
/// that require reasoning to be echoed back alongside tool calls. When the
/// application pass rewrites a reasoning part, the mirror is rewritten too.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl Message {
    pub fn system(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::System,
            parts: vec![Part::text(text)],
            reasoning_content: None,
        }
    }

    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::User,
            parts: vec![Part::text(text)],
            reasoning_content: None,
        }
    }

    pub fn assistant(id: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::Assistant,
            parts,
            reasoning_content: None,
        }
    }

    /// Whether any part of this message is a tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Tool(_)))
    }

    /// Whether this message carries a host compaction marker.
    pub fn is_compaction_boundary(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::Marker(m) if m.kind == MarkerKind::Compaction))
    }
}

// ── Part types ─────────────────────────────────────────────────────

/// One part of a message. The set of variants is closed so every pass over
/// the message list is an exhaustive match.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text(TextPart),
    Reasoning(ReasoningPart),
    Tool(ToolPart),
    File(FilePart),
    Marker(MarkerPart),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(TextPart {
            text: text.into(),
            synthetic: false,
        })
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Part::Reasoning(ReasoningPart { text: text.into() })
    }

    /// A tool call that finished successfully with `output`.
    pub fn tool(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        input: serde_json::Value,
        output: impl Into<String>,
    ) -> Self {
        Part::Tool(ToolPart {
            call_id: call_id.into(),
            tool: tool.into(),
            input,
            status: ToolStatus::Completed,
            output: Some(output.into()),
            error: None,
        })
    }

    /// A tool call that failed with `error`.
    pub fn tool_error(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        input: serde_json::Value,
        error: impl Into<String>,
    ) -> Self {
        Part::Tool(ToolPart {
            call_id: call_id.into(),
            tool: tool.into(),
            input,
            status: ToolStatus::Error,
            output: None,
            error: Some(error.into()),
        })
    }

    pub fn file(filename: impl Into<String>, mime: impl Into<String>, url: impl Into<String>) -> Self {
        Part::File(FilePart {
            filename: Some(filename.into()),
            mime: mime.into(),
            url: url.into(),
        })
    }

    /// Turn boundary marker.
    pub fn step_start() -> Self {
        Part::Marker(MarkerPart {
            kind: MarkerKind::StepStart,
        })
    }

    pub fn step_finish() -> Self {
        Part::Marker(MarkerPart {
            kind: MarkerKind::StepFinish,
        })
    }

    pub fn compaction() -> Self {
        Part::Marker(MarkerPart {
            kind: MarkerKind::Compaction,
        })
    }

    /// Whether this part opens a new turn.
    pub fn is_turn_boundary(&self) -> bool {
        matches!(self, Part::Marker(m) if m.kind == MarkerKind::StepStart)
    }
}

/// Plain text. `synthetic` parts were injected by the host or by this
/// engine and are never hashed or pruned.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TextPart {
    pub text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReasoningPart {
    pub text: String,
}

/// A tool invocation together with its result.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolPart {
    /// Host-assigned call identifier. Parts with an empty id are skipped.
    #[serde(default)]
    pub call_id: String,
    pub tool: String,
    #[serde(default)]
    pub input: serde_json::Value,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Lifecycle state of a tool call.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    /// Whether the call has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, ToolStatus::Completed | ToolStatus::Error)
    }
}

/// A file attachment, usually carried inline as a data URL.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FilePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub mime: String,
    pub url: String,
}

/// Structural marker emitted by the host.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MarkerPart {
    pub kind: MarkerKind,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// Start of an assistant step; one per turn.
    StepStart,
    StepFinish,
    /// The host summarized everything before this message.
    Compaction,
}
