//! Convenience re-exports for common `sweep-rs` types.
//!
//! Meant to be glob-imported by hosts:
//!
//! ```ignore
//! use sweep_rs::prelude::*;
//! ```
//!
//! Covers the message model, config, the [`Sweeper`] driver and the state
//! it works on. Pass internals (cache, supersede rules, heuristics) are left
//! out; import those from their modules when needed.

// ── Message model ───────────────────────────────────────────────────
pub use crate::{Error, Message, MessageRole, Part, Result, ToolPart, ToolStatus};

// ── Configuration ───────────────────────────────────────────────────
pub use crate::config::{ConfigCache, SweepConfig, default_config_paths};

// ── Compaction ──────────────────────────────────────────────────────
pub use crate::context::{
    PrunableFilter, PrunableItem, SyncReport, TokenBreakdown, compute_token_breakdown,
    enumerate_prunable, synchronize,
};

// ── Sessions ────────────────────────────────────────────────────────
pub use crate::session::{FileSessionStore, MarkOutcome, SessionState, SessionStore, Sweeper};
