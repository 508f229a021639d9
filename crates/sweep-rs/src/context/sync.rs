//! One synchronization pass over the host's message list.
//!
//! The pass runs in a fixed order: compaction check, turn counting, cache
//! ingestion (with supersede), dedup, truncation and reasoning compression,
//! file masking, range replacements, hash injection, then the pruning
//! application pass. Every step is idempotent, so the host can call this on
//! every request.

use chrono::Utc;
use tracing::debug;

use super::apply::{apply_prunes, apply_replacements};
use super::dedup::deduplicate;
use super::ingest::ingest;
use super::inject::inject_hashes;
use super::masking::mask_files;
use super::policy::Policy;
use super::truncation::shrink;
use super::turns::Turns;
use crate::Message;
use crate::config::SweepConfig;
use crate::session::SessionState;

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Turn after counting.
    pub current_turn: u32,
    /// Whether a new host compaction reset the state.
    pub reset: bool,
    pub ingested: usize,
    pub superseded: usize,
    pub evicted: usize,
    pub deduplicated: usize,
    pub truncated: usize,
    pub compressed: usize,
    pub masked: usize,
    /// Tags added this pass.
    pub tagged: usize,
    /// Parts rewritten by range replacements and the application pass.
    pub rewritten: usize,
}

impl SyncReport {
    /// Whether the pass changed the state or the messages.
    pub fn changed(&self) -> bool {
        self.reset
            || self.ingested
                + self.deduplicated
                + self.truncated
                + self.compressed
                + self.masked
                + self.tagged
                + self.rewritten
                > 0
    }

    pub fn to_log_string(&self) -> String {
        format!(
            "sync turn {}: {} ingested, {} superseded, {} evicted, {} deduplicated, \
             {} truncated, {} compressed, {} masked, {} tagged, {} rewritten{}",
            self.current_turn,
            self.ingested,
            self.superseded,
            self.evicted,
            self.deduplicated,
            self.truncated,
            self.compressed,
            self.masked,
            self.tagged,
            self.rewritten,
            if self.reset { " (reset after compaction)" } else { "" },
        )
    }
}

/// Bring `state` up to date with `messages` and rewrite them in place.
///
/// Never fails: malformed items are skipped. With `config.enabled` off the
/// messages are left untouched.
pub fn synchronize(
    state: &mut SessionState,
    config: &SweepConfig,
    messages: &mut [Message],
) -> SyncReport {
    let mut report = SyncReport {
        current_turn: state.current_turn,
        ..SyncReport::default()
    };
    if !config.enabled {
        return report;
    }

    // ── Compaction boundary ────────────────────────────────────────
    let marker = messages
        .iter()
        .rev()
        .find(|m| m.is_compaction_boundary())
        .map(|m| m.id.clone());
    if marker.is_some() && marker != state.compaction_marker {
        state.reset_for_compaction(Utc::now());
        state.compaction_marker = marker;
        report.reset = true;
    }

    // ── Turns and cache ────────────────────────────────────────────
    let turns = Turns::compute(messages, state.turn_offset);
    state.current_turn = state.current_turn.max(turns.last);
    report.current_turn = state.current_turn;
    report.evicted += state.tool_cache.set_capacity(config.cache_capacity).len();

    let policy = Policy::new(config, state.current_turn);
    let ingested = ingest(state, config, &policy, messages, &turns);
    report.ingested = ingested.ingested;
    report.superseded = ingested.superseded;
    report.evicted += ingested.evicted;

    // ── Heuristics ─────────────────────────────────────────────────
    if config.strategies.deduplication.enabled {
        report.deduplicated =
            deduplicate(state, &config.strategies.deduplication.config, &policy).total();
    }
    let shrunk = shrink(state, config, &policy, messages, &turns);
    report.truncated = shrunk.truncated;
    report.compressed = shrunk.compressed;
    if config.strategies.file_masking.enabled {
        report.masked = mask_files(
            state,
            &config.strategies.file_masking.config,
            &policy,
            messages,
            &turns,
            config.chars_per_token,
        );
    }

    // ── Ids and application ────────────────────────────────────────
    report.rewritten = apply_replacements(state, messages, turns.start);
    report.tagged = inject_hashes(state, &policy, messages, &turns, config.chars_per_token);
    report.rewritten += apply_prunes(
        state,
        messages,
        turns.start,
        config.preview_chars,
        config.chars_per_token,
    );

    debug!("{}", report.to_log_string());
    report
}
