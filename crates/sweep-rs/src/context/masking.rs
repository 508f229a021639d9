//! File attachment masking.
//!
//! Inline attachments (images, PDFs) are usually data URLs, and old ones are
//! rarely looked at again. Large attachments past a minimum age are
//! replaced by a synthetic text breadcrumb that records what the file was
//! and the id it is registered under.

use serde_json::json;
use tracing::trace;

use super::budget::estimate_tokens_len;
use super::hashes::FileBreadcrumb;
use super::policy::Policy;
use super::turns::Turns;
use crate::config::FileMaskingConfig;
use crate::session::{SessionState, Strategy};
use crate::{Message, Part, TextPart};

/// Start of every breadcrumb left in place of an attachment.
pub const MASKED_PREFIX: &str = "[File masked:";

/// Replace old, large file parts with breadcrumbs. Returns how many parts
/// were replaced in this pass.
pub fn mask_files(
    state: &mut SessionState,
    config: &FileMaskingConfig,
    policy: &Policy,
    messages: &mut [Message],
    turns: &Turns,
    chars_per_token: f64,
) -> usize {
    let mut masked = 0;

    for (msg_idx, msg) in messages.iter_mut().enumerate().skip(turns.start) {
        for (part_idx, part) in msg.parts.iter_mut().enumerate() {
            let Part::File(file) = &*part else {
                continue;
            };
            let turn = turns.turn(msg_idx, part_idx);
            if policy.current_turn().saturating_sub(turn) < config.min_turn_age
                || file.url.len() < config.min_bytes
                || policy.is_protected_path(file.filename.as_deref())
            {
                continue;
            }

            let bytes = file.url.len();
            let hash = state.hashes.add_breadcrumb(
                &json!({"filename": file.filename, "mime": file.mime, "url": file.url}),
                FileBreadcrumb {
                    message_id: msg.id.clone(),
                    part_index: part_idx,
                    filename: file.filename.clone(),
                    mime: file.mime.clone(),
                    bytes,
                    turn,
                },
            );
            let name = file.filename.as_deref().unwrap_or("attachment");
            let text = format!(
                "{MASKED_PREFIX} {name} ({}, {bytes} bytes), id {hash}]",
                file.mime
            );

            if state.applied.masked.insert(hash.clone()) {
                let saved = estimate_tokens_len(bytes.saturating_sub(text.len()), chars_per_token);
                state.stats.record(Strategy::FileMasking, saved);
                masked += 1;
            }
            trace!(message = %msg.id, part = part_idx, id = %hash, "Masked file attachment");
            *part = Part::Text(TextPart {
                text,
                synthetic: true,
            });
        }
    }

    masked
}
