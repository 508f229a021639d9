//! Context compaction: decide what old content the model no longer needs and
//! rewrite the message list so it doesn't pay for it.
//!
//! A pass runs through [`synchronize`] on every request:
//!
//! 1. **[`turns`]** numbers turns from step-start markers, scanning only
//!    from the last host compaction marker.
//! 2. **[`cache`]** records each finished tool call once, in a bounded FIFO
//!    cache with per-category cursor indices.
//! 3. **[`supersede`]** prunes older calls made obsolete by a new one (a
//!    read followed by a write of the same file, a repeated todo list).
//! 4. **[`dedup`]**, **[`truncation`]** and **[`masking`]** apply the
//!    optional heuristics.
//! 5. **[`inject`]** registers ids in the [`hashes`] registry and appends
//!    `<ctx-id>` tags so the model can ask for content to be pruned.
//! 6. **[`apply`]** swaps pruned content for short placeholders.
//!
//! [`budget`] estimates token usage and [`prunable`] lists ids that can still
//! be marked.

pub mod apply;
pub mod budget;
pub mod cache;
pub mod dedup;
pub mod hashes;
pub mod ingest;
pub mod inject;
pub mod masking;
pub mod policy;
pub mod prunable;
pub mod supersede;
pub mod sync;
pub mod truncation;
pub mod turns;

pub use budget::{
    DEFAULT_CHARS_PER_TOKEN, TokenBreakdown, compute_token_breakdown, estimate_tokens,
};
pub use cache::{ToolCache, ToolEntry};
pub use hashes::{HashCategory, HashRegistry, Location};
pub use policy::Policy;
pub use prunable::{PrunableFilter, PrunableItem, enumerate_prunable};
pub use supersede::SupersedeKind;
pub use sync::{SyncReport, synchronize};
