//! Per-session state, its persistence, and the host-facing [`Sweeper`].

pub mod state;
pub mod store;
pub mod sweeper;

pub use state::{
    AppliedSets, Counter, MarkOutcome, PruneSets, RewrittenText, SessionState, Strategy,
    SweepStats, TextReplacement, TodoItem, TodoStatus,
};
pub use store::{FileSessionStore, SessionStore};
pub use sweeper::Sweeper;
