//! Tool vocabulary shared by the compaction passes.
//!
//! The engine never executes tools; it only needs to know what a call did
//! in order to decide when a later call makes it obsolete.
//!
//! # Submodules
//!
//! - [`names`]: canonical tool name constants and [`ToolCategory`].
//! - [`params`]: stable parameter serialization, signatures, and extraction
//!   of paths, URLs, commands, and read ranges.

pub mod names;
pub mod params;

pub use names::ToolCategory;
pub use params::{ReadRange, canonicalize, signature, stable_json, summarize_args};
