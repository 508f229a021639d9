//! Canonical tool name constants and supersede categories.
//!
//! All tool-name string literals should reference these constants to avoid
//! scattered magic strings. Hosts disagree on naming (`read` vs `read_file`),
//! so [`ToolCategory::classify`] accepts both families.

use serde::{Deserialize, Serialize};

pub const READ: &str = "read";
pub const READ_FILE: &str = "read_file";
pub const WRITE: &str = "write";
pub const WRITE_FILE: &str = "write_file";
pub const EDIT: &str = "edit";
pub const EDIT_FILE: &str = "edit_file";
pub const MULTIEDIT: &str = "multiedit";
pub const PATCH: &str = "patch";
pub const GLOB: &str = "glob";
pub const FIND_FILES: &str = "find_files";
pub const GREP: &str = "grep";
pub const LIST: &str = "list";
pub const LIST_DIR: &str = "list_dir";
pub const BASH: &str = "bash";
pub const SHELL: &str = "shell";
pub const WEBFETCH: &str = "webfetch";
pub const FETCH: &str = "fetch";
pub const TODOWRITE: &str = "todowrite";
pub const TODOREAD: &str = "todoread";
pub const CONTEXT: &str = "context";
pub const PRUNE: &str = "prune";
pub const DISTILL: &str = "distill";
pub const TASK: &str = "task";

/// How a tool participates in supersede detection.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Reads file content; indexed by path, may carry an offset/limit range.
    Read,
    /// Mutates a file; supersedes reads of the same path.
    Write,
    /// Lists paths by pattern; indexed by path.
    Glob,
    Grep,
    /// Fetches a URL; indexed by URL.
    Fetch,
    TodoWrite,
    TodoRead,
    /// Context-management calls issued by the agent itself.
    Context,
    /// Captures the whole state of something (browser, screen); only the
    /// latest is ever useful.
    Snapshot,
    /// Read-only shell or introspection command; indexed by signature.
    StateQuery,
    /// Any other shell command.
    Shell,
    Other,
}

impl ToolCategory {
    /// Classify a call by tool name. Shell tools are split into
    /// [`StateQuery`](Self::StateQuery) and [`Shell`](Self::Shell) by
    /// inspecting the command.
    pub fn classify(tool: &str, input: &serde_json::Value) -> Self {
        let lower = tool.to_ascii_lowercase();
        match lower.as_str() {
            READ | READ_FILE => ToolCategory::Read,
            WRITE | WRITE_FILE | EDIT | EDIT_FILE | MULTIEDIT | PATCH => ToolCategory::Write,
            GLOB | FIND_FILES => ToolCategory::Glob,
            GREP => ToolCategory::Grep,
            WEBFETCH | FETCH => ToolCategory::Fetch,
            TODOWRITE => ToolCategory::TodoWrite,
            TODOREAD => ToolCategory::TodoRead,
            CONTEXT | PRUNE | DISTILL => ToolCategory::Context,
            LIST | LIST_DIR => ToolCategory::StateQuery,
            BASH | SHELL => match super::params::extract_command(input) {
                Some(cmd) if super::params::is_read_only_command(&cmd) => ToolCategory::StateQuery,
                _ => ToolCategory::Shell,
            },
            name if name.contains("snapshot") || name.contains("screenshot") => {
                ToolCategory::Snapshot
            }
            _ => ToolCategory::Other,
        }
    }

    /// Whether calls in this category are keyed by a file path.
    pub fn is_path_indexed(self) -> bool {
        matches!(
            self,
            ToolCategory::Read | ToolCategory::Write | ToolCategory::Glob
        )
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ToolCategory::Read => "read",
            ToolCategory::Write => "write",
            ToolCategory::Glob => "glob",
            ToolCategory::Grep => "grep",
            ToolCategory::Fetch => "fetch",
            ToolCategory::TodoWrite => "todo_write",
            ToolCategory::TodoRead => "todo_read",
            ToolCategory::Context => "context",
            ToolCategory::Snapshot => "snapshot",
            ToolCategory::StateQuery => "state_query",
            ToolCategory::Shell => "shell",
            ToolCategory::Other => "other",
        };
        f.write_str(name)
    }
}
