//! Tool parameter canonicalization and key extraction.
//!
//! Supersede and dedup decisions compare calls by signature, so two calls
//! whose arguments differ only in key order must produce the same string.
//! [`stable_json`] writes JSON with object keys sorted at every depth.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Argument keys that may hold a file path, in lookup order.
const PATH_KEYS: &[&str] = &["filePath", "file_path", "path", "file"];

/// Argument keys that may hold a shell command.
const COMMAND_KEYS: &[&str] = &["command", "cmd"];

/// First words of shell commands that only inspect state.
const READ_ONLY_COMMANDS: &[&str] = &[
    "ls", "pwd", "ps", "df", "du", "env", "whoami", "date", "uname", "which", "tree", "wc",
];

/// `git` subcommands that only inspect state.
const READ_ONLY_GIT: &[&str] = &["status", "diff", "log", "branch", "show", "remote"];

/// Shell fragments that make a command unsafe to treat as read-only.
const MUTATING_FRAGMENTS: &[&str] = &[">", ";", "&&", "||", "`", "$("];

/// Serialize `value` with object keys sorted recursively.
///
/// Independent of serde_json's map ordering features, so the output is the
/// same for every build of the crate.
pub fn stable_json(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_stable(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Rebuild `value` with object keys inserted in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        scalar => scalar.clone(),
    }
}

/// Identity of a call for exact-match comparisons: tool name plus stable
/// parameters.
pub fn signature(tool: &str, input: &Value) -> String {
    format!("{}::{}", tool.to_ascii_lowercase(), stable_json(input))
}

/// Extract and normalize the file path a call operates on.
pub fn extract_path(input: &Value) -> Option<String> {
    let obj = input.as_object()?;
    PATH_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(|v| v.as_str()))
        .filter(|p| !p.is_empty())
        .map(normalize_path)
}

/// Lexically normalize a path: drop `.` segments, resolve `..`, collapse
/// repeated separators, and remove a trailing separator.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Extract the URL of a fetch-like call.
pub fn extract_url(input: &Value) -> Option<String> {
    input
        .get("url")
        .and_then(|v| v.as_str())
        .map(|u| u.trim().trim_end_matches('/').to_string())
        .filter(|u| !u.is_empty())
}

/// Extract the command of a shell-like call.
pub fn extract_command(input: &Value) -> Option<String> {
    let obj = input.as_object()?;
    COMMAND_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(|v| v.as_str()))
        .map(normalize_command)
        .filter(|c| !c.is_empty())
}

/// Collapse runs of whitespace so cosmetic differences don't split
/// signatures.
pub fn normalize_command(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether a shell command only inspects state.
pub fn is_read_only_command(command: &str) -> bool {
    if MUTATING_FRAGMENTS.iter().any(|f| command.contains(f)) {
        return false;
    }
    // Every stage of a pipeline has to be read-only.
    command.split('|').all(|stage| {
        let mut words = stage.split_whitespace();
        match words.next() {
            Some("git") => words.next().is_some_and(|sub| READ_ONLY_GIT.contains(&sub)),
            Some(first) => READ_ONLY_COMMANDS.contains(&first) || is_pager(first),
            None => false,
        }
    })
}

fn is_pager(word: &str) -> bool {
    matches!(word, "head" | "tail" | "sort" | "uniq" | "grep")
}

/// Signature used by the state-query index: tool plus normalized command,
/// or tool plus stable parameters for introspection tools without one.
pub fn state_query_signature(tool: &str, input: &Value) -> String {
    match extract_command(input) {
        Some(cmd) => format!("{}::{cmd}", tool.to_ascii_lowercase()),
        None => signature(tool, input),
    }
}

/// Line range requested by a read call. A missing `limit` means the read
/// runs to the end of the file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadRange {
    pub offset: u64,
    pub limit: Option<u64>,
}

impl ReadRange {
    pub fn from_input(input: &Value) -> Self {
        Self {
            offset: input.get("offset").and_then(Value::as_u64).unwrap_or(0),
            limit: input.get("limit").and_then(Value::as_u64),
        }
    }

    /// Exclusive end of the range, or `None` when open-ended.
    pub fn end(&self) -> Option<u64> {
        self.limit.map(|l| self.offset.saturating_add(l))
    }

    /// Whether this (newer) range covers every line of `older`.
    ///
    /// An open-ended range covers any range starting at or after its offset.
    /// A bounded range never covers an open-ended one.
    pub fn contains(&self, older: &ReadRange) -> bool {
        match (self.end(), older.end()) {
            (None, _) => self.offset <= older.offset,
            (Some(_), None) => false,
            (Some(end), Some(older_end)) => self.offset <= older.offset && older_end <= end,
        }
    }
}

/// Extract a short argument summary from JSON arguments for use in
/// placeholders.
pub fn summarize_args(input: &Value, max_len: usize) -> String {
    let Some(obj) = input.as_object() else {
        return truncate_chars(&input.to_string(), max_len);
    };
    let mut keys: Vec<&String> = obj.keys().collect();
    keys.sort();
    let parts: Vec<String> = keys
        .into_iter()
        .take(3)
        .map(|k| {
            let val = match &obj[k.as_str()] {
                Value::String(s) => format!("\"{}\"", truncate_chars(s, 40)),
                other => truncate_chars(&other.to_string(), 40),
            };
            format!("{k}={val}")
        })
        .collect();
    truncate_chars(&parts.join(", "), max_len)
}

/// Truncate to at most `max` characters, ending with `...` when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
