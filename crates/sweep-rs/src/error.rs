//! Error types for the configuration loader and session persistence.
//!
//! The compaction pass itself never fails: malformed message parts are
//! skipped and hash collisions are resolved internally. Errors only surface
//! at the edges, where files are read and written.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`enum@Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A config file could not be parsed or validated.
    #[error("Configuration error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// Session state could not be loaded or saved.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Config {
            path: path.into(),
            message: message.into(),
        }
    }
}
