//! Session state persistence.
//!
//! The engine never waits on storage: [`SessionStore::persist`] returns a
//! future that the [`Sweeper`](super::Sweeper) spawns and forgets. Loading
//! happens once, when a session is first seen.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::SessionState;
use crate::{Error, Result};

/// Where session state lives between passes.
pub trait SessionStore: Send + Sync {
    /// Load the saved state for `session_id`. `Ok(None)` if there is none.
    fn load(&self, session_id: &str) -> Result<Option<SessionState>>;

    /// Save a snapshot of `state`. The returned future owns everything it
    /// needs.
    fn persist(&self, session_id: &str, state: SessionState) -> BoxFuture<'static, Result<()>>;
}

// ── FileSessionStore ───────────────────────────────────────────────

/// One JSON file per session:
///
/// ```text
/// dir/
/// ├── ses_abc123.json
/// └── ses_def456.json
/// ```
///
/// Snapshots are numbered when [`persist`](SessionStore::persist) is called.
/// Each writes its own temp file, and a snapshot older than the one already
/// in place is discarded instead of renamed over it.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
    next_seq: Arc<AtomicU64>,
    /// Sequence number of the snapshot in place, per session.
    written: Arc<Mutex<HashMap<String, u64>>>,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_seq: Arc::new(AtomicU64::new(1)),
            written: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Store under the platform data directory (`$DATA/sweep/sessions`).
    pub fn in_data_dir() -> Option<Self> {
        dirs::data_dir().map(|d| Self::new(d.join("sweep").join("sessions")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a session's state file. Ids that could escape the directory
    /// are rejected.
    pub fn state_path(&self, session_id: &str) -> Result<PathBuf> {
        if session_id.is_empty()
            || session_id.contains(['/', '\\'])
            || session_id.starts_with('.')
        {
            return Err(Error::Persistence(format!(
                "invalid session id {session_id:?}"
            )));
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, session_id: &str) -> Result<Option<SessionState>> {
        let path = self.state_path(session_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&json) {
            Ok(state) => Ok(Some(state)),
            Err(e) => Err(Error::Persistence(format!(
                "failed to parse {}: {e}",
                path.display()
            ))),
        }
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    fn persist(&self, session_id: &str, state: SessionState) -> BoxFuture<'static, Result<()>> {
        let path = self.state_path(session_id);
        let dir = self.dir.clone();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let written = Arc::clone(&self.written);
        let session_id = session_id.to_string();
        Box::pin(async move {
            let path = path?;
            let json = serde_json::to_string(&state)?;
            tokio::fs::create_dir_all(&dir).await?;

            let mut tmp = path.clone().into_os_string();
            tmp.push(format!(".{}.{seq}.tmp", std::process::id()));
            let tmp = PathBuf::from(tmp);
            tokio::fs::write(&tmp, json).await?;

            let mut written = written.lock().await;
            if written.get(&session_id).is_some_and(|&newest| newest > seq) {
                debug!(session = %session_id, seq, "Discarding stale session snapshot");
                let _ = tokio::fs::remove_file(&tmp).await;
                return Ok(());
            }
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                warn!("Failed to move {} into place: {e}", tmp.display());
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }
            written.insert(session_id, seq);
            debug!(path = %path.display(), seq, "Persisted session state");
            Ok(())
        })
    }
}
