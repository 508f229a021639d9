//! Host-facing driver: config, an optional store, and one call per request.

use std::sync::Arc;
use tracing::{debug, warn};

use super::{SessionState, SessionStore};
use crate::Message;
use crate::config::SweepConfig;
use crate::context::{SyncReport, synchronize};

/// Runs synchronization passes and saves state in the background.
///
/// Callers serialize passes per session; the sweeper holds no per-session
/// locks.
#[derive(Clone)]
pub struct Sweeper {
    config: SweepConfig,
    store: Option<Arc<dyn SessionStore>>,
}

impl Sweeper {
    pub fn new(config: SweepConfig) -> Self {
        Self {
            config,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Saved state for `session_id`, or a fresh one when there is no store,
    /// nothing saved, or the saved state can't be read.
    pub fn load_state(&self, session_id: &str) -> SessionState {
        let fresh = || SessionState::new(self.config.cache_capacity);
        let Some(store) = &self.store else {
            return fresh();
        };
        match store.load(session_id) {
            Ok(Some(state)) => {
                debug!(session = %session_id, "Loaded session state");
                state
            }
            Ok(None) => fresh(),
            Err(e) => {
                warn!(session = %session_id, "Starting with fresh state: {e}");
                fresh()
            }
        }
    }

    /// Run one pass, then hand a snapshot to the store without waiting.
    ///
    /// Persistence needs a tokio runtime; without one the snapshot is
    /// skipped with a warning.
    pub fn sync(
        &self,
        session_id: &str,
        state: &mut SessionState,
        messages: &mut [Message],
    ) -> SyncReport {
        let report = synchronize(state, &self.config, messages);
        if report.changed() {
            self.spawn_persist(session_id, state);
        }
        report
    }

    fn spawn_persist(&self, session_id: &str, state: &SessionState) {
        let Some(store) = &self.store else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(session = %session_id, "No async runtime; session state not persisted");
            return;
        };
        let future = store.persist(session_id, state.clone());
        let session_id = session_id.to_string();
        handle.spawn(async move {
            if let Err(e) = future.await {
                warn!(session = %session_id, "Failed to persist session state: {e}");
            }
        });
    }
}
