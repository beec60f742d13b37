//! Local fallback store for sessions the backend could not accept.

use std::sync::Mutex;

use crate::error::{Result, TrackingError};
use crate::RunSession;

/// Degraded-path persistence used when ending a session remotely fails.
pub trait LocalSessionStore: Send + Sync {
    fn save(&self, session: &RunSession) -> Result<()>;
}

/// In-process store, mainly for hosts without a database and for tests.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<Vec<RunSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All saved sessions in save order.
    pub fn sessions(&self) -> Vec<RunSession> {
        self.sessions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalSessionStore for MemorySessionStore {
    fn save(&self, session: &RunSession) -> Result<()> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| TrackingError::persistence("session store lock poisoned"))?;
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => sessions.push(session.clone()),
        }
        Ok(())
    }
}
