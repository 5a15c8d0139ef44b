//! Live session bookkeeping
//!
//! Tracks which ephemeral port each active agent session holds, so the
//! relay can report what is exposed where. Entries are removed on teardown.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Monotonic session/visitor id generator for log correlation
#[derive(Clone)]
pub struct SessionIdGenerator {
    next_id: Arc<AtomicU64>,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn generate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: u64,
    pub port: u16,
    pub agent_addr: SocketAddr,
    pub started_at: DateTime<Utc>,
}

/// Active sessions keyed by session id
pub struct SessionRegistry {
    sessions: Mutex<HashMap<u64, SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, info: SessionInfo) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(info.id, info);
        }
    }

    pub fn unregister(&self, session_id: u64) -> Option<SessionInfo> {
        self.sessions
            .lock()
            .ok()
            .and_then(|mut sessions| sessions.remove(&session_id))
    }

    pub fn get(&self, session_id: u64) -> Option<SessionInfo> {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(&session_id).cloned())
    }

    /// Snapshot of live sessions ordered by id
    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        let mut active: Vec<SessionInfo> = match self.sessions.lock() {
            Ok(sessions) => sessions.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        active.sort_by_key(|info| info.id);
        active
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
