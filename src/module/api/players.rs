//! Online player registry
//!
//! The host records joins and leaves; modules only read it (and keep their own
//! per-player state keyed by [`PlayerSession::id`]).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// One connected player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSession {
    pub id: Uuid,
    pub name: String,
    /// Unix timestamp (seconds) of the join
    pub joined_at: u64,
}

/// Seconds since the Unix epoch, 0 if the clock reads earlier
fn now_secs() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs(),
        Err(_) => {
            warn!("System clock is before the Unix epoch, recording join time 0");
            0
        }
    }
}

/// Registry of connected players
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    sessions: RwLock<HashMap<Uuid, PlayerSession>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a join under a fresh session id
    pub async fn join(&self, name: impl Into<String>) -> PlayerSession {
        let session = PlayerSession {
            id: Uuid::new_v4(),
            name: name.into(),
            joined_at: now_secs(),
        };
        self.insert(session.clone()).await;
        session
    }

    /// Record a join with a host-provided id, replacing any previous session
    pub async fn insert(&self, session: PlayerSession) {
        debug!("Player {} ({}) joined", session.name, session.id);
        self.sessions.write().await.insert(session.id, session);
    }

    pub async fn leave(&self, id: &Uuid) -> Option<PlayerSession> {
        let removed = self.sessions.write().await.remove(id);
        if let Some(ref session) = removed {
            debug!("Player {} ({}) left", session.name, session.id);
        }
        removed
    }

    pub async fn get(&self, id: &Uuid) -> Option<PlayerSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Case-insensitive lookup by name
    pub async fn find_by_name(&self, name: &str) -> Option<PlayerSession> {
        self.sessions
            .read()
            .await
            .values()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub async fn online_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// All sessions, oldest join first
    pub async fn list(&self) -> Vec<PlayerSession> {
        let mut sessions: Vec<PlayerSession> =
            self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.name.cmp(&b.name)));
        sessions
    }
}
