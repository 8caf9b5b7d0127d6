//! Per-session conversation memory.
//!
//! Sessions are keyed by an opaque client-supplied id. Each holds a bounded
//! window of recent turns; when the window is full the oldest exchange is
//! evicted. Idle sessions are reaped by `evict_inactive`, which the server
//! runs on a timer.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::ChatTurn;

struct Session {
    turns: VecDeque<ChatTurn>,
    last_active: DateTime<Utc>,
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns,
        }
    }

    /// Current history for a session, oldest first. Unknown ids yield an
    /// empty history.
    pub async fn history(&self, session_id: &str) -> Vec<ChatTurn> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|s| s.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// True if the session exists and has at least one turn.
    pub async fn has_history(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).is_some_and(|s| !s.turns.is_empty())
    }

    /// Seed a session with externally supplied turns. Only applies when the
    /// session has no server-side history yet; an existing session is
    /// authoritative and the seed is ignored.
    pub async fn seed(&self, session_id: &str, turns: Vec<ChatTurn>) {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.to_string()).or_insert_with(|| Session {
            turns: VecDeque::new(),
            last_active: Utc::now(),
        });
        if !session.turns.is_empty() {
            return;
        }
        for turn in turns {
            if session.turns.len() == self.max_turns {
                session.turns.pop_front();
            }
            session.turns.push_back(turn);
        }
        session.last_active = Utc::now();
    }

    /// Record a completed user/assistant exchange, evicting the oldest
    /// turns if the window is full.
    pub async fn append_exchange(&self, session_id: &str, question: &str, answer: &str) {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.to_string()).or_insert_with(|| Session {
            turns: VecDeque::new(),
            last_active: Utc::now(),
        });
        for turn in [ChatTurn::user(question), ChatTurn::assistant(answer)] {
            if session.turns.len() == self.max_turns {
                session.turns.pop_front();
            }
            session.turns.push_back(turn);
        }
        session.last_active = Utc::now();
    }

    /// Drop a session's history entirely. Returns true if it existed.
    pub async fn reset(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    /// Remove sessions idle for longer than `max_idle_secs`. Returns the
    /// number evicted.
    pub async fn evict_inactive(&self, max_idle_secs: u64) -> usize {
        let cutoff = Utc::now() - Duration::seconds(max_idle_secs as i64);
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_active >= cutoff);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "evicted idle sessions");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[tokio::test]
    async fn unknown_session_has_empty_history() {
        let store = SessionStore::new(10);
        assert!(store.history("nobody").await.is_empty());
        assert!(!store.has_history("nobody").await);
    }

    #[tokio::test]
    async fn exchange_appends_user_then_assistant() {
        let store = SessionStore::new(10);
        store.append_exchange("s1", "hello", "hi there").await;

        let history = store.history("s1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "hi there");
    }

    #[tokio::test]
    async fn window_evicts_oldest_first() {
        let store = SessionStore::new(4);
        store.append_exchange("s1", "q1", "a1").await;
        store.append_exchange("s1", "q2", "a2").await;
        store.append_exchange("s1", "q3", "a3").await;

        let history = store.history("s1").await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "q2");
        assert_eq!(history[3].content, "a3");
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = SessionStore::new(10);
        store.append_exchange("a", "qa", "aa").await;
        store.append_exchange("b", "qb", "ab").await;

        assert_eq!(store.history("a").await[0].content, "qa");
        assert_eq!(store.history("b").await[0].content, "qb");
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn seed_only_fills_empty_sessions() {
        let store = SessionStore::new(10);
        store
            .seed("s1", vec![ChatTurn::user("earlier"), ChatTurn::assistant("reply")])
            .await;
        assert_eq!(store.history("s1").await.len(), 2);

        // Existing history wins over a second seed.
        store.seed("s1", vec![ChatTurn::user("other")]).await;
        let history = store.history("s1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "earlier");
    }

    #[tokio::test]
    async fn reset_removes_session() {
        let store = SessionStore::new(10);
        store.append_exchange("s1", "q", "a").await;
        assert!(store.reset("s1").await);
        assert!(!store.reset("s1").await);
        assert!(store.history("s1").await.is_empty());
    }

    #[tokio::test]
    async fn evict_inactive_keeps_recent_sessions() {
        let store = SessionStore::new(10);
        store.append_exchange("fresh", "q", "a").await;
        assert_eq!(store.evict_inactive(3600).await, 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn evict_inactive_with_zero_idle_drops_all() {
        let store = SessionStore::new(10);
        store.append_exchange("s1", "q", "a").await;
        // A zero-second idle window makes every session stale.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(store.evict_inactive(0).await, 1);
        assert_eq!(store.len().await, 0);
    }
}
