//! In-memory history store.
//!
//! Sessions live for the lifetime of the process and are keyed by an opaque
//! caller-supplied ID. Every operation is total: reading an unknown session
//! creates it, resetting an unknown session succeeds.
//!
//! Two concurrent requests for the same session each read a snapshot, so
//! the context one sends upstream may not include the other's in-flight
//! turn. Both commits land; the later one is appended last.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::truncate::{truncate, DEFAULT_MAX_TURNS};
use super::types::{History, Turn};

/// Thread-safe map from session ID to history.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    sessions: Arc<RwLock<HashMap<String, History>>>,
    max_turns: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl HistoryStore {
    /// Create an empty store that keeps at most `max_turns` pairs per session.
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_turns,
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    // Each mutation is a single push/drain/remove, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, History>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, History>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of a session's history, creating the session if absent.
    pub fn get(&self, session_id: &str) -> History {
        if let Some(history) = self.read().get(session_id) {
            return history.clone();
        }
        self.write().entry(session_id.to_string()).or_default().clone()
    }

    /// Apply the truncation policy to a session in place and return the
    /// bounded snapshot. Creates the session if absent.
    pub fn prune(&self, session_id: &str) -> History {
        let mut sessions = self.write();
        let history = sessions.entry(session_id.to_string()).or_default();

        let kept = truncate(history, self.max_turns).len();
        if kept < history.len() {
            let dropped = history.len() - kept;
            history.drain(..dropped);
            tracing::debug!(session_id, dropped, kept, "Truncated session history");
        }
        history.clone()
    }

    /// Append a user/model pair under a single lock acquisition.
    pub fn commit(&self, session_id: &str, user: Turn, model: Turn) {
        let mut sessions = self.write();
        let history = sessions.entry(session_id.to_string()).or_default();
        history.reserve(2);
        history.push(user);
        history.push(model);
    }

    /// Remove a session entirely. Returns whether it existed.
    pub fn reset(&self, session_id: &str) -> bool {
        self.write().remove(session_id).is_some()
    }

    /// Whether a session currently exists.
    pub fn contains(&self, session_id: &str) -> bool {
        self.read().contains_key(session_id)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_creates_empty_session() {
        let store = HistoryStore::default();
        assert!(!store.contains("s1"));
        assert!(store.get("s1").is_empty());
        assert!(store.contains("s1"));
        assert!(store.get("s1").is_empty());
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn commit_appends_pair_in_order() {
        let store = HistoryStore::default();
        store.commit("s1", Turn::user("hi"), Turn::model("Hello"));
        assert_eq!(store.get("s1"), vec![Turn::user("hi"), Turn::model("Hello")]);

        store.commit("s1", Turn::user("again"), Turn::model("Sure"));
        let history = store.get("s1");
        assert_eq!(history.len(), 4);
        assert_eq!(history[2], Turn::user("again"));
    }

    #[test]
    fn sessions_are_independent() {
        let store = HistoryStore::default();
        store.commit("a", Turn::user("1"), Turn::model("2"));
        assert!(store.get("b").is_empty());
        assert_eq!(store.get("a").len(), 2);
    }

    #[test]
    fn reset_is_idempotent() {
        let store = HistoryStore::default();
        store.commit("s1", Turn::user("hi"), Turn::model("Hello"));

        assert!(store.reset("s1"));
        assert!(!store.reset("s1"));
        assert!(!store.reset("never-created"));
        assert!(!store.contains("s1"));
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn prune_bounds_stored_history() {
        let store = HistoryStore::new(2);
        for i in 0..5 {
            store.commit("s1", Turn::user(format!("q{i}")), Turn::model(format!("a{i}")));
        }
        assert_eq!(store.get("s1").len(), 10);

        let pruned = store.prune("s1");
        assert_eq!(pruned.len(), 4);
        assert_eq!(pruned[0], Turn::user("q3"));
        assert_eq!(store.get("s1"), pruned);
    }

    #[test]
    fn clones_share_state() {
        let store = HistoryStore::default();
        let other = store.clone();
        other.commit("s1", Turn::user("hi"), Turn::model("yo"));
        assert_eq!(store.get("s1").len(), 2);
    }

    #[test]
    fn concurrent_commits_are_not_lost() {
        let store = HistoryStore::new(1000);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.commit("shared", Turn::user(format!("{t}-{i}")), Turn::model("ok"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let history = store.get("shared");
        assert_eq!(history.len(), 8 * 50 * 2);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, crate::session::Role::User);
            assert_eq!(pair[1].role, crate::session::Role::Model);
        }
    }
}
