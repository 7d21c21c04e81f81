//! Conversation identity per caller session.

use std::collections::HashMap;

use async_trait::async_trait;
use envoy_common::new_id;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// Identity carried by every delegation made on behalf of one session.
///
/// `task_id` and `context_id` are generated once when the session is first
/// seen and reused for every later turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    pub task_id: String,
    pub context_id: String,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            task_id: new_id(),
            context_id: new_id(),
        }
    }
}

/// Keyed store of conversation state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Return the state for `session_id`, creating it atomically on first use.
    async fn get_or_create(&self, session_id: &str) -> ConversationState;

    async fn get(&self, session_id: &str) -> Option<ConversationState>;

    async fn len(&self) -> usize;
}

/// Process-local session store. State lives as long as the process.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, ConversationState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, session_id: &str) -> ConversationState {
        if let Some(state) = self.sessions.read().await.get(session_id) {
            return state.clone();
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id = %session_id, "Created conversation state");
                ConversationState::new(session_id)
            })
            .clone()
    }

    async fn get(&self, session_id: &str) -> Option<ConversationState> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn ids_are_stable_across_turns() {
        let store = InMemorySessionStore::new();
        let first = store.get_or_create("s1").await;
        let second = store.get_or_create("s1").await;
        assert_eq!(first, second);
        assert_eq!(first.session_id, "s1");
        assert_ne!(first.task_id, first.context_id);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let store = InMemorySessionStore::new();
        let a = store.get_or_create("a").await;
        let b = store.get_or_create("b").await;
        assert_ne!(a.task_id, b.task_id);
        assert_eq!(store.len().await, 2);
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_first_use_creates_once() {
        let store = Arc::new(InMemorySessionStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.get_or_create("shared").await })
            })
            .collect();

        let states: Vec<ConversationState> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert!(states.iter().all(|s| s == &states[0]));
        assert_eq!(store.len().await, 1);
    }
}
