//! Per-conversation state and the store that owns it
//!
//! `SessionStore` hands out `Arc<RwLock<Session>>` handles so independent
//! sessions never contend. Idle sessions are evicted by a lazy sweep that
//! runs on every store access rather than by a background reaper, so an
//! abandoned session stays resident until some other access happens.

use crate::config::{ParserConfig, SeedFile, SessionConfig};
use crate::engine::EngineState;
use crate::error::{Result, StreamError};
use crate::parser::EventParser;
use crate::types::{InterruptPayload, Message};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared handle to one session
pub type SessionHandle = Arc<RwLock<Session>>;

/// One conversation
#[derive(Debug)]
pub struct Session {
    /// Session id, also the engine checkpoint thread id
    pub id: String,

    /// Conversation history, oldest first
    pub messages: Vec<Message>,

    /// Working set visible to the engine (virtual path → file value)
    pub files: Map<String, Value>,

    /// Interrupts reported by the engine, oldest first
    pub pending_interrupts: Vec<InterruptPayload>,

    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,

    /// Parser for the current turn; created lazily, dropped when a turn finishes
    parser: Option<EventParser>,
}

/// Summary of a session for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            files: Map::new(),
            pending_interrupts: Vec::new(),
            created_at: now,
            last_activity: now,
            parser: None,
        }
    }

    /// Id the engine uses to checkpoint this conversation
    pub fn thread_id(&self) -> &str {
        &self.id
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Keep only the last `max_turns` turns
    ///
    /// A turn starts at a user message and runs until the next one. The
    /// latest turn is always kept, so a limit of 0 behaves like 1.
    /// Returns the number of messages dropped.
    pub fn prune_history(&mut self, max_turns: usize) -> usize {
        let max_turns = max_turns.max(1);
        let turn_starts: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_user())
            .map(|(i, _)| i)
            .collect();

        if turn_starts.len() <= max_turns {
            return 0;
        }

        let start = turn_starts[turn_starts.len() - max_turns];
        self.messages.drain(..start);
        start
    }

    /// Merge files reported by the engine into the working set
    pub fn update_files(&mut self, files: &Map<String, Value>) {
        for (path, value) in files {
            self.files.insert(path.clone(), value.clone());
        }
    }

    /// Full state handed to the engine at the start of a fresh turn
    pub fn engine_state(&self) -> EngineState {
        EngineState {
            messages: self.messages.clone(),
            files: self.files.clone(),
        }
    }

    /// Remove and return all pending interrupts
    pub fn take_pending_interrupts(&mut self) -> Vec<InterruptPayload> {
        std::mem::take(&mut self.pending_interrupts)
    }

    /// Reset history, working set, and pending interrupts in place
    pub fn clear(&mut self) {
        self.messages.clear();
        self.files.clear();
        self.pending_interrupts.clear();
        self.touch();
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            message_count: self.messages.len(),
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }

    /// The session's parser, created on first use
    pub fn parser_mut(&mut self, config: &ParserConfig) -> &mut EventParser {
        self.parser
            .get_or_insert_with(|| EventParser::new(config.clone()))
    }

    pub fn has_parser(&self) -> bool {
        self.parser.is_some()
    }

    /// Drop the parser so the next turn starts with fresh sub-task state
    pub fn reset_parser(&mut self) {
        self.parser = None;
    }

    fn idle_longer_than(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_activity) > timeout
    }
}

/// Store of all live sessions
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
    config: SessionConfig,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Return the session for `id`, creating it if needed
    ///
    /// With no id a fresh one is generated. An unknown id is adopted as-is.
    /// A known session has its activity timestamp refreshed.
    pub async fn get_or_create(&self, id: Option<&str>) -> SessionHandle {
        self.evict_idle().await;

        if let Some(id) = id {
            let existing = self.sessions.read().await.get(id).cloned();
            if let Some(handle) = existing {
                handle.write().await.touch();
                return handle;
            }
        }

        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut session = Session::new(id.clone());
        seed_files(&mut session, &self.config.seed_files).await;
        let handle = Arc::new(RwLock::new(session));

        let mut sessions = self.sessions.write().await;
        // Another caller may have created it while seed files were read
        match sessions.entry(id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                tracing::info!(session_id = %entry.key(), "Session created");
                entry.insert(handle).clone()
            }
        }
    }

    /// Look up a session without creating it
    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.evict_idle().await;
        self.sessions.read().await.get(id).cloned()
    }

    /// Reset a session's history, files, and pending interrupts in place
    pub async fn clear(&self, id: &str) -> Result<()> {
        let handle = self
            .get(id)
            .await
            .ok_or_else(|| StreamError::SessionNotFound(id.to_string()))?;
        handle.write().await.clear();
        tracing::debug!(session_id = %id, "Session cleared");
        Ok(())
    }

    /// Remove a session entirely; returns whether it existed
    pub async fn delete(&self, id: &str) -> bool {
        self.evict_idle().await;
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            tracing::info!(session_id = %id, "Session deleted");
        }
        removed
    }

    /// Metadata for every live session, oldest first
    pub async fn list(&self) -> Vec<SessionInfo> {
        self.evict_idle().await;
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();

        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            infos.push(handle.read().await.info());
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Number of live sessions, without sweeping
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove sessions idle longer than the configured timeout
    ///
    /// Sessions currently locked by a writer are in use and are skipped.
    /// Returns the number of sessions evicted.
    pub async fn evict_idle(&self) -> usize {
        let timeout = chrono::Duration::seconds(
            i64::try_from(self.config.idle_timeout_secs).unwrap_or(i64::MAX),
        );
        let now = Utc::now();

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, handle| {
            let idle = match handle.try_read() {
                Ok(session) => session.idle_longer_than(now, timeout),
                Err(_) => false,
            };
            if idle {
                tracing::info!(session_id = %id, "Evicting idle session");
            }
            !idle
        });
        before - sessions.len()
    }
}

async fn seed_files(session: &mut Session, seeds: &[SeedFile]) {
    for seed in seeds {
        match tokio::fs::read_to_string(&seed.source).await {
            Ok(content) => {
                session.files.insert(
                    seed.virtual_path.clone(),
                    serde_json::json!({ "content": content }),
                );
            }
            Err(e) => {
                tracing::debug!(
                    session_id = %session.id,
                    path = %seed.source.display(),
                    error = %e,
                    "Seed file unavailable, skipping"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn turns(n: usize, replies: usize) -> Vec<Message> {
        let mut messages = Vec::new();
        for t in 0..n {
            messages.push(Message::user(format!("q{}", t + 1)));
            for r in 0..replies {
                messages.push(Message::assistant(format!("a{}-{}", t + 1, r)));
            }
        }
        messages
    }

    #[test]
    fn test_prune_keeps_last_turns() {
        let mut session = Session::new("s");
        session.messages = turns(6, 2);
        let dropped = session.prune_history(5);
        assert_eq!(dropped, 3);
        assert_eq!(session.messages[0].content, "q2");
        assert_eq!(session.messages.iter().filter(|m| m.is_user()).count(), 5);
    }

    #[test]
    fn test_prune_turns_without_replies() {
        let mut session = Session::new("s");
        session.messages = turns(6, 0);
        session.prune_history(5);
        assert_eq!(session.messages.len(), 5);
        assert_eq!(session.messages[0].content, "q2");
    }

    #[test]
    fn test_prune_uneven_turns() {
        let mut session = Session::new("s");
        session.messages = vec![
            Message::user("q1"),
            Message::assistant("a1"),
            Message::tool("calc", "4", "c1"),
            Message::user("q2"),
            Message::user("q3"),
            Message::assistant("a3"),
        ];
        session.prune_history(2);
        let contents: Vec<_> = session.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q2", "q3", "a3"]);
    }

    #[test]
    fn test_prune_within_limit_is_noop() {
        let mut session = Session::new("s");
        session.messages = turns(5, 1);
        assert_eq!(session.prune_history(5), 0);
        assert_eq!(session.messages.len(), 10);
    }

    #[test]
    fn test_prune_zero_keeps_latest_turn() {
        let mut session = Session::new("s");
        session.messages = turns(3, 1);
        assert_eq!(session.prune_history(0), 4);
        let contents: Vec<_> = session.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q3", "a3-0"]);

        // A lone user message survives too
        let mut session = Session::new("s");
        session.add_message(Message::user("only"));
        assert_eq!(session.prune_history(0), 0);
        assert_eq!(session.messages.len(), 1);
    }

    #[test]
    fn test_clear_and_parser_lifecycle() {
        let mut session = Session::new("s");
        session.add_message(Message::user("hi"));
        session.files.insert("/a".into(), serde_json::json!({}));
        session.pending_interrupts.push(InterruptPayload::default());

        session.parser_mut(&ParserConfig::default());
        assert!(session.has_parser());

        session.clear();
        assert!(session.messages.is_empty());
        assert!(session.files.is_empty());
        assert!(session.pending_interrupts.is_empty());

        session.reset_parser();
        assert!(!session.has_parser());
    }

    #[test]
    fn test_engine_state_and_thread_id() {
        let mut session = Session::new("thread-7");
        session.add_message(Message::user("What is my net worth?"));
        session.update_files(&serde_json::from_str(r#"{"/notes.md": {"content": "x"}}"#).unwrap());

        let state = session.engine_state();
        assert_eq!(session.thread_id(), "thread-7");
        assert_eq!(state.messages.len(), 1);
        assert!(state.files.contains_key("/notes.md"));
    }

    #[tokio::test]
    async fn test_get_or_create_generates_id() {
        let store = SessionStore::default();
        let a = store.get_or_create(None).await;
        let b = store.get_or_create(None).await;
        assert_ne!(a.read().await.id, b.read().await.id);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_get_or_create_adopts_unknown_id() {
        let store = SessionStore::default();
        let handle = store.get_or_create(Some("client-chosen")).await;
        assert_eq!(handle.read().await.id, "client-chosen");

        let again = store.get_or_create(Some("client-chosen")).await;
        assert!(Arc::ptr_eq(&handle, &again));
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_shares_one_session() {
        let store = SessionStore::default();
        let handles = futures::future::join_all(
            (0..8).map(|_| store.get_or_create(Some("shared"))),
        )
        .await;

        assert_eq!(store.len().await, 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    }

    #[tokio::test]
    async fn test_get_or_create_refreshes_activity() {
        let store = SessionStore::default();
        let handle = store.get_or_create(Some("s")).await;
        let first = handle.read().await.last_activity;
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.get_or_create(Some("s")).await;
        assert!(handle.read().await.last_activity > first);
    }

    #[tokio::test]
    async fn test_lazy_eviction() {
        let store = SessionStore::new(SessionConfig {
            idle_timeout_secs: 0,
            ..Default::default()
        });
        store.get_or_create(Some("old")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        store.get_or_create(Some("new")).await;
        assert!(store.get("old").await.is_none());
    }

    #[tokio::test]
    async fn test_eviction_skips_locked_sessions() {
        let store = SessionStore::new(SessionConfig {
            idle_timeout_secs: 0,
            ..Default::default()
        });
        let handle = store.get_or_create(Some("busy")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let guard = handle.write().await;
        assert_eq!(store.evict_idle().await, 0);
        drop(guard);
        assert_eq!(store.evict_idle().await, 1);
    }

    #[tokio::test]
    async fn test_clear_preserves_identity() {
        let store = SessionStore::default();
        let handle = store.get_or_create(Some("s")).await;
        handle.write().await.add_message(Message::user("hi"));

        store.clear("s").await.unwrap();
        let again = store.get("s").await.unwrap();
        assert!(Arc::ptr_eq(&handle, &again));
        assert!(again.read().await.messages.is_empty());
    }

    #[tokio::test]
    async fn test_clear_unknown_session() {
        let store = SessionStore::default();
        let err = store.clear("missing").await.unwrap_err();
        assert!(matches!(err, StreamError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = SessionStore::default();
        store.get_or_create(Some("s")).await;
        assert!(store.delete("s").await);
        assert!(!store.delete("s").await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let store = SessionStore::default();
        let a = store.get_or_create(Some("a")).await;
        a.write().await.add_message(Message::user("hi"));
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.get_or_create(Some("b")).await;

        let infos = store.list().await;
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].session_id, "a");
        assert_eq!(infos[0].message_count, 1);
        assert_eq!(infos[1].message_count, 0);
    }

    #[tokio::test]
    async fn test_seed_files() {
        let dir = std::env::temp_dir().join(format!("a3s-seed-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let source = dir.join("portfolio.json");
        std::fs::write(&source, r#"{"holdings": []}"#).unwrap();

        let store = SessionStore::new(SessionConfig {
            seed_files: vec![
                SeedFile {
                    virtual_path: "/financial_data/portfolio.json".into(),
                    source,
                },
                SeedFile {
                    virtual_path: "/missing.json".into(),
                    source: dir.join("missing.json"),
                },
            ],
            ..Default::default()
        });

        let handle = store.get_or_create(None).await;
        let session = handle.read().await;
        assert_eq!(
            session.files["/financial_data/portfolio.json"]["content"],
            r#"{"holdings": []}"#
        );
        assert!(!session.files.contains_key("/missing.json"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
