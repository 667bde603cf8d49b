//! Drives one session's turn through the execution engine
//!
//! A turn moves `Idle → Streaming → {InterruptPaused | Finished | Failed}`
//! (or `Cancelled`). Chunks are pulled one at a time; an interrupt stops
//! the turn immediately with a single approval request. At most one turn
//! runs per session: a second request is refused with `SessionBusy`.

use crate::approval::build_approval_items;
use crate::chunk::{Chunk, NodeUpdate};
use crate::config::StreamConfig;
use crate::engine::{ChunkStream, ExecutionEngine, ResumePayload};
use crate::error::{Result, StreamError};
use crate::event::AgentEvent;
use crate::protocol::{ClientFrame, ServerFrame};
use crate::registry::ConnectionRegistry;
use crate::session::{Session, SessionHandle, SessionStore};
use crate::types::{Decision, Message, Role};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The engine finished and `complete` was emitted
    Finished,
    /// The engine paused for approval of these actions
    InterruptPaused { actions: Vec<String> },
    /// The engine failed; one `error` event was emitted
    Failed { message: String },
    /// The turn was cancelled; nothing was emitted afterwards
    Cancelled,
}

/// Result of one turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReport {
    pub session_id: String,
    pub outcome: TurnOutcome,
    /// Events handed to the registry during the turn
    pub events_emitted: usize,
}

/// Input that starts a turn
#[derive(Debug, Clone)]
pub enum TurnRequest {
    /// A fresh user message; no id creates a new session
    Message {
        session_id: Option<String>,
        content: String,
    },
    /// Decisions for the session's pending interrupt
    Resume {
        session_id: String,
        decisions: Vec<Decision>,
    },
}

/// Turn orchestrator shared by all sessions
pub struct StreamOrchestrator {
    engine: Arc<dyn ExecutionEngine>,
    sessions: Arc<SessionStore>,
    registry: ConnectionRegistry,
    config: StreamConfig,

    /// session id → cancellation token of its running turn
    active: DashMap<String, CancellationToken>,
}

/// Removes a session's entry from the active map when the turn ends
struct ActiveTurn<'a> {
    active: &'a DashMap<String, CancellationToken>,
    session_id: String,
    token: CancellationToken,
}

impl Drop for ActiveTurn<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.session_id);
    }
}

impl StreamOrchestrator {
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        sessions: Arc<SessionStore>,
        registry: ConnectionRegistry,
        config: StreamConfig,
    ) -> Self {
        Self {
            engine,
            sessions,
            registry,
            config,
            active: DashMap::new(),
        }
    }

    /// Build an orchestrator with its own session store and registry
    pub fn from_config(engine: Arc<dyn ExecutionEngine>, config: StreamConfig) -> Result<Self> {
        config.validate()?;
        let sessions = Arc::new(SessionStore::new(config.session.clone()));
        Ok(Self::new(engine, sessions, ConnectionRegistry::new(), config))
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Run a fresh turn for a user message
    pub async fn send_message(
        &self,
        session_id: Option<&str>,
        content: &str,
    ) -> Result<TurnReport> {
        let handle = self.sessions.get_or_create(session_id).await;
        let id = handle.read().await.id.clone();
        let turn = self.begin(&id)?;

        let (thread_id, state) = {
            let mut session = handle.write().await;
            session.add_message(Message::user(content));
            let dropped = session.prune_history(self.sessions.config().max_turns);
            if dropped > 0 {
                tracing::debug!(session_id = %id, dropped, "History pruned");
            }
            (session.thread_id().to_string(), session.engine_state())
        };

        tracing::info!(session_id = %id, engine = %self.engine.name(), "Turn started");
        let stream = self.engine.begin_turn(&thread_id, state).await;
        self.drive(&handle, &turn, stream).await
    }

    /// Continue a paused turn with human decisions
    ///
    /// Pending interrupts stay on the session; use
    /// `Session::take_pending_interrupts` to clear them.
    pub async fn resume(&self, session_id: &str, decisions: Vec<Decision>) -> Result<TurnReport> {
        let handle = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| StreamError::SessionNotFound(session_id.to_string()))?;
        let turn = self.begin(session_id)?;

        let thread_id = {
            let mut session = handle.write().await;
            session.touch();
            session.thread_id().to_string()
        };

        tracing::info!(
            session_id = %session_id,
            decisions = decisions.len(),
            "Turn resumed"
        );
        let stream = self
            .engine
            .resume(&thread_id, ResumePayload { decisions })
            .await;
        self.drive(&handle, &turn, stream).await
    }

    /// Run a turn on the runtime
    pub fn spawn_turn(
        self: &Arc<Self>,
        request: TurnRequest,
    ) -> tokio::task::JoinHandle<Result<TurnReport>> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match request {
                TurnRequest::Message { session_id, content } => {
                    this.send_message(session_id.as_deref(), &content).await
                }
                TurnRequest::Resume {
                    session_id,
                    decisions,
                } => this.resume(&session_id, decisions).await,
            }
        })
    }

    /// Cancel a session's running turn; returns whether one was running
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.active.get(session_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(session_id = %session_id, "Turn cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Cancel every running turn; returns how many were signalled
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for entry in self.active.iter() {
            entry.value().cancel();
            count += 1;
        }
        if count > 0 {
            tracing::info!(count, "Cancelled all running turns");
        }
        count
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.active.contains_key(session_id)
    }

    /// Sessions with a running turn
    pub fn running_sessions(&self) -> Vec<String> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    /// Handle one client frame for `session_id`
    ///
    /// Returns the direct reply, if any. Turn events go through the registry.
    pub async fn handle_frame(&self, session_id: &str, frame: ClientFrame) -> Option<ServerFrame> {
        let result = match frame {
            ClientFrame::Ping => return Some(ServerFrame::pong()),
            ClientFrame::Message { content } => {
                let content = content.trim();
                if content.is_empty() {
                    return Some(ServerFrame::error("Empty message"));
                }
                self.send_message(Some(session_id), content).await
            }
            ClientFrame::Resume { decisions } => self.resume(session_id, decisions).await,
        };

        match result {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Frame rejected");
                Some(ServerFrame::error(e.to_string()))
            }
        }
    }

    /// Parse and handle a raw text frame
    pub async fn handle_text(&self, session_id: &str, text: &str) -> Option<ServerFrame> {
        match ClientFrame::parse(text) {
            Ok(frame) => self.handle_frame(session_id, frame).await,
            Err(reply) => Some(reply),
        }
    }

    fn begin(&self, session_id: &str) -> Result<ActiveTurn<'_>> {
        match self.active.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(StreamError::SessionBusy(session_id.to_string())),
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Ok(ActiveTurn {
                    active: &self.active,
                    session_id: session_id.to_string(),
                    token,
                })
            }
        }
    }

    /// Consume the engine stream until it ends, fails, pauses, or is cancelled
    async fn drive(
        &self,
        handle: &SessionHandle,
        turn: &ActiveTurn<'_>,
        stream: Result<Box<dyn ChunkStream>>,
    ) -> Result<TurnReport> {
        let session_id = turn.session_id.as_str();
        let token = &turn.token;
        let mut emitted = 0;

        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                let outcome = self.fail(session_id, token, &e, &mut emitted).await;
                return Ok(self.report(session_id, outcome, emitted));
            }
        };

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break TurnOutcome::Cancelled,
                next = stream.next() => next,
            };

            let raw = match next {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    let events = {
                        let mut session = handle.write().await;
                        let events = session.parser_mut(&self.config.parser).finalize();
                        session.reset_parser();
                        session.touch();
                        events
                    };
                    if !self.emit_all(session_id, token, events, &mut emitted).await {
                        break TurnOutcome::Cancelled;
                    }
                    break TurnOutcome::Finished;
                }
                Err(e) => break self.fail(session_id, token, &e, &mut emitted).await,
            };

            let chunk = Chunk::classify(raw, &self.config.orchestrator.interrupt_key);

            // Pause only when there is something to approve; an empty
            // interrupt could never be resumed
            let payloads = chunk.interrupts();
            let items = build_approval_items(&payloads);
            if !items.is_empty() {
                let actions: Vec<String> = items.iter().map(|i| i.name.clone()).collect();
                {
                    let mut session = handle.write().await;
                    session.pending_interrupts.extend(payloads);
                    session.touch();
                }
                tracing::info!(
                    session_id = %session_id,
                    actions = ?actions,
                    "Turn paused for approval"
                );
                let event = AgentEvent::approval_request(items);
                if !self.emit_all(session_id, token, vec![event], &mut emitted).await {
                    break TurnOutcome::Cancelled;
                }
                break TurnOutcome::InterruptPaused { actions };
            }
            if chunk.has_interrupt() {
                tracing::debug!(
                    session_id = %session_id,
                    "Ignoring interrupt without action requests"
                );
            }

            let events = {
                let mut session = handle.write().await;
                self.record_chunk(&mut session, &chunk);
                session.parser_mut(&self.config.parser).parse_chunk(&chunk)
            };
            if !self.emit_all(session_id, token, events, &mut emitted).await {
                break TurnOutcome::Cancelled;
            }
        };

        // Releases the engine's resources for this turn
        drop(stream);

        match &outcome {
            TurnOutcome::Finished => {
                tracing::info!(session_id = %session_id, events = emitted, "Turn finished")
            }
            TurnOutcome::Cancelled => {
                tracing::info!(session_id = %session_id, events = emitted, "Turn cancelled")
            }
            _ => {}
        }

        Ok(self.report(session_id, outcome, emitted))
    }

    /// Keep the session's history and working set in step with the engine
    ///
    /// Sub-task nodes run their own conversations and are not recorded.
    fn record_chunk(&self, session: &mut Session, chunk: &Chunk) {
        let prefix = self.config.parser.subagent_node_prefix.as_str();
        for (node, update) in chunk.entries() {
            let NodeUpdate::State(update) = update else {
                continue;
            };
            if let Some(files) = &update.files {
                session.update_files(files);
            }
            if node.starts_with(prefix) {
                continue;
            }
            for message in &update.messages {
                if message.role != Role::User {
                    session.messages.push(message.clone());
                }
            }
        }
        session.touch();
    }

    async fn fail(
        &self,
        session_id: &str,
        token: &CancellationToken,
        error: &StreamError,
        emitted: &mut usize,
    ) -> TurnOutcome {
        let message = match error {
            StreamError::Engine(message) => message.clone(),
            other => other.to_string(),
        };
        tracing::warn!(session_id = %session_id, error = %message, "Turn failed");

        let event = AgentEvent::error(
            message.clone(),
            self.config.orchestrator.error_details.clone(),
        );
        if !self.emit_all(session_id, token, vec![event], emitted).await {
            return TurnOutcome::Cancelled;
        }
        TurnOutcome::Failed { message }
    }

    /// Publish events in order; false once the turn has been cancelled
    async fn emit_all(
        &self,
        session_id: &str,
        token: &CancellationToken,
        events: Vec<AgentEvent>,
        emitted: &mut usize,
    ) -> bool {
        for event in events {
            if token.is_cancelled() {
                return false;
            }
            let published = tokio::select! {
                biased;
                _ = token.cancelled() => return false,
                published = self.registry.publish(session_id, &event) => published,
            };
            if let Err(e) = published {
                tracing::warn!(
                    session_id = %session_id,
                    event_type = event.event_type(),
                    error = %e,
                    "Failed to publish event"
                );
            }
            *emitted += 1;
        }
        !token.is_cancelled()
    }

    fn report(&self, session_id: &str, outcome: TurnOutcome, events_emitted: usize) -> TurnReport {
        TurnReport {
            session_id: session_id.to_string(),
            outcome,
            events_emitted,
        }
    }
}
