//! # a3s-agent-stream
//!
//! Turn streaming, approval interrupts, and event fanout for A3S agent
//! conversations.
//!
//! ## Overview
//!
//! `a3s-agent-stream` sits between an opaque execution engine that yields
//! loosely-shaped state chunks and the clients watching a conversation.
//! It turns chunks into ordered, typed events, pauses a turn when the
//! engine asks for human approval, and fans events out to every live
//! observer of the conversation.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_agent_stream::{ChannelObserver, ScriptedEngine, StreamConfig, StreamOrchestrator};
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_agent_stream::Result<()> {
//! let engine = ScriptedEngine::new();
//! engine.push_turn(vec![serde_json::json!({
//!     "model": {"messages": [{"role": "assistant", "content": "Your net worth is $1.2M"}]}
//! })]).await;
//!
//! let orchestrator = StreamOrchestrator::from_config(Arc::new(engine), StreamConfig::default())?;
//!
//! // Watch the conversation
//! let (observer, _frames) = ChannelObserver::channel(64);
//! orchestrator.registry().register("chat-1", observer).await;
//!
//! // Run a turn; events arrive on `_frames`
//! let report = orchestrator.send_message(Some("chat-1"), "What is my net worth?").await?;
//! println!("{:?}", report.outcome);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **SessionStore**: per-conversation history, working set, and pending interrupts
//! - **EventParser**: per-session translation of chunks into `AgentEvent`s
//! - **StreamOrchestrator**: drives one turn per session through an `ExecutionEngine`
//! - **ConnectionRegistry**: best-effort fanout to live `Observer`s
//! - **ExecutionEngine** trait: boundary to the engine; `ScriptedEngine` replays canned turns

pub mod approval;
pub mod chunk;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod parser;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod types;

// Re-export core types
pub use approval::{build_approval_items, check_decisions, ApprovalItem};
pub use chunk::{Chunk, NodeUpdate, StateUpdate};
pub use config::{OrchestratorConfig, ParserConfig, SeedFile, SessionConfig, StreamConfig};
pub use engine::{
    ChunkStream, EngineCall, EngineState, ExecutionEngine, ResumePayload, ScriptedEngine,
    StreamChunks,
};
pub use error::{Result, StreamError};
pub use event::{AgentEvent, SubagentStatus};
pub use orchestrator::{StreamOrchestrator, TurnOutcome, TurnReport, TurnRequest};
pub use parser::{truncate_result, EventParser};
pub use protocol::{ClientFrame, ServerFrame};
pub use registry::{ChannelObserver, ConnectionRegistry, Observer, ObserverId};
pub use session::{Session, SessionHandle, SessionInfo, SessionStore};
pub use types::{
    ActionRequest, Decision, DecisionKind, DecisionType, InterruptPayload, Message, ReviewConfig,
    Role, ToolInvocation,
};
