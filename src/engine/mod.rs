//! Execution engine boundary
//!
//! The engine is a black box: it takes conversation state (or human
//! decisions) and yields raw JSON chunks. Implement `ExecutionEngine` to
//! plug a real engine in; `ScriptedEngine` replays canned chunks for tests.

use crate::error::Result;
use crate::types::{Decision, Message};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod scripted;

pub use scripted::{EngineCall, ScriptedEngine};

/// Conversation state handed to the engine for a fresh turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub messages: Vec<Message>,
    pub files: Map<String, Value>,
}

/// Human decisions handed to the engine to continue a paused turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub decisions: Vec<Decision>,
}

/// An engine that executes agent turns
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Start a turn from the given state
    ///
    /// `thread_id` identifies the conversation for engine checkpointing.
    async fn begin_turn(&self, thread_id: &str, state: EngineState) -> Result<Box<dyn ChunkStream>>;

    /// Continue the turn paused at the last interrupt for `thread_id`
    async fn resume(&self, thread_id: &str, payload: ResumePayload) -> Result<Box<dyn ChunkStream>>;

    /// Engine name for logs
    fn name(&self) -> &str;
}

/// Pull-based sequence of raw chunks
///
/// Each call pulls exactly one chunk. Dropping the stream releases the
/// engine's resources for the turn.
#[async_trait]
pub trait ChunkStream: Send {
    /// Next raw chunk, `None` once the engine is done
    async fn next(&mut self) -> Result<Option<Value>>;
}

/// Adapt any `futures::Stream` of chunk results into a `ChunkStream`
pub struct StreamChunks<S> {
    inner: S,
}

impl<S> StreamChunks<S>
where
    S: Stream<Item = Result<Value>> + Send + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> ChunkStream for StreamChunks<S>
where
    S: Stream<Item = Result<Value>> + Send + Unpin,
{
    async fn next(&mut self) -> Result<Option<Value>> {
        self.inner.next().await.transpose()
    }
}
