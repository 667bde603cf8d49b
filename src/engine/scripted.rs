//! In-memory engine that replays scripted turns
//!
//! Each call to `begin_turn` or `resume` consumes the next queued script.
//! The engine records every call and counts chunks actually pulled, so
//! tests can check exactly how far a turn read.

use super::{ChunkStream, EngineState, ExecutionEngine, ResumePayload, StreamChunks};
use crate::error::{Result, StreamError};
use crate::types::Decision;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// A call the engine received
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Begin { thread_id: String, state: EngineState },
    Resume { thread_id: String, decisions: Vec<Decision> },
}

#[derive(Debug, Clone)]
enum Step {
    Chunk(Value),
    Fail(String),
}

#[derive(Debug, Clone, Default)]
struct Script {
    steps: Vec<Step>,
    start_error: Option<String>,
}

#[derive(Default)]
struct Inner {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<EngineCall>>,
    pulled: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

/// Scripted in-memory engine
///
/// Cloning shares the script queue and counters.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    inner: Arc<Inner>,
    chunk_delay: Option<Duration>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long before yielding each chunk
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Queue a turn that yields `chunks` and then ends
    pub async fn push_turn(&self, chunks: Vec<Value>) {
        self.push(Script {
            steps: chunks.into_iter().map(Step::Chunk).collect(),
            start_error: None,
        })
        .await;
    }

    /// Queue a turn that yields `chunks` and then fails with `error`
    pub async fn push_failing_turn(&self, chunks: Vec<Value>, error: impl Into<String>) {
        let mut steps: Vec<Step> = chunks.into_iter().map(Step::Chunk).collect();
        steps.push(Step::Fail(error.into()));
        self.push(Script {
            steps,
            start_error: None,
        })
        .await;
    }

    /// Queue a turn the engine refuses to start
    pub async fn push_start_failure(&self, error: impl Into<String>) {
        self.push(Script {
            steps: Vec::new(),
            start_error: Some(error.into()),
        })
        .await;
    }

    /// Calls received so far
    pub async fn calls(&self) -> Vec<EngineCall> {
        self.inner.calls.lock().await.clone()
    }

    /// Chunks (and failures) handed out across all turns
    pub fn pulled(&self) -> usize {
        self.inner.pulled.load(Ordering::SeqCst)
    }

    /// Chunk streams dropped by their consumer
    pub fn released(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Scripts not yet consumed
    pub async fn remaining(&self) -> usize {
        self.inner.scripts.lock().await.len()
    }

    async fn push(&self, script: Script) {
        self.inner.scripts.lock().await.push_back(script);
    }

    async fn start(&self, call: EngineCall) -> Result<Box<dyn ChunkStream>> {
        self.inner.calls.lock().await.push(call);

        // An empty queue behaves like a turn with no output
        let script = self.inner.scripts.lock().await.pop_front().unwrap_or_default();
        if let Some(error) = script.start_error {
            return Err(StreamError::Engine(error));
        }

        let pulled = Arc::clone(&self.inner.pulled);
        let delay = self.chunk_delay;
        let stream: BoxStream<'static, Result<Value>> = futures::stream::iter(script.steps)
            .then(move |step| {
                let pulled = Arc::clone(&pulled);
                async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    pulled.fetch_add(1, Ordering::SeqCst);
                    match step {
                        Step::Chunk(chunk) => Ok(chunk),
                        Step::Fail(error) => Err(StreamError::Engine(error)),
                    }
                }
            })
            .boxed();

        Ok(Box::new(ScriptedChunks {
            inner: StreamChunks::new(stream),
            released: Arc::clone(&self.inner.released),
        }))
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn begin_turn(
        &self,
        thread_id: &str,
        state: EngineState,
    ) -> Result<Box<dyn ChunkStream>> {
        self.start(EngineCall::Begin {
            thread_id: thread_id.to_string(),
            state,
        })
        .await
    }

    async fn resume(
        &self,
        thread_id: &str,
        payload: ResumePayload,
    ) -> Result<Box<dyn ChunkStream>> {
        self.start(EngineCall::Resume {
            thread_id: thread_id.to_string(),
            decisions: payload.decisions,
        })
        .await
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedChunks {
    inner: StreamChunks<BoxStream<'static, Result<Value>>>,
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl ChunkStream for ScriptedChunks {
    async fn next(&mut self) -> Result<Option<Value>> {
        self.inner.next().await
    }
}

impl Drop for ScriptedChunks {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
