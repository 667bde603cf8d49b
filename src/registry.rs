//! Per-conversation fanout of events to live observers
//!
//! Delivery is best-effort: every observer gets its own attempt, and any
//! observer whose write fails or stalls past the send timeout is dropped
//! from the registry once the whole fanout has finished. Nothing is
//! replayed to observers that join later.

use crate::error::{Result, StreamError};
use crate::types::now_millis;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;

/// A live client watching a conversation
#[async_trait]
pub trait Observer: Send + Sync {
    /// Deliver one serialized frame
    async fn send(&self, frame: &str) -> Result<()>;
}

/// Registry-assigned observer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(uuid::Uuid);

impl ObserverId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How long one observer may take to accept a frame
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Observer backed by a bounded channel
///
/// Never waits for the reader: a full buffer or a dropped receiver fails
/// the send.
pub struct ChannelObserver {
    tx: mpsc::Sender<String>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Observer plus the stream of frames it receives
    pub fn channel(capacity: usize) -> (Self, ReceiverStream<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), ReceiverStream::new(rx))
    }
}

#[async_trait]
impl Observer for ChannelObserver {
    async fn send(&self, frame: &str) -> Result<()> {
        self.tx.try_send(frame.to_string()).map_err(|e| match e {
            TrySendError::Full(_) => StreamError::Delivery("observer channel full".to_string()),
            TrySendError::Closed(_) => {
                StreamError::Delivery("observer channel closed".to_string())
            }
        })
    }
}

#[derive(Default)]
struct Connections {
    /// conversation id → observers
    by_conversation: HashMap<String, HashMap<ObserverId, Arc<dyn Observer>>>,
    /// observer → conversation id
    owners: HashMap<ObserverId, String>,
}

/// Conversation id → live observers
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<Connections>>,
    send_timeout: Duration,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self {
            connections: Arc::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound on a single observer's send; slower observers are dropped
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Add an observer to a conversation
    pub async fn register(
        &self,
        conversation_id: &str,
        observer: impl Observer + 'static,
    ) -> ObserverId {
        let id = ObserverId::new();
        let mut conns = self.connections.write().await;
        conns
            .by_conversation
            .entry(conversation_id.to_string())
            .or_default()
            .insert(id, Arc::new(observer));
        conns.owners.insert(id, conversation_id.to_string());

        tracing::debug!(
            conversation_id = %conversation_id,
            observer = %id,
            "Observer registered"
        );
        id
    }

    /// Remove an observer from whichever conversation it watches
    ///
    /// Returns false if it was not registered.
    pub async fn unregister(&self, id: ObserverId) -> bool {
        let mut conns = self.connections.write().await;
        let Some(conversation_id) = conns.owners.remove(&id) else {
            return false;
        };

        if let Some(observers) = conns.by_conversation.get_mut(&conversation_id) {
            observers.remove(&id);
            if observers.is_empty() {
                conns.by_conversation.remove(&conversation_id);
            }
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            observer = %id,
            "Observer unregistered"
        );
        true
    }

    /// Deliver an event to every observer of a conversation
    ///
    /// Adds a `timestamp` (Unix ms) when the serialized event has none.
    /// Returns how many observers received it.
    pub async fn publish<T: Serialize>(&self, conversation_id: &str, event: &T) -> Result<usize> {
        let observers: Vec<(ObserverId, Arc<dyn Observer>)> = {
            let conns = self.connections.read().await;
            match conns.by_conversation.get(conversation_id) {
                Some(observers) => observers
                    .iter()
                    .map(|(id, o)| (*id, Arc::clone(o)))
                    .collect(),
                None => return Ok(0),
            }
        };

        let mut value = serde_json::to_value(event)?;
        if let serde_json::Value::Object(map) = &mut value {
            map.entry("timestamp")
                .or_insert_with(|| serde_json::Value::from(now_millis()));
        }
        let frame = serde_json::to_string(&value)?;

        let send_timeout = self.send_timeout;
        let results = futures::future::join_all(observers.iter().map(|(id, observer)| {
            let frame = frame.as_str();
            async move {
                let result = match tokio::time::timeout(send_timeout, observer.send(frame)).await {
                    Ok(result) => result,
                    Err(_) => Err(StreamError::Delivery("observer send timed out".to_string())),
                };
                (*id, result)
            }
        }))
        .await;

        let mut delivered = 0;
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        conversation_id = %conversation_id,
                        observer = %id,
                        error = %e,
                        "Dropping failed observer"
                    );
                    self.unregister(id).await;
                }
            }
        }

        Ok(delivered)
    }

    /// Publish arbitrary data as `{"type": event_type, "data": data}`
    pub async fn broadcast(
        &self,
        conversation_id: &str,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<usize> {
        self.publish(
            conversation_id,
            &serde_json::json!({ "type": event_type, "data": data }),
        )
        .await
    }

    /// Observers watching a conversation
    pub async fn connection_count(&self, conversation_id: &str) -> usize {
        self.connections
            .read()
            .await
            .by_conversation
            .get(conversation_id)
            .map_or(0, |o| o.len())
    }

    pub async fn is_connected(&self, conversation_id: &str) -> bool {
        self.connection_count(conversation_id).await > 0
    }

    /// Conversations with at least one observer
    pub async fn conversation_count(&self) -> usize {
        self.connections.read().await.by_conversation.len()
    }
}
