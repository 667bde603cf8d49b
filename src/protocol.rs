//! Frames exchanged with a connected chat client
//!
//! Clients send `ClientFrame`s; direct replies go back as `ServerFrame`s.
//! Turn events themselves reach clients through the connection registry.

use crate::types::{now_millis, Decision};
use serde::{Deserialize, Serialize};

/// A frame sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start a turn with a user message
    Message { content: String },
    /// Continue a paused turn with human decisions
    Resume { decisions: Vec<Decision> },
    /// Liveness check
    Ping,
}

/// A direct reply to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected {
        session_id: String,
        message: String,
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
    Error {
        error: String,
        timestamp: u64,
    },
}

impl ClientFrame {
    /// Parse a text frame, producing the error reply to send on failure
    pub fn parse(text: &str) -> std::result::Result<Self, ServerFrame> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|_| ServerFrame::error("Invalid JSON"))?;

        let frame_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("missing")
            .to_string();

        match frame_type.as_str() {
            "message" | "resume" | "ping" => serde_json::from_value(value)
                .map_err(|e| ServerFrame::error(format!("Malformed {} frame: {}", frame_type, e))),
            other => Err(ServerFrame::error(format!("Unknown message type: {}", other))),
        }
    }
}

impl ServerFrame {
    pub fn connected(session_id: impl Into<String>) -> Self {
        Self::Connected {
            session_id: session_id.into(),
            message: "Connected to chat".to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: now_millis(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            timestamp: now_millis(),
        }
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
