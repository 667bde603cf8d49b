//! Typed events delivered to conversation observers
//!
//! Every variant carries a Unix-millisecond `timestamp` and serializes with
//! a snake_case `type` tag, e.g. `{"type":"tool_call","tool_name":...}`.

use crate::approval::ApprovalItem;
use crate::types::now_millis;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a spawned sub-task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubagentStatus {
    /// The task call was seen; the sub-task has not reported yet
    Spawning,
}

/// An event produced while streaming one agent turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A graph node produced a state update
    Thinking { node: String, timestamp: u64 },

    /// The assistant invoked a tool
    ToolCall {
        tool_name: String,
        args: serde_json::Value,
        tool_call_id: String,
        is_subagent_spawn: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subagent_name: Option<String>,
        timestamp: u64,
    },

    /// A tool returned (possibly truncated) output
    ToolResult {
        tool_name: String,
        result: String,
        tool_call_id: String,
        success: bool,
        timestamp: u64,
    },

    /// Files in the working set changed
    FileUpdate { paths: Vec<String>, timestamp: u64 },

    /// The todo list was replaced
    TodoUpdate {
        todos: Vec<serde_json::Value>,
        timestamp: u64,
    },

    /// User-visible assistant answer
    Message { content: String, timestamp: u64 },

    /// A sub-task was delegated
    SubagentSpawn {
        name: String,
        description: String,
        status: SubagentStatus,
        timestamp: u64,
    },

    /// A sub-task finished
    SubagentComplete { name: String, timestamp: u64 },

    /// The engine paused for human approval
    ApprovalRequest {
        action_requests: Vec<ApprovalItem>,
        timestamp: u64,
    },

    /// The turn finished normally
    Complete { timestamp: u64 },

    /// The turn failed
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        timestamp: u64,
    },
}

impl AgentEvent {
    pub fn thinking(node: impl Into<String>) -> Self {
        Self::Thinking {
            node: node.into(),
            timestamp: now_millis(),
        }
    }

    pub fn tool_call(
        tool_name: impl Into<String>,
        args: serde_json::Value,
        tool_call_id: impl Into<String>,
        subagent_name: Option<String>,
    ) -> Self {
        Self::ToolCall {
            tool_name: tool_name.into(),
            args,
            tool_call_id: tool_call_id.into(),
            is_subagent_spawn: subagent_name.is_some(),
            subagent_name,
            timestamp: now_millis(),
        }
    }

    pub fn tool_result(
        tool_name: impl Into<String>,
        result: impl Into<String>,
        tool_call_id: impl Into<String>,
        success: bool,
    ) -> Self {
        Self::ToolResult {
            tool_name: tool_name.into(),
            result: result.into(),
            tool_call_id: tool_call_id.into(),
            success,
            timestamp: now_millis(),
        }
    }

    pub fn file_update(paths: Vec<String>) -> Self {
        Self::FileUpdate {
            paths,
            timestamp: now_millis(),
        }
    }

    pub fn todo_update(todos: Vec<serde_json::Value>) -> Self {
        Self::TodoUpdate {
            todos,
            timestamp: now_millis(),
        }
    }

    pub fn message(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
            timestamp: now_millis(),
        }
    }

    pub fn subagent_spawn(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::SubagentSpawn {
            name: name.into(),
            description: description.into(),
            status: SubagentStatus::Spawning,
            timestamp: now_millis(),
        }
    }

    pub fn subagent_complete(name: impl Into<String>) -> Self {
        Self::SubagentComplete {
            name: name.into(),
            timestamp: now_millis(),
        }
    }

    pub fn approval_request(action_requests: Vec<ApprovalItem>) -> Self {
        Self::ApprovalRequest {
            action_requests,
            timestamp: now_millis(),
        }
    }

    pub fn complete() -> Self {
        Self::Complete {
            timestamp: now_millis(),
        }
    }

    pub fn error(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            details: Some(details.into()),
            timestamp: now_millis(),
        }
    }

    /// Wire tag of this event
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::FileUpdate { .. } => "file_update",
            Self::TodoUpdate { .. } => "todo_update",
            Self::Message { .. } => "message",
            Self::SubagentSpawn { .. } => "subagent_spawn",
            Self::SubagentComplete { .. } => "subagent_complete",
            Self::ApprovalRequest { .. } => "approval_request",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// Creation time in Unix milliseconds
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Thinking { timestamp, .. }
            | Self::ToolCall { timestamp, .. }
            | Self::ToolResult { timestamp, .. }
            | Self::FileUpdate { timestamp, .. }
            | Self::TodoUpdate { timestamp, .. }
            | Self::Message { timestamp, .. }
            | Self::SubagentSpawn { timestamp, .. }
            | Self::SubagentComplete { timestamp, .. }
            | Self::ApprovalRequest { timestamp, .. }
            | Self::Complete { timestamp }
            | Self::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Whether this event ends a turn
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Error { .. } | Self::ApprovalRequest { .. }
        )
    }
}
