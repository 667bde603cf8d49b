//! Core conversation and approval types
//!
//! Wire names follow the engine's snake_case conventions. Deserialization
//! is lenient where engines are known to vary (role aliases, non-string
//! content, missing argument maps).

use serde::{Deserialize, Deserializer, Serialize};

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human input
    #[serde(alias = "human")]
    User,
    /// Model output
    #[serde(alias = "ai")]
    Assistant,
    /// Tool execution result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A tool invocation requested by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool name
    #[serde(default)]
    pub name: String,

    /// Tool arguments
    #[serde(default = "empty_object")]
    pub args: serde_json::Value,

    /// Correlation id echoed back by the matching tool result
    #[serde(default)]
    pub id: String,
}

impl ToolInvocation {
    /// Create an invocation
    pub fn new(
        name: impl Into<String>,
        args: serde_json::Value,
        id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            args,
            id: id.into(),
        }
    }

    /// String argument by key, empty when missing or not a string
    pub fn str_arg(&self, key: &str) -> String {
        self.args
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

/// A single conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message author
    #[serde(alias = "type")]
    pub role: Role,

    /// Text content
    #[serde(default, deserialize_with = "content_text")]
    pub content: String,

    /// Tool invocations (assistant messages only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,

    /// Originating tool call (tool messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool name (tool messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    /// A user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// An assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// An assistant message that invokes tools
    pub fn assistant_with_tools(tool_calls: Vec<ToolInvocation>) -> Self {
        Self {
            tool_calls,
            ..Self::assistant("")
        }
    }

    /// A tool result message
    pub fn tool(
        name: impl Into<String>,
        content: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }

    /// Whether this is a user message
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// Accept string content as-is and render anything else as JSON text
fn content_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Decision a human may take on a pending action
///
/// Serialized as a plain string. Names other than the three built-in
/// decisions are carried through unchanged as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DecisionType {
    /// Run the action as requested
    Approve,
    /// Run the action with edited arguments
    Edit,
    /// Do not run the action
    Reject,
    /// An engine-specific decision, e.g. `respond`
    Other(String),
}

impl DecisionType {
    /// Decision set used when no review config names the action
    pub fn default_allowed() -> Vec<DecisionType> {
        vec![DecisionType::Approve, DecisionType::Reject]
    }
}

impl From<&str> for DecisionType {
    fn from(s: &str) -> Self {
        match s {
            "approve" => DecisionType::Approve,
            "edit" => DecisionType::Edit,
            "reject" => DecisionType::Reject,
            other => DecisionType::Other(other.to_string()),
        }
    }
}

impl From<String> for DecisionType {
    fn from(s: String) -> Self {
        DecisionType::from(s.as_str())
    }
}

impl From<DecisionType> for String {
    fn from(d: DecisionType) -> Self {
        d.to_string()
    }
}

impl std::fmt::Display for DecisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionType::Approve => write!(f, "approve"),
            DecisionType::Edit => write!(f, "edit"),
            DecisionType::Reject => write!(f, "reject"),
            DecisionType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A sensitive action the engine wants a human to review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Action (tool) name
    pub name: String,

    /// Action arguments
    #[serde(default = "empty_object")]
    pub args: serde_json::Value,

    /// Optional human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Review policy for one action name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Action this config applies to
    pub action_name: String,

    /// Decisions a human may take
    pub allowed_decisions: Vec<DecisionType>,
}

/// One interrupt reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterruptPayload {
    /// Actions awaiting a decision
    #[serde(default)]
    pub action_requests: Vec<ActionRequest>,

    /// Review policies for those actions
    #[serde(default)]
    pub review_configs: Vec<ReviewConfig>,
}

impl InterruptPayload {
    /// Build a payload from a loosely-shaped engine value
    ///
    /// Accepts the payload itself or a `{"value": payload}` wrapper.
    /// Entries that cannot be read (missing names, non-object items) are
    /// dropped.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let data = match value.get("value") {
            Some(inner) if inner.is_object() => inner,
            _ => value,
        };

        let action_requests = data
            .get("action_requests")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        let review_configs = data
            .get("review_configs")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(review_config_from_value).collect())
            .unwrap_or_default();

        Self {
            action_requests,
            review_configs,
        }
    }
}

fn review_config_from_value(value: &serde_json::Value) -> Option<ReviewConfig> {
    let action_name = value.get("action_name")?.as_str()?;
    if action_name.is_empty() {
        return None;
    }
    // Listed decisions pass through as-is; only a missing list gets the default
    let allowed_decisions = match value.get("allowed_decisions") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|d| d.as_str())
            .map(DecisionType::from)
            .collect(),
        _ => DecisionType::default_allowed(),
    };

    Some(ReviewConfig {
        action_name: action_name.to_string(),
        allowed_decisions,
    })
}

/// The choice made for one decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DecisionKind {
    /// Run the action as requested
    Approve,
    /// Run the action with replacement arguments
    Edit {
        /// The action to run instead
        edited_action: ActionRequest,
    },
    /// Skip the action
    Reject {
        /// Optional explanation passed back to the model
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// A human decision resolving one pending action request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Action the decision resolves; positional matching applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// The chosen decision
    #[serde(flatten)]
    pub kind: DecisionKind,
}

impl Decision {
    /// Approve an action
    pub fn approve(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            kind: DecisionKind::Approve,
        }
    }

    /// Reject an action with an optional explanation
    pub fn reject(action: impl Into<String>, message: Option<String>) -> Self {
        Self {
            action: Some(action.into()),
            kind: DecisionKind::Reject { message },
        }
    }

    /// Replace an action's arguments
    pub fn edit(action: impl Into<String>, edited_action: ActionRequest) -> Self {
        Self {
            action: Some(action.into()),
            kind: DecisionKind::Edit { edited_action },
        }
    }

    /// Decision type of this decision
    pub fn decision_type(&self) -> DecisionType {
        match self.kind {
            DecisionKind::Approve => DecisionType::Approve,
            DecisionKind::Edit { .. } => DecisionType::Edit,
            DecisionKind::Reject { .. } => DecisionType::Reject,
        }
    }
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
