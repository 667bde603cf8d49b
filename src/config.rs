//! Configuration for sessions, chunk parsing, and turn orchestration
//!
//! All sections deserialize from camelCase JSON and fall back to defaults
//! for missing fields, so an empty object is a valid configuration.

use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// Session store settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Event parser settings
    #[serde(default)]
    pub parser: ParserConfig,

    /// Turn orchestration settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl StreamConfig {
    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            StreamError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: StreamConfig = serde_json::from_str(&json).map_err(|e| {
            StreamError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;
        tracing::debug!(path = %path.display(), "Stream config loaded");
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.session.max_turns == 0 {
            return Err(StreamError::Config("session.maxTurns must be at least 1".into()));
        }
        if self.parser.max_tool_result_chars == 0 {
            return Err(StreamError::Config(
                "parser.maxToolResultChars must be at least 1".into(),
            ));
        }
        if self.parser.subagent_node_prefix.is_empty() {
            return Err(StreamError::Config("parser.subagentNodePrefix is empty".into()));
        }
        if self.parser.delegate_tool.is_empty() {
            return Err(StreamError::Config("parser.delegateTool is empty".into()));
        }
        if self.orchestrator.interrupt_key.is_empty() {
            return Err(StreamError::Config("orchestrator.interruptKey is empty".into()));
        }
        Ok(())
    }
}

/// A file copied into every new session's working set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedFile {
    /// Path the engine sees (e.g. `/financial_data/portfolio.json`)
    pub virtual_path: String,

    /// Path on local disk to read the content from
    pub source: PathBuf,
}

/// Session store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Seconds of inactivity before a session is evicted (default: 24 h)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Conversation turns kept when history is pruned (default: 5)
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Files seeded into each new session
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seed_files: Vec<SeedFile>,
}

fn default_idle_timeout() -> u64 {
    24 * 60 * 60
}

fn default_max_turns() -> usize {
    5
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            max_turns: default_max_turns(),
            seed_files: Vec::new(),
        }
    }
}

/// Event parser settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParserConfig {
    /// Node identifier prefix that marks a sub-task invocation
    #[serde(default = "default_subagent_prefix")]
    pub subagent_node_prefix: String,

    /// Tool name that delegates work to a sub-task
    #[serde(default = "default_delegate_tool")]
    pub delegate_tool: String,

    /// Tool result text longer than this is truncated
    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,
}

fn default_subagent_prefix() -> String {
    "task:".to_string()
}

fn default_delegate_tool() -> String {
    "task".to_string()
}

fn default_max_tool_result_chars() -> usize {
    1000
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            subagent_node_prefix: default_subagent_prefix(),
            delegate_tool: default_delegate_tool(),
            max_tool_result_chars: default_max_tool_result_chars(),
        }
    }
}

/// Turn orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Chunk key under which the engine reports interrupts
    #[serde(default = "default_interrupt_key")]
    pub interrupt_key: String,

    /// `details` text attached to error events
    #[serde(default = "default_error_details")]
    pub error_details: String,
}

fn default_interrupt_key() -> String {
    "__interrupt__".to_string()
}

fn default_error_details() -> String {
    "Error during agent execution".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            interrupt_key: default_interrupt_key(),
            error_details: default_error_details(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.session.max_turns, 5);
        assert_eq!(config.session.idle_timeout_secs, 86_400);
        assert_eq!(config.parser.subagent_node_prefix, "task:");
        assert_eq!(config.parser.delegate_tool, "task");
        assert_eq!(config.parser.max_tool_result_chars, 1000);
        assert_eq!(config.orchestrator.interrupt_key, "__interrupt__");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: StreamConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.session.max_turns, 5);
        assert_eq!(config.orchestrator.error_details, "Error during agent execution");
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{
            "session": { "maxTurns": 3, "seedFiles": [
                { "virtualPath": "/financial_data/portfolio.json", "source": "portfolio.json" }
            ] },
            "parser": { "maxToolResultChars": 200 }
        }"#;
        let config: StreamConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.session.max_turns, 3);
        assert_eq!(config.session.idle_timeout_secs, 86_400);
        assert_eq!(config.session.seed_files.len(), 1);
        assert_eq!(config.parser.max_tool_result_chars, 200);
        assert_eq!(config.parser.delegate_tool, "task");
    }

    #[test]
    fn test_validate_rejects_zero_turns() {
        let mut config = StreamConfig::default();
        config.session.max_turns = 0;
        assert!(matches!(config.validate(), Err(StreamError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_interrupt_key() {
        let mut config = StreamConfig::default();
        config.orchestrator.interrupt_key.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = std::env::temp_dir().join(format!("a3s-stream-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stream.json");
        std::fs::write(&path, r#"{"session":{"idleTimeoutSecs":60}}"#).unwrap();

        let config = StreamConfig::from_file(&path).unwrap();
        assert_eq!(config.session.idle_timeout_secs, 60);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_from_file_missing() {
        let result = StreamConfig::from_file("/tmp/nonexistent-a3s-stream.json");
        assert!(matches!(result, Err(StreamError::Config(_))));
    }
}
