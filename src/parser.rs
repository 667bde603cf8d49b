//! Stateful translation of classified chunks into observer events
//!
//! One `EventParser` exists per session. It remembers which sub-tasks have
//! been seen so `finalize` can close each of them exactly once.

use crate::chunk::{Chunk, NodeUpdate, StateUpdate};
use crate::config::ParserConfig;
use crate::event::AgentEvent;
use crate::types::{Message, Role};
use std::collections::HashSet;

/// Per-session chunk parser
#[derive(Debug, Clone)]
pub struct EventParser {
    config: ParserConfig,

    /// Sub-task name → node that first reported it, in discovery order
    active: Vec<(String, String)>,

    /// Sub-tasks already reported complete
    completed: HashSet<String>,
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

impl EventParser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            active: Vec::new(),
            completed: HashSet::new(),
        }
    }

    /// Translate one chunk into events, in node order
    ///
    /// Non-state entries (interrupts, unknown values) produce nothing.
    pub fn parse_chunk(&mut self, chunk: &Chunk) -> Vec<AgentEvent> {
        let mut events = Vec::new();

        for (node, update) in chunk.entries() {
            let NodeUpdate::State(update) = update else {
                continue;
            };

            events.push(AgentEvent::thinking(node));
            self.track_subagent(node);
            self.parse_update(update, &mut events);
        }

        events
    }

    /// Close every open sub-task, then emit `Complete`
    pub fn finalize(&mut self) -> Vec<AgentEvent> {
        let mut events = Vec::new();

        for (name, _) in &self.active {
            if self.completed.insert(name.clone()) {
                events.push(AgentEvent::subagent_complete(name));
            }
        }

        events.push(AgentEvent::complete());
        events
    }

    /// Sub-task names seen so far, in discovery order
    pub fn active_subagents(&self) -> impl Iterator<Item = &str> {
        self.active.iter().map(|(name, _)| name.as_str())
    }

    /// Node that first reported a sub-task
    pub fn subagent_node(&self, name: &str) -> Option<&str> {
        self.active
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node.as_str())
    }

    /// Whether `finalize` already closed a sub-task
    pub fn is_completed(&self, name: &str) -> bool {
        self.completed.contains(name)
    }

    fn track_subagent(&mut self, node: &str) {
        let Some(name) = node.strip_prefix(self.config.subagent_node_prefix.as_str()) else {
            return;
        };
        if name.is_empty() || self.active.iter().any(|(n, _)| n == name) {
            return;
        }

        tracing::debug!(subagent = %name, node = %node, "Sub-task discovered");
        self.active.push((name.to_string(), node.to_string()));
    }

    fn parse_update(&self, update: &StateUpdate, events: &mut Vec<AgentEvent>) {
        for message in &update.messages {
            self.parse_message(message, events);
        }

        if let Some(files) = &update.files {
            if !files.is_empty() {
                let mut paths: Vec<String> = files.keys().cloned().collect();
                paths.sort();
                events.push(AgentEvent::file_update(paths));
            }
        }

        if let Some(todos) = &update.todos {
            events.push(AgentEvent::todo_update(todos.clone()));
        }
    }

    fn parse_message(&self, message: &Message, events: &mut Vec<AgentEvent>) {
        match message.role {
            Role::Assistant if !message.tool_calls.is_empty() => {
                for call in &message.tool_calls {
                    let subagent = if call.name == self.config.delegate_tool {
                        let name = call.str_arg("subagent_type");
                        events.push(AgentEvent::subagent_spawn(
                            name.clone(),
                            call.str_arg("description"),
                        ));
                        Some(name)
                    } else {
                        None
                    };

                    events.push(AgentEvent::tool_call(
                        call.name.clone(),
                        call.args.clone(),
                        call.id.clone(),
                        subagent,
                    ));
                }
            }
            Role::Assistant => {
                if !message.content.is_empty() {
                    events.push(AgentEvent::message(message.content.clone()));
                }
            }
            Role::Tool => {
                let result = truncate_result(&message.content, self.config.max_tool_result_chars);
                events.push(AgentEvent::tool_result(
                    message.name.clone().unwrap_or_else(|| "unknown".to_string()),
                    result,
                    message.tool_call_id.clone().unwrap_or_default(),
                    result_succeeded(&message.content),
                ));
            }
            Role::User => {}
        }
    }
}

/// Cap text at `max_chars` characters, noting the original length
pub fn truncate_result(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}... ({total} characters total)")
}

/// A result is a failure only when it is a JSON object with `"success": false`
fn result_succeeded(text: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => {
            !matches!(map.get("success"), Some(serde_json::Value::Bool(false)))
        }
        _ => true,
    }
}
