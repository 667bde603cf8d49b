//! Classification of raw engine chunks
//!
//! Engines yield loosely-shaped JSON: a mapping from node identifier to a
//! state update. `Chunk::classify` turns that into a closed set of update
//! kinds so the parser and orchestrator never inspect raw dynamic values.

use crate::types::{InterruptPayload, Message};
use serde_json::{Map, Value};

/// One classified engine chunk, in engine iteration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    entries: Vec<(String, NodeUpdate)>,
}

/// What a single node reported
#[derive(Debug, Clone, PartialEq)]
pub enum NodeUpdate {
    /// A well-formed state update
    State(StateUpdate),
    /// The engine paused for human review
    Interrupt(Vec<InterruptPayload>),
    /// Anything else; skipped by consumers
    Unknown(Value),
}

/// Known fields of a node's state update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    /// Messages produced by the node
    pub messages: Vec<Message>,
    /// Working-set files written by the node
    pub files: Option<Map<String, Value>>,
    /// Replacement todo list
    pub todos: Option<Vec<Value>>,
}

impl Chunk {
    /// Classify a raw chunk
    ///
    /// A chunk that is not a JSON object yields no entries.
    pub fn classify(raw: Value, interrupt_key: &str) -> Self {
        let Value::Object(map) = raw else {
            return Self::default();
        };

        let entries = map
            .into_iter()
            .map(|(node, update)| {
                let update = if node == interrupt_key {
                    NodeUpdate::Interrupt(interrupts_from_value(&update))
                } else {
                    match update {
                        Value::Object(fields) => NodeUpdate::State(StateUpdate::from_map(&fields)),
                        other => NodeUpdate::Unknown(other),
                    }
                };
                (node, update)
            })
            .collect();

        Self { entries }
    }

    /// Build a chunk from already-classified entries
    pub fn from_entries(entries: Vec<(String, NodeUpdate)>) -> Self {
        Self { entries }
    }

    /// Classified entries
    pub fn entries(&self) -> &[(String, NodeUpdate)] {
        &self.entries
    }

    /// Whether any node reported an interrupt
    pub fn has_interrupt(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, u)| matches!(u, NodeUpdate::Interrupt(_)))
    }

    /// All interrupt payloads in this chunk, flattened
    pub fn interrupts(&self) -> Vec<InterruptPayload> {
        self.entries
            .iter()
            .filter_map(|(_, u)| match u {
                NodeUpdate::Interrupt(payloads) => Some(payloads.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StateUpdate {
    fn from_map(fields: &Map<String, Value>) -> Self {
        let messages = fields
            .get("messages")
            .map(messages_from_value)
            .unwrap_or_default();

        let files = match fields.get("files") {
            Some(Value::Object(files)) => Some(files.clone()),
            _ => None,
        };

        let todos = match fields.get("todos") {
            Some(Value::Array(todos)) => Some(todos.clone()),
            _ => None,
        };

        Self {
            messages,
            files,
            todos,
        }
    }
}

/// Messages arrive as a list, a `{"value": [...]}` overwrite wrapper, or
/// a lone message object. Unreadable entries are dropped.
fn messages_from_value(value: &Value) -> Vec<Message> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("value") {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => vec![value],
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

/// Interrupt payloads may arrive as a single item or a list
fn interrupts_from_value(value: &Value) -> Vec<InterruptPayload> {
    match value {
        Value::Array(items) => items.iter().map(InterruptPayload::from_value).collect(),
        Value::Null => Vec::new(),
        other => vec![InterruptPayload::from_value(other)],
    }
}
