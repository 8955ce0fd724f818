//! The message envelope passed between executors.
//!
//! Handlers are discovered by declared type, not by Rust generics: a
//! payload in flight carries its [`TypeSpec`] tag alongside the JSON value,
//! so dispatch can match on data instead of on reflection.

use crate::types::TypeSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A JSON value tagged with the [`TypeSpec`] its sender declared for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedValue {
    pub type_spec: TypeSpec,
    pub value: Value,
}

impl TypedValue {
    pub fn new(type_spec: TypeSpec, value: Value) -> Self {
        Self { type_spec, value }
    }

    pub fn concrete(type_name: impl Into<String>, value: Value) -> Self {
        Self::new(TypeSpec::concrete(type_name), value)
    }
}

/// A payload in flight between executors.
///
/// `target_id` narrows delivery to a single destination when set (used by
/// request/response correlation and by sub-workflow forwarding); when
/// absent, the edge group's own routing decides the destination(s).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub payload: TypedValue,
    pub source_id: String,
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub trace_metadata: HashMap<String, Value>,
}

impl Message {
    pub fn new(payload: TypedValue, source_id: impl Into<String>) -> Self {
        Self {
            payload,
            source_id: source_id.into(),
            target_id: None,
            trace_metadata: HashMap::new(),
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_trace(mut self, key: impl Into<String>, value: Value) -> Self {
        self.trace_metadata.insert(key.into(), value);
        self
    }
}

/// Minimal chat message shape used by [`crate::workflow::Workflow::as_agent`].
/// Not a full chat-client type — just enough structure for a start executor
/// to declare a handler over `list<ChatMessage>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_builder_sets_target_and_trace() {
        let msg = Message::new(TypedValue::concrete("String", serde_json::json!("hi")), "src")
            .with_target("dst")
            .with_trace("span_id", serde_json::json!("abc"));
        assert_eq!(msg.target_id.as_deref(), Some("dst"));
        assert_eq!(msg.trace_metadata["span_id"], serde_json::json!("abc"));
    }
}
