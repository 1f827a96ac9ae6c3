//! The internal message model shared by every component downstream of the OpenAI-shape adapter.
//!
//! Inbound OpenAI chat requests are normalized into [`Message`] values (§3 "Internal message")
//! before the agent runtime or pass-through proxy ever sees them. A `tool` role message always
//! carries a `tool_call_id` referencing a prior assistant [`Message::tool_calls`] entry in the
//! same conversation — that invariant is what lets the agent runtime and the streaming adapter
//! reconstruct strict tool-call/tool-result interleaving without re-deriving it from the wire
//! format each time.

use serde::{Deserialize, Serialize};

/// Who authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One call the assistant asked the tool registry to make, as returned by a backend's native
/// function-calling channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Backend-assigned call id, echoed back in the corresponding `tool` message's
    /// `tool_call_id` so the two can be correlated.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A provider-agnostic tool schema handed to a backend client's native tool-calling channel.
/// Built from [`crate::gateway::tool_registry::ArgSchema::to_json_schema`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// A normalized conversation entry, carried end to end through the agent runtime and the
/// OpenAI-shape adapter.
///
/// Invariant: a `Role::Tool` message always sets `tool_call_id`; an assistant message's
/// `tool_calls` is non-empty only when the backend requested tool invocations instead of (or
/// alongside) text content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// `true` when this is an assistant message carrying at least one tool call — the condition
    /// that routes the agent runtime from `think` into `act` rather than `finish`.
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}
