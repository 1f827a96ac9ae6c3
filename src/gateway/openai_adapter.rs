//! OpenAI-shape adapter (§4.F): wire-format translation at the HTTP boundary.
//!
//! Everything downstream of this module (the completion manager, the agent runtime, the
//! pass-through proxy) only ever sees [`Message`]; everything upstream of it (the HTTP layer)
//! only ever sees OpenAI's wire shapes. `ChatRequest` deserializes an inbound request,
//! `to_messages` normalizes it, and `ChatCompletionChunk`/`ChatCompletion` serialize the two
//! possible response shapes.

use crate::gateway::agent::AgentEvent;
use crate::gateway::client_wrapper::{Message, Role};
use crate::gateway::model_definition::ModelDefinition;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// One inbound chat message. `content` accepts either a plain string or an ordered sequence of
/// typed content parts (text, image reference, tool result); non-text parts are preserved as
/// opaque JSON rather than interpreted, per §4.F "Inbound".
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireMessage {
    pub role: String,
    pub content: Option<Value>,
    #[serde(default)]
    pub tool_calls: Vec<WireToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_function_type")]
    pub call_type: String,
    pub function: WireFunctionCall,
}

fn default_function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireFunctionCall {
    pub name: String,
    pub arguments: String,
}

/// An inbound OpenAI-shaped chat-completion request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub response_format: Option<Value>,
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Renders a wire `content` value (string or typed-parts array) down to plain text for the
/// internal message model; non-text parts are dropped from `content` but nothing upstream of
/// this adapter inspects anything but plain text today.
fn content_to_text(content: &Option<Value>) -> String {
    match content {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        Some(other) => other.to_string(),
    }
}

fn role_from_wire(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

/// Inbound translation: OpenAI-shaped messages → internal [`Message`] list, prepending the model
/// definition's `system_prompts` when the client supplied no system message of its own.
pub fn to_messages(request: &ChatRequest, model: &ModelDefinition) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::with_capacity(request.messages.len() + 1);
    let has_system = request
        .messages
        .iter()
        .any(|m| m.role.eq_ignore_ascii_case("system"));

    if !has_system {
        for prompt in &model.system_prompts {
            messages.push(Message::system(prompt.content.clone()));
        }
    }

    for wire in &request.messages {
        let role = role_from_wire(&wire.role);
        let content = content_to_text(&wire.content);
        let tool_calls = wire
            .tool_calls
            .iter()
            .map(|tc| crate::gateway::client_wrapper::ToolCall {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                arguments: serde_json::from_str(&tc.function.arguments).unwrap_or(json!({})),
            })
            .collect();
        messages.push(Message {
            role,
            content,
            tool_calls,
            tool_call_id: wire.tool_call_id.clone(),
        });
    }

    messages
}

/// Last user message content, trimmed and lowercased — used to detect the `help` command (§4.G
/// step 3).
pub fn last_user_message_is_help(request: &ChatRequest) -> bool {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role.eq_ignore_ascii_case("user"))
        .map(|m| content_to_text(&m.content).trim().eq_ignore_ascii_case("help"))
        .unwrap_or(false)
}

fn message_to_wire_value(message: &Message) -> Value {
    let mut obj = json!({
        "role": match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        },
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {"name": tc.name, "arguments": tc.arguments.to_string()},
                    })
                })
                .collect(),
        );
    }
    obj
}

/// Outbound (unary): the final internal message becomes one `ChatCompletion` object with a
/// single choice, `finish_reason`, and a zero-valued usage block (§4.F "Outbound (unary)").
pub fn to_chat_completion(model_name: &str, message: &Message, finish_reason: &str) -> Value {
    json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4()),
        "object": "chat.completion",
        "created": unix_timestamp_placeholder(),
        "model": model_name,
        "system_fingerprint": "fp_llm_gateway",
        "choices": [{
            "index": 0,
            "message": message_to_wire_value(message),
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": 0,
            "completion_tokens": 0,
            "total_tokens": 0,
        },
    })
}

/// A body-level error response: OpenAI clients parse response bodies rather than relying solely
/// on transport status, so routing-layer errors (model-unknown, the `help` interception) are
/// returned as ordinary chat completions whose message content carries the error text.
pub fn plain_text_completion(model_name: &str, text: &str) -> Value {
    to_chat_completion(model_name, &Message::assistant(text.to_string()), "stop")
}

/// One SSE frame: `data: {json}\n\n`. The literal terminator `data: [DONE]\n\n` is a distinct
/// constant rather than a frame of this type, so callers can't accidentally double-wrap it.
pub fn sse_frame(chunk: &Value) -> String {
    format!("data: {}\n\n", chunk)
}

pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// Outbound (streaming): one internal [`AgentEvent`] → zero or one `ChatCompletionChunk`s.
/// `ToolCallIntent`/`ToolResult` events don't themselves produce client-visible chunks — the
/// client only ever sees assistant text and the terminal `finish_reason` — but are still passed
/// through so callers can log/trace them.
/// `Finish` carries no client-visible chunk of its own: `agent_stream_to_sse` maps it straight to
/// the `[DONE]` terminator (§8 S3 — exactly one frame per delta, then `[DONE]`, no separate
/// finish-reason chunk).
pub fn agent_event_to_chunk(model_name: &str, created: i64, event: &AgentEvent) -> Option<Value> {
    let delta = match event {
        AgentEvent::TextDelta(text) => json!({ "content": text }),
        AgentEvent::Finish { .. }
        | AgentEvent::ToolCallIntent(_)
        | AgentEvent::ToolResult { .. } => return None,
    };
    Some(chunk(model_name, created, delta, None))
}

fn chunk(model_name: &str, created: i64, delta: Value, finish_reason: Option<&str>) -> Value {
    json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4()),
        "object": "chat.completion.chunk",
        "created": created,
        "model": model_name,
        "system_fingerprint": "fp_llm_gateway",
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
}

/// `created` must come from the caller (agent/HTTP layer), never computed here: workflow scripts
/// and this module's unit tests both need `created` to be deterministic and injectable.
fn unix_timestamp_placeholder() -> i64 {
    0
}
