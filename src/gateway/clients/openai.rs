//! An OpenAI-compatible Chat Completions backend client (§4.D).
//!
//! Binds a model definition's `{provider, model_id}` and header list to a concrete HTTP upstream
//! speaking the OpenAI Chat Completions wire format. Because the vast majority of self-hosted
//! model servers (vLLM, TGI, Ollama's OpenAI shim, …) mirror this same shape, one client covers
//! both cloud providers and self-hosted backends — only `base_url` and `headers` differ.

use crate::gateway::backend_client::{
    with_retry, BackendClient, BackendEvent, BackendEventStream, BackendParams, RetryPolicy,
};
use crate::gateway::client_wrapper::{Message, Role, ToolCall, ToolDeclaration};
use crate::gateway::clients::http_pool::get_http_client;
use crate::gateway::error::GatewayError;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Header entries forwarded verbatim to the upstream (typically `Authorization: Bearer …`).
#[derive(Debug, Clone, Default)]
pub struct Headers(pub Vec<(String, String)>);

/// A backend client bound to one OpenAI-compatible HTTP endpoint.
pub struct OpenAiCompatibleBackend {
    base_url: String,
    headers: Headers,
}

impl OpenAiCompatibleBackend {
    pub fn new(base_url: impl Into<String>, headers: Headers) -> Self {
        Self {
            base_url: base_url.into(),
            headers,
        }
    }

    fn request(&self, client: &reqwest::Client, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut req = client.post(url);
        for (key, value) in &self.headers.0 {
            req = req.header(key, value);
        }
        req
    }

    fn http_client(&self) -> reqwest::Client {
        get_http_client(&self.base_url)
    }

    fn classify_status(status: reqwest::StatusCode, body: String) -> GatewayError {
        if status.as_u16() >= 500 || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            GatewayError::BackendTransient(format!("{}: {}", status, body))
        } else {
            GatewayError::BackendFatal(format!("{}: {}", status, body))
        }
    }
}

fn message_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::System => json!({"role": "system", "content": msg.content}),
        Role::User => json!({"role": "user", "content": msg.content}),
        Role::Assistant => {
            let mut obj = json!({"role": "assistant", "content": msg.content});
            if !msg.tool_calls.is_empty() {
                obj["tool_calls"] = Value::Array(
                    msg.tool_calls
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
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
    }
}

fn tool_decls_to_wire(decls: &[ToolDeclaration]) -> Vec<Value> {
    decls
        .iter()
        .map(|d| {
            json!({
                "type": "function",
                "function": {
                    "name": d.name,
                    "description": d.description,
                    "parameters": d.parameters_schema,
                },
            })
        })
        .collect()
}

fn build_body(
    messages: &[Message],
    tool_decls: &[ToolDeclaration],
    params: &BackendParams,
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": params.model_id,
        "messages": messages.iter().map(message_to_wire).collect::<Vec<_>>(),
        "stream": stream,
    });
    if !tool_decls.is_empty() {
        body["tools"] = Value::Array(tool_decls_to_wire(tool_decls));
    }
    if let Value::Object(map) = &mut body {
        for (k, v) in &params.extra {
            map.insert(k.clone(), v.clone());
        }
    }
    body
}

fn parse_message_from_choice(choice: &Value) -> Result<Message, GatewayError> {
    let message = choice
        .get("message")
        .ok_or_else(|| GatewayError::BackendFatal("response missing `message`".into()))?;
    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let tool_calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    let id = c.get("id")?.as_str()?.to_string();
                    let func = c.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let args_str = func.get("arguments").and_then(|a| a.as_str()).unwrap_or("{}");
                    let arguments: Value = serde_json::from_str(args_str).unwrap_or(json!({}));
                    Some(ToolCall { id, name, arguments })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Ok(Message {
        role: Role::Assistant,
        content,
        tool_calls,
        tool_call_id: None,
    })
}

#[async_trait]
impl BackendClient for OpenAiCompatibleBackend {
    async fn complete(
        &self,
        messages: &[Message],
        tool_decls: &[ToolDeclaration],
        params: &BackendParams,
    ) -> Result<Message, GatewayError> {
        let body = build_body(messages, tool_decls, params, false);
        with_retry(RetryPolicy::DEFAULT, || async {
            let client = self.http_client();
            let resp = self
                .request(&client, "/chat/completions")
                .json(&body)
                .send()
                .await
                .map_err(|e| GatewayError::BackendTransient(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(Self::classify_status(status, text));
            }
            let payload: Value = resp
                .json()
                .await
                .map_err(|e| GatewayError::BackendFatal(e.to_string()))?;
            let choice = payload
                .get("choices")
                .and_then(|c| c.as_array())
                .and_then(|c| c.first())
                .ok_or_else(|| GatewayError::BackendFatal("response has no choices".into()))?;
            parse_message_from_choice(choice)
        })
        .await
    }

    async fn stream(
        &self,
        messages: &[Message],
        tool_decls: &[ToolDeclaration],
        params: &BackendParams,
    ) -> Result<BackendEventStream, GatewayError> {
        let body = build_body(messages, tool_decls, params, true);
        let resp = with_retry(RetryPolicy::DEFAULT, || async {
            let client = self.http_client();
            let resp = self
                .request(&client, "/chat/completions")
                .json(&body)
                .send()
                .await
                .map_err(|e| GatewayError::BackendTransient(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(Self::classify_status(status, text));
            }
            Ok(resp)
        })
        .await?;

        // Per-index accumulator for partial `tool_calls` deltas: the OpenAI streaming shape only
        // carries a fragment of a call's name/arguments in any one chunk. Flushed into discrete
        // `BackendEvent::ToolCall` events once `finish_reason` arrives; the agent runtime (§4.E)
        // is the one that buffers those into a single synthetic intent, not this client.
        struct StreamState {
            inner: std::pin::Pin<Box<dyn futures_util::Stream<Item = Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>> + Send>>,
            pending: HashMap<u64, (String, String, String)>,
            queue: std::collections::VecDeque<Result<BackendEvent, GatewayError>>,
            finished: bool,
        }

        let state = StreamState {
            inner: Box::pin(resp.bytes_stream().eventsource()),
            pending: HashMap::new(),
            queue: std::collections::VecDeque::new(),
            finished: false,
        };

        let stream = futures_util::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.queue.pop_front() {
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }
                match state.inner.next().await {
                    None => {
                        state.finished = true;
                        continue;
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(GatewayError::BackendTransient(e.to_string())), state));
                    }
                    Some(Ok(event)) => {
                        if event.data == "[DONE]" {
                            state.finished = true;
                            continue;
                        }
                        let parsed: Value = match serde_json::from_str(&event.data) {
                            Ok(v) => v,
                            Err(e) => {
                                state.finished = true;
                                return Some((Err(GatewayError::BackendFatal(e.to_string())), state));
                            }
                        };
                        let Some(choice) = parsed
                            .get("choices")
                            .and_then(|c| c.as_array())
                            .and_then(|c| c.first())
                        else {
                            continue;
                        };
                        let delta = choice.get("delta").cloned().unwrap_or(json!({}));

                        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
                            if !text.is_empty() {
                                state
                                    .queue
                                    .push_back(Ok(BackendEvent::TextDelta(text.to_string())));
                            }
                        }

                        if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                            for call in calls {
                                let index = call.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                                let entry = state.pending.entry(index).or_default();
                                if let Some(id) = call.get("id").and_then(|v| v.as_str()) {
                                    entry.0 = id.to_string();
                                }
                                if let Some(func) = call.get("function") {
                                    if let Some(name) = func.get("name").and_then(|v| v.as_str()) {
                                        entry.1.push_str(name);
                                    }
                                    if let Some(args) = func.get("arguments").and_then(|v| v.as_str()) {
                                        entry.2.push_str(args);
                                    }
                                }
                            }
                        }

                        if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
                            let mut entries: Vec<_> = state.pending.drain().collect();
                            entries.sort_by_key(|(index, _)| *index);
                            for (_, (id, name, args)) in entries {
                                let arguments: Value =
                                    serde_json::from_str(&args).unwrap_or_else(|_| json!({}));
                                state.queue.push_back(Ok(BackendEvent::ToolCall { id, name, arguments }));
                            }
                            state.queue.push_back(Ok(BackendEvent::Finish {
                                reason: reason.to_string(),
                            }));
                            state.finished = true;
                        }
                        continue;
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_to_wire_carries_tool_call_id_for_tool_role() {
        let msg = Message::tool("call_1", "the answer is 4");
        let wire = message_to_wire(&msg);
        assert_eq!(wire["tool_call_id"], "call_1");
        assert_eq!(wire["role"], "tool");
    }

    #[test]
    fn assistant_message_with_tool_calls_serializes_function_shape() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "current_time".into(),
                arguments: json!({}),
            }],
        );
        let wire = message_to_wire(&msg);
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "current_time");
    }

    #[test]
    fn parse_message_from_choice_extracts_tool_calls() {
        let choice = json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "id": "call_1",
                    "function": {"name": "current_time", "arguments": "{}"},
                }],
            }
        });
        let msg = parse_message_from_choice(&choice).unwrap();
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].name, "current_time");
    }

    #[test]
    fn build_body_includes_tool_declarations_only_when_present() {
        let params = BackendParams {
            model_id: "gpt-4o".into(),
            extra: Default::default(),
        };
        let body = build_body(&[Message::user("hi")], &[], &params, false);
        assert!(body.get("tools").is_none());

        let decl = ToolDeclaration {
            name: "current_time".into(),
            description: "".into(),
            parameters_schema: json!({"type": "object", "properties": {}}),
        };
        let body = build_body(&[Message::user("hi")], &[decl], &params, true);
        assert_eq!(body["tools"][0]["function"]["name"], "current_time");
        assert_eq!(body["stream"], true);
    }
}
