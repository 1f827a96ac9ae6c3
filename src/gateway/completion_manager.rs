//! Completion manager (§4.G): end-to-end orchestration for `/chat/completions`.
//!
//! Resolves the model configuration, intercepts the `help` command, synthesizes the effective
//! message list, and dispatches to whichever provider the model definition names — the
//! pass-through proxy for `type=openai`, the tool-using agent runtime for `type=langchain`.

use crate::gateway::agent::{AgentEvent, AgentRuntime};
use crate::gateway::backend_client::{BackendClient, BackendParams};
use crate::gateway::blob_store::BlobStore;
use crate::gateway::clients::openai::{Headers, OpenAiCompatibleBackend};
use crate::gateway::config_store::ConfigStore;
use crate::gateway::error::GatewayError;
use crate::gateway::model_definition::ModelType;
use crate::gateway::openai_adapter::{
    self, agent_event_to_chunk, last_user_message_is_help, plain_text_completion, to_chat_completion,
    to_messages, ChatRequest,
};
use crate::gateway::proxy::ProxyProvider;
use crate::gateway::tool_registry::ToolRegistry;
use bytes::Bytes;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub type ChatByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

/// Either half of the two chat-completion response shapes the HTTP layer can return.
pub enum ChatOutcome {
    Unary(Value),
    Stream(ChatByteStream),
}

pub struct CompletionManager {
    config_store: Arc<ConfigStore>,
    tool_registry: Arc<ToolRegistry>,
    proxy: Arc<ProxyProvider>,
    blob_store: Arc<dyn BlobStore>,
}

impl CompletionManager {
    pub fn new(
        config_store: Arc<ConfigStore>,
        tool_registry: Arc<ToolRegistry>,
        proxy: Arc<ProxyProvider>,
        blob_store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            config_store,
            tool_registry,
            proxy,
            blob_store,
        }
    }

    /// Drives §4.G steps 1-6 for one inbound chat-completion request.
    pub async fn handle_chat(
        &self,
        request: ChatRequest,
        forwarded_headers: Vec<(String, String)>,
    ) -> Result<ChatOutcome, GatewayError> {
        let snapshot = self.config_store.get().await;
        let model = match snapshot.find(&request.model) {
            Some(model) => model.clone(),
            None => {
                return Ok(ChatOutcome::Unary(plain_text_completion(
                    &request.model,
                    &format!("Model {} not found in the config", request.model),
                )));
            }
        };

        if last_user_message_is_help(&request) {
            return Ok(ChatOutcome::Unary(plain_text_completion(
                &model.name,
                &model.help_text(),
            )));
        }

        let messages = to_messages(&request, &model);
        let mut headers = forwarded_headers;
        for header in &model.headers {
            headers.push((header.key.clone(), header.value.clone()));
        }

        match model.model_type {
            ModelType::Openai => {
                let mut body = serde_json::to_value(&request).unwrap_or(Value::Null);
                if let Value::Object(map) = &mut body {
                    map.insert("model".into(), Value::String(model.name.clone()));
                }
                if request.stream {
                    let stream = self.proxy.stream(&model, &headers, body).await?;
                    Ok(ChatOutcome::Stream(stream))
                } else {
                    let body = self.proxy.complete_unary(&model, &headers, body).await?;
                    Ok(ChatOutcome::Unary(body))
                }
            }
            ModelType::Langchain => {
                let backend_ref = model.backend.clone().ok_or_else(|| {
                    GatewayError::ValidationFailed(format!(
                        "model {} is type=langchain but has no backend configured",
                        model.name
                    ))
                })?;
                let backend: Arc<dyn BackendClient> = Arc::new(OpenAiCompatibleBackend::new(
                    backend_ref.provider.clone(),
                    Headers(headers),
                ));
                let params = BackendParams {
                    model_id: backend_ref.model_id.clone(),
                    extra: model.model_parameters.clone(),
                };
                let tool_names: Vec<String> = model
                    .effective_tools()
                    .iter()
                    .map(|t| t.name.clone())
                    .collect();
                let scoped_tools = Arc::new(self.tool_registry.scoped(&tool_names).map_err(|missing| {
                    GatewayError::ValidationFailed(format!(
                        "model {} references unresolvable tool(s): {}",
                        model.name,
                        missing.join(", ")
                    ))
                })?);
                let tool_decls = scoped_tools.declarations();
                let cancel = Arc::new(AtomicBool::new(false));
                let runtime = Arc::new(AgentRuntime::new(backend, scoped_tools));

                if request.stream {
                    let agent_stream = runtime.run_streaming(messages, tool_decls, params, cancel);
                    let model_name = model.name.clone();
                    Ok(ChatOutcome::Stream(agent_stream_to_sse(
                        model_name,
                        agent_stream,
                    )))
                } else {
                    let (message, reason) = runtime
                        .run_unary(messages, tool_decls, params, cancel)
                        .await?;
                    Ok(ChatOutcome::Unary(to_chat_completion(
                        &model.name,
                        &message,
                        &reason,
                    )))
                }
            }
        }
    }

    pub fn blob_store(&self) -> Arc<dyn BlobStore> {
        Arc::clone(&self.blob_store)
    }

    pub fn config_store(&self) -> Arc<ConfigStore> {
        Arc::clone(&self.config_store)
    }
}

/// Converts an agent event stream into SSE byte frames, terminating on `[DONE]`. A frame is
/// emitted only for `TextDelta`; `Finish` maps straight to the `[DONE]` terminator with no
/// separate finish-reason chunk, and `ToolCallIntent`/`ToolResult` are internal bookkeeping the
/// client never sees directly (§8 S3: two deltas then `[DONE]`, exactly three frames).
fn agent_stream_to_sse(
    model_name: String,
    stream: crate::gateway::agent::AgentEventStream,
) -> ChatByteStream {
    struct State {
        stream: crate::gateway::agent::AgentEventStream,
        model_name: String,
        sent_any: bool,
        done: bool,
    }

    let state = State {
        stream,
        model_name,
        sent_any: false,
        done: false,
    };

    let out = futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }
            match state.stream.next().await {
                None => {
                    state.done = true;
                    return Some((Ok(Bytes::from_static(openai_adapter::SSE_DONE.as_bytes())), state));
                }
                Some(Err(GatewayError::Cancelled)) => {
                    state.done = true;
                    if state.sent_any {
                        return Some((
                            Ok(Bytes::from_static(openai_adapter::SSE_DONE.as_bytes())),
                            state,
                        ));
                    }
                    return None;
                }
                Some(Err(e)) => {
                    log::error!("agent stream error: {}", e);
                    state.done = true;
                    return Some((
                        Ok(Bytes::from_static(openai_adapter::SSE_DONE.as_bytes())),
                        state,
                    ));
                }
                Some(Ok(AgentEvent::Finish { .. })) => {
                    state.done = true;
                    return Some((Ok(Bytes::from_static(openai_adapter::SSE_DONE.as_bytes())), state));
                }
                Some(Ok(event)) => {
                    if let Some(chunk) = agent_event_to_chunk(&state.model_name, 0, &event) {
                        state.sent_any = true;
                        let frame = openai_adapter::sse_frame(&chunk);
                        return Some((Ok(Bytes::from(frame)), state));
                    }
                    continue;
                }
            }
        }
    });

    Box::pin(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::agent::AgentEvent;
    use crate::gateway::blob_store::LocalBlobStore;
    use crate::gateway::config_store::{ConfigStore, LocalDirectorySource};
    use crate::gateway::model_definition::{BackendRef, ModelDefinition, ModelType, ToolRef};
    use crate::gateway::openai_adapter::{ChatRequest, WireMessage};

    fn model_with_unresolvable_tool() -> ModelDefinition {
        ModelDefinition {
            id: "m".into(),
            name: "Tool User".into(),
            description: "".into(),
            owner: "".into(),
            model_type: ModelType::Langchain,
            disabled: false,
            backend: Some(BackendRef {
                provider: "http://localhost:9999".into(),
                model_id: "local-model".into(),
            }),
            system_prompts: vec![],
            model_parameters: serde_json::Map::new(),
            headers: vec![],
            tools: vec![ToolRef {
                name: "does_not_exist".into(),
                parameters: None,
            }],
            agents: vec![],
            example_prompts: vec![],
            url: None,
        }
    }

    #[tokio::test]
    async fn dispatch_fails_fast_on_unresolvable_tool_reference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("m.json"),
            serde_json::to_string(&model_with_unresolvable_tool()).unwrap(),
        )
        .unwrap();
        let config_store = Arc::new(ConfigStore::new(
            Arc::new(LocalDirectorySource::new(dir.path())),
            std::time::Duration::from_secs(3600),
        ));
        let blob_store = Arc::new(LocalBlobStore::new(
            dir.path().join("blobs"),
            "https://gateway.example",
        ));
        let proxy = Arc::new(ProxyProvider::new(
            reqwest::Client::new(),
            "https://api.openai.com/v1",
        ));
        let manager = CompletionManager::new(
            config_store,
            Arc::new(ToolRegistry::new()),
            proxy,
            blob_store,
        );
        let request = ChatRequest {
            model: "Tool User".into(),
            messages: vec![WireMessage {
                role: "user".into(),
                content: Some(serde_json::json!("hi")),
                tool_calls: vec![],
                tool_call_id: None,
            }],
            stream: false,
            response_format: None,
            tools: None,
            extra: serde_json::Map::new(),
        };
        let err = manager.handle_chat(request, vec![]).await.unwrap_err();
        assert!(matches!(err, GatewayError::ValidationFailed(_)));
    }

    /// §8 S3: two text deltas then finish yields exactly three SSE records — two content chunks,
    /// then the `[DONE]` terminator, with no separate finish-reason chunk in between.
    #[tokio::test]
    async fn agent_stream_to_sse_emits_exactly_three_frames_for_two_deltas_then_finish() {
        let events = vec![
            Ok(AgentEvent::TextDelta("Hello ".into())),
            Ok(AgentEvent::TextDelta("world".into())),
            Ok(AgentEvent::Finish {
                reason: "stop".into(),
            }),
        ];
        let agent_stream: crate::gateway::agent::AgentEventStream =
            Box::pin(futures_util::stream::iter(events));
        let mut sse = agent_stream_to_sse("m".to_string(), agent_stream);
        let mut collected = Vec::new();
        while let Some(chunk) = sse.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        let text = String::from_utf8(collected).unwrap();
        let records: Vec<&str> = text.split("\n\n").filter(|r| !r.is_empty()).collect();
        assert_eq!(records.len(), 3);
        assert!(records[0].contains("\"content\":\"Hello \""));
        assert!(records[1].contains("\"content\":\"world\""));
        assert_eq!(records[2], "data: [DONE]");
    }

    #[tokio::test]
    async fn tool_only_events_produce_no_frames_before_done() {
        let events = vec![
            Ok(AgentEvent::ToolCallIntent(vec![])),
            Ok(AgentEvent::Finish {
                reason: "stop".into(),
            }),
        ];
        let agent_stream: crate::gateway::agent::AgentEventStream =
            Box::pin(futures_util::stream::iter(events));
        let mut sse = agent_stream_to_sse("m".to_string(), agent_stream);
        let mut collected = Vec::new();
        while let Some(chunk) = sse.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        let text = String::from_utf8(collected).unwrap();
        assert_eq!(text, "data: [DONE]\n\n");
    }
}
