//! Agent runtime (§4.E): the reason→act→finish loop over one request's message list.
//!
//! An [`AgentRuntime`] binds a [`BackendClient`] and a [`ToolRegistry`] and drives a state machine
//! over `(messages, step_count)`. `think` asks the backend for the next assistant turn; `act`
//! dispatches any tool calls the assistant requested, concurrently, preserving call order in the
//! resulting `tool` observations; `finish` is reached when an assistant turn carries no tool
//! calls, `step_count` reaches `max_steps`, or the run is cancelled.

use crate::gateway::backend_client::{BackendClient, BackendEvent, BackendParams};
use crate::gateway::client_wrapper::{Message, ToolCall, ToolDeclaration};
use crate::gateway::error::GatewayError;
use crate::gateway::tool_registry::{ToolCallError, ToolOutput, ToolRegistry};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Reached after `step_count` `think` calls with no terminal assistant message (§4.E edge cases).
pub const DEFAULT_MAX_STEPS: usize = 8;

/// One event surfaced by a streaming agent run. Consumed by the OpenAI-shape adapter (§4.F) to
/// assemble `ChatCompletionChunk`s; text deltas are forwarded as soon as they arrive, while tool
/// calls are only known — and only ever emitted — once the full assistant turn is in hand.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// An incremental slice of assistant text, in production order.
    TextDelta(String),
    /// The assistant's complete set of tool calls for this step, emitted once as a single
    /// synthetic event before the runtime transitions into `act`.
    ToolCallIntent(Vec<ToolCall>),
    /// The observation produced by joining one dispatched tool call, in the same order as the
    /// preceding `ToolCallIntent`'s list (not completion order).
    ToolResult {
        tool_call_id: String,
        name: String,
        content: String,
        artifact: Option<String>,
    },
    /// The loop has terminated; `reason` is one of `"stop"`, `"length"`, or `"tool_error"`.
    Finish { reason: String },
}

pub type AgentEventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, GatewayError>> + Send>>;

/// Binds a chat backend and a tool catalog for the duration of one request.
pub struct AgentRuntime {
    backend: Arc<dyn BackendClient>,
    tools: Arc<ToolRegistry>,
    max_steps: usize,
}

impl AgentRuntime {
    pub fn new(backend: Arc<dyn BackendClient>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            backend,
            tools,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Dispatch every tool call in `calls` concurrently, returning their outcomes in the same
    /// order `calls` was given — the join preserves call order regardless of completion order.
    async fn dispatch_tool_calls(
        &self,
        calls: &[ToolCall],
    ) -> Vec<Result<ToolOutput, ToolCallError>> {
        let futures = calls.iter().map(|call| {
            let tools = Arc::clone(&self.tools);
            let name = call.name.clone();
            let arguments = call.arguments.clone();
            async move { tools.invoke(&name, &arguments).await }
        });
        futures_util::future::join_all(futures).await
    }

    /// Non-streaming run: loops until `finish`, returning the terminal assistant message and the
    /// reason the loop ended.
    pub async fn run_unary(
        &self,
        mut messages: Vec<Message>,
        tool_decls: Vec<ToolDeclaration>,
        params: BackendParams,
        cancel: Arc<AtomicBool>,
    ) -> Result<(Message, String), GatewayError> {
        let mut step = 0usize;
        let mut last_tool_error: Option<(String, u32)> = None;

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(GatewayError::Cancelled);
            }

            let assistant = self.backend.complete(&messages, &tool_decls, &params).await?;
            messages.push(assistant.clone());
            step += 1;

            if !assistant.has_tool_calls() {
                return Ok((assistant, "stop".to_string()));
            }
            if step >= self.max_steps {
                return Ok((assistant, "length".to_string()));
            }
            if cancel.load(Ordering::Relaxed) {
                return Err(GatewayError::Cancelled);
            }

            let outcomes = self.dispatch_tool_calls(&assistant.tool_calls).await;
            let mut loop_on_repeated_error = false;
            for (call, outcome) in assistant.tool_calls.iter().zip(outcomes.into_iter()) {
                let (content, _artifact, repeated) = self.observe(&mut last_tool_error, call, outcome);
                messages.push(Message::tool(call.id.clone(), content));
                if repeated {
                    loop_on_repeated_error = true;
                }
            }
            if loop_on_repeated_error {
                return Ok((assistant, "tool_error".to_string()));
            }
        }
    }

    /// Records the outcome of one tool call against the "two consecutive errors with the same
    /// tool name" guard and returns `(observation text, artifact, triggered)`. Only
    /// `ToolCallError::Invocation` counts toward the guard (§4.E: "If a tool invocation panics or
    /// errors..."); a schema-validation failure is fed back as a self-correction observation and
    /// never trips or extends the streak.
    fn observe(
        &self,
        last_tool_error: &mut Option<(String, u32)>,
        call: &ToolCall,
        outcome: Result<ToolOutput, ToolCallError>,
    ) -> (String, Option<String>, bool) {
        match outcome {
            Ok(output) => {
                *last_tool_error = None;
                (output.content, output.artifact, false)
            }
            Err(ToolCallError::Validation(e)) => {
                *last_tool_error = None;
                (e.to_string(), None, false)
            }
            Err(ToolCallError::Invocation(e)) => {
                let count = match last_tool_error.as_ref() {
                    Some((name, n)) if name == &call.name => n + 1,
                    _ => 1,
                };
                let triggered = count >= 2;
                *last_tool_error = Some((call.name.clone(), count));
                (e.to_string(), None, triggered)
            }
        }
    }

    /// Streaming run: spawns the loop on its own task and returns a stream of [`AgentEvent`]s.
    /// Text deltas are forwarded immediately; tool calls are buffered for the duration of one
    /// `think` and surfaced as a single `ToolCallIntent` before the runtime dispatches them.
    pub fn run_streaming(
        self: Arc<Self>,
        messages: Vec<Message>,
        tool_decls: Vec<ToolDeclaration>,
        params: BackendParams,
        cancel: Arc<AtomicBool>,
    ) -> AgentEventStream {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            if let Err(err) = self.drive(messages, tool_decls, params, cancel, &tx).await {
                let _ = tx.send(Err(err)).await;
            }
        });
        Box::pin(AgentEventReceiver { rx })
    }

    async fn drive(
        &self,
        mut messages: Vec<Message>,
        tool_decls: Vec<ToolDeclaration>,
        params: BackendParams,
        cancel: Arc<AtomicBool>,
        tx: &mpsc::Sender<Result<AgentEvent, GatewayError>>,
    ) -> Result<(), GatewayError> {
        let mut step = 0usize;
        let mut last_tool_error: Option<(String, u32)> = None;

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(GatewayError::Cancelled);
            }

            let mut backend_stream = self.backend.stream(&messages, &tool_decls, &params).await?;
            let mut content = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            let mut finish_reason = "stop".to_string();

            while let Some(event) = backend_stream.next().await {
                match event? {
                    BackendEvent::TextDelta(delta) => {
                        content.push_str(&delta);
                        if tx.send(Ok(AgentEvent::TextDelta(delta))).await.is_err() {
                            return Ok(());
                        }
                    }
                    BackendEvent::ToolCall { id, name, arguments } => {
                        tool_calls.push(ToolCall { id, name, arguments });
                    }
                    BackendEvent::Finish { reason } => {
                        finish_reason = reason;
                        break;
                    }
                }
            }

            let assistant = if tool_calls.is_empty() {
                Message::assistant(content)
            } else {
                Message::assistant_with_tool_calls(content, tool_calls.clone())
            };
            messages.push(assistant);
            step += 1;

            if tool_calls.is_empty() {
                let _ = tx.send(Ok(AgentEvent::Finish { reason: finish_reason })).await;
                return Ok(());
            }
            if step >= self.max_steps {
                let _ = tx
                    .send(Ok(AgentEvent::Finish {
                        reason: "length".to_string(),
                    }))
                    .await;
                return Ok(());
            }
            if cancel.load(Ordering::Relaxed) {
                return Err(GatewayError::Cancelled);
            }

            if tx
                .send(Ok(AgentEvent::ToolCallIntent(tool_calls.clone())))
                .await
                .is_err()
            {
                return Ok(());
            }

            let outcomes = self.dispatch_tool_calls(&tool_calls).await;
            let mut loop_on_repeated_error = false;
            for (call, outcome) in tool_calls.iter().zip(outcomes.into_iter()) {
                let (text, artifact, repeated) = self.observe(&mut last_tool_error, call, outcome);
                if repeated {
                    loop_on_repeated_error = true;
                }
                messages.push(Message::tool(call.id.clone(), text.clone()));
                if tx
                    .send(Ok(AgentEvent::ToolResult {
                        tool_call_id: call.id.clone(),
                        name: call.name.clone(),
                        content: text,
                        artifact,
                    }))
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }

            if loop_on_repeated_error {
                let _ = tx
                    .send(Ok(AgentEvent::Finish {
                        reason: "tool_error".to_string(),
                    }))
                    .await;
                return Ok(());
            }
        }
    }
}

/// Adapts a [`mpsc::Receiver`] into a [`Stream`] without pulling in an extra crate for it.
struct AgentEventReceiver {
    rx: mpsc::Receiver<Result<AgentEvent, GatewayError>>,
}

impl Stream for AgentEventReceiver {
    type Item = Result<AgentEvent, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::backend_client::BackendEventStream;
    use crate::gateway::tool_registry::{ArgField, ArgSchema, ArgType, ToolBinding, ToolOutput};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    struct ScriptedBackend {
        turns: std::sync::Mutex<Vec<Vec<BackendEvent>>>,
    }

    #[async_trait]
    impl BackendClient for ScriptedBackend {
        async fn complete(
            &self,
            _messages: &[Message],
            _tool_decls: &[ToolDeclaration],
            _params: &BackendParams,
        ) -> Result<Message, GatewayError> {
            let events = self.turns.lock().unwrap().remove(0);
            let mut content = String::new();
            let mut tool_calls = Vec::new();
            for event in events {
                match event {
                    BackendEvent::TextDelta(d) => content.push_str(&d),
                    BackendEvent::ToolCall { id, name, arguments } => {
                        tool_calls.push(ToolCall { id, name, arguments })
                    }
                    BackendEvent::Finish { .. } => {}
                }
            }
            if tool_calls.is_empty() {
                Ok(Message::assistant(content))
            } else {
                Ok(Message::assistant_with_tool_calls(content, tool_calls))
            }
        }

        async fn stream(
            &self,
            _messages: &[Message],
            _tool_decls: &[ToolDeclaration],
            _params: &BackendParams,
        ) -> Result<BackendEventStream, GatewayError> {
            let events = self.turns.lock().unwrap().remove(0);
            Ok(Box::pin(futures_util::stream::iter(
                events.into_iter().map(Ok),
            )))
        }
    }

    fn current_time_registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::new().with_tool(ToolBinding::new(
            "current_time",
            "Returns the current time",
            ArgSchema::new(),
            Arc::new(|_args: serde_json::Value| async move {
                Ok(ToolOutput::text("2024-01-01T00:00:00Z"))
            }),
        )))
    }

    fn failing_registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::new().with_tool(ToolBinding::new(
            "flaky",
            "Always fails",
            ArgSchema::new(),
            Arc::new(|_args: serde_json::Value| async move {
                Err(crate::gateway::tool_registry::InvocationError("boom".into()))
            }),
        )))
    }

    #[tokio::test]
    async fn finishes_immediately_when_assistant_has_no_tool_calls() {
        let backend = Arc::new(ScriptedBackend {
            turns: std::sync::Mutex::new(vec![vec![BackendEvent::TextDelta("hi".into())]]),
        });
        let runtime = AgentRuntime::new(backend, current_time_registry());
        let (message, reason) = runtime
            .run_unary(
                vec![Message::user("hello")],
                vec![],
                BackendParams::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert_eq!(message.content, "hi");
        assert_eq!(reason, "stop");
    }

    #[tokio::test]
    async fn dispatches_tool_call_then_produces_final_message() {
        let backend = Arc::new(ScriptedBackend {
            turns: std::sync::Mutex::new(vec![
                vec![BackendEvent::ToolCall {
                    id: "call_1".into(),
                    name: "current_time".into(),
                    arguments: json!({}),
                }],
                vec![BackendEvent::TextDelta(
                    "The time is 2024-01-01T00:00:00Z".into(),
                )],
            ]),
        });
        let runtime = AgentRuntime::new(backend, current_time_registry());
        let (message, reason) = runtime
            .run_unary(
                vec![Message::user("what time is it?")],
                vec![],
                BackendParams::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert_eq!(message.content, "The time is 2024-01-01T00:00:00Z");
        assert_eq!(reason, "stop");
    }

    #[tokio::test]
    async fn repeated_same_tool_error_triggers_immediate_finish() {
        let backend = Arc::new(ScriptedBackend {
            turns: std::sync::Mutex::new(vec![
                vec![BackendEvent::ToolCall {
                    id: "call_1".into(),
                    name: "flaky".into(),
                    arguments: json!({}),
                }],
                vec![BackendEvent::ToolCall {
                    id: "call_2".into(),
                    name: "flaky".into(),
                    arguments: json!({}),
                }],
                vec![BackendEvent::TextDelta("unreachable".into())],
            ]),
        });
        let runtime = AgentRuntime::new(backend, failing_registry());
        let (_message, reason) = runtime
            .run_unary(
                vec![Message::user("try twice")],
                vec![],
                BackendParams::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert_eq!(reason, "tool_error");
    }

    fn requires_arg_registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::new().with_tool(ToolBinding::new(
            "needs_arg",
            "requires `n`",
            ArgSchema::new().with_field(ArgField::new("n", ArgType::Integer).required()),
            Arc::new(|_args: serde_json::Value| async move { Ok(ToolOutput::text("ok")) }),
        )))
    }

    #[tokio::test]
    async fn repeated_same_tool_validation_failures_do_not_trigger_finish() {
        let backend = Arc::new(ScriptedBackend {
            turns: std::sync::Mutex::new(vec![
                vec![BackendEvent::ToolCall {
                    id: "call_1".into(),
                    name: "needs_arg".into(),
                    arguments: json!({}),
                }],
                vec![BackendEvent::ToolCall {
                    id: "call_2".into(),
                    name: "needs_arg".into(),
                    arguments: json!({}),
                }],
                vec![BackendEvent::TextDelta("self-corrected".into())],
            ]),
        });
        let runtime = AgentRuntime::new(backend, requires_arg_registry());
        let (message, reason) = runtime
            .run_unary(
                vec![Message::user("call it wrong twice")],
                vec![],
                BackendParams::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert_eq!(message.content, "self-corrected");
        assert_eq!(reason, "stop");
    }

    #[tokio::test]
    async fn reaching_max_steps_reports_length() {
        let turns = (0..3)
            .map(|i| {
                vec![BackendEvent::ToolCall {
                    id: format!("call_{i}"),
                    name: "current_time".into(),
                    arguments: json!({}),
                }]
            })
            .collect();
        let backend = Arc::new(ScriptedBackend {
            turns: std::sync::Mutex::new(turns),
        });
        let runtime = AgentRuntime::new(backend, current_time_registry()).with_max_steps(3);
        let (_message, reason) = runtime
            .run_unary(
                vec![Message::user("loop")],
                vec![],
                BackendParams::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert_eq!(reason, "length");
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_the_first_think() {
        let backend = Arc::new(ScriptedBackend {
            turns: std::sync::Mutex::new(vec![vec![BackendEvent::TextDelta("never".into())]]),
        });
        let runtime = AgentRuntime::new(backend, current_time_registry());
        let cancel = Arc::new(AtomicBool::new(true));
        let result = runtime
            .run_unary(vec![Message::user("hi")], vec![], BackendParams::default(), cancel)
            .await;
        assert!(matches!(result, Err(GatewayError::Cancelled)));
    }

    #[tokio::test]
    async fn streaming_run_forwards_text_deltas_then_finish() {
        let backend = Arc::new(ScriptedBackend {
            turns: std::sync::Mutex::new(vec![vec![
                BackendEvent::TextDelta("Hello ".into()),
                BackendEvent::TextDelta("world".into()),
                BackendEvent::Finish {
                    reason: "stop".into(),
                },
            ]]),
        });
        let runtime = Arc::new(AgentRuntime::new(backend, current_time_registry()));
        let mut stream = runtime.run_streaming(
            vec![Message::user("hi")],
            vec![],
            BackendParams::default(),
            Arc::new(AtomicBool::new(false)),
        );
        let mut deltas = Vec::new();
        let mut saw_finish = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                AgentEvent::TextDelta(d) => deltas.push(d),
                AgentEvent::Finish { reason } => {
                    assert_eq!(reason, "stop");
                    saw_finish = true;
                }
                _ => {}
            }
        }
        assert_eq!(deltas, vec!["Hello ".to_string(), "world".to_string()]);
        assert!(saw_finish);
    }

    #[tokio::test]
    async fn streaming_run_emits_tool_call_intent_before_results() {
        let backend = Arc::new(ScriptedBackend {
            turns: std::sync::Mutex::new(vec![
                vec![
                    BackendEvent::ToolCall {
                        id: "call_1".into(),
                        name: "current_time".into(),
                        arguments: json!({}),
                    },
                    BackendEvent::Finish {
                        reason: "tool_calls".into(),
                    },
                ],
                vec![
                    BackendEvent::TextDelta("done".into()),
                    BackendEvent::Finish {
                        reason: "stop".into(),
                    },
                ],
            ]),
        });
        let runtime = Arc::new(AgentRuntime::new(backend, current_time_registry()));
        let mut stream = runtime.run_streaming(
            vec![Message::user("what time is it")],
            vec![],
            BackendParams::default(),
            Arc::new(AtomicBool::new(false)),
        );
        let mut saw_intent_before_result = false;
        let mut saw_intent = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                AgentEvent::ToolCallIntent(calls) => {
                    assert_eq!(calls.len(), 1);
                    saw_intent = true;
                }
                AgentEvent::ToolResult { .. } => {
                    if saw_intent {
                        saw_intent_before_result = true;
                    }
                }
                _ => {}
            }
        }
        assert!(saw_intent_before_result);
    }

    #[tokio::test]
    async fn streaming_tool_result_carries_the_artifact_through() {
        let registry = Arc::new(ToolRegistry::new().with_tool(ToolBinding::new(
            "make_image",
            "produces an artifact",
            ArgSchema::new(),
            Arc::new(|_args: serde_json::Value| async move {
                Ok(ToolOutput::with_artifact(
                    "generated an image",
                    "https://gateway.example/images/abc.png",
                ))
            }),
        )));
        let backend = Arc::new(ScriptedBackend {
            turns: std::sync::Mutex::new(vec![
                vec![
                    BackendEvent::ToolCall {
                        id: "call_1".into(),
                        name: "make_image".into(),
                        arguments: json!({}),
                    },
                    BackendEvent::Finish {
                        reason: "tool_calls".into(),
                    },
                ],
                vec![BackendEvent::Finish {
                    reason: "stop".into(),
                }],
            ]),
        });
        let runtime = Arc::new(AgentRuntime::new(backend, registry));
        let mut stream = runtime.run_streaming(
            vec![Message::user("draw a cat")],
            vec![],
            BackendParams::default(),
            Arc::new(AtomicBool::new(false)),
        );
        let mut seen_artifact = None;
        while let Some(event) = stream.next().await {
            if let AgentEvent::ToolResult { artifact, .. } = event.unwrap() {
                seen_artifact = artifact;
            }
        }
        assert_eq!(
            seen_artifact.as_deref(),
            Some("https://gateway.example/images/abc.png")
        );
    }

    #[tokio::test]
    async fn tool_dispatch_runs_concurrently() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let registry = Arc::new(ToolRegistry::new().with_tool(ToolBinding::new(
            "slow",
            "sleeps briefly",
            ArgSchema::new().with_field(ArgField::new("n", ArgType::Integer)),
            Arc::new(move |_args: serde_json::Value| {
                let counter = Arc::clone(&counter_clone);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    Ok(ToolOutput::text("ok"))
                }
            }),
        )));
        let backend = Arc::new(ScriptedBackend {
            turns: std::sync::Mutex::new(vec![
                vec![
                    BackendEvent::ToolCall {
                        id: "call_1".into(),
                        name: "slow".into(),
                        arguments: json!({}),
                    },
                    BackendEvent::ToolCall {
                        id: "call_2".into(),
                        name: "slow".into(),
                        arguments: json!({}),
                    },
                ],
                vec![BackendEvent::TextDelta("done".into())],
            ]),
        });
        let runtime = AgentRuntime::new(backend, registry);
        let start = tokio::time::Instant::now();
        let _ = runtime
            .run_unary(
                vec![Message::user("go")],
                vec![],
                BackendParams::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() < std::time::Duration::from_millis(25));
    }
}
