//! Backend client: binds a model definition to a concrete chat backend (§4.D).
//!
//! A [`BackendClient`] speaks two shapes to the agent runtime and the completion manager: a
//! blocking [`BackendClient::complete`] and an incremental [`BackendClient::stream`]. Both accept
//! the same normalized [`Message`] list and [`ToolDeclaration`] set; the vocabulary of
//! [`BackendEvent`]s a `stream` call produces is the only thing the agent runtime (§4.E) ever
//! looks at, so a new upstream only has to implement this trait once to be usable by both the
//! proxy-less agent path and (indirectly) by anything that calls `complete`/`stream` directly.

use crate::gateway::client_wrapper::{Message, ToolDeclaration};
use crate::gateway::error::GatewayError;
use async_trait::async_trait;
use futures_util::stream::Stream;
use std::pin::Pin;
use std::time::Duration;

/// Backend-level parameters forwarded from a model definition's `model_parameters` map
/// (temperature, top_p, max_tokens, …) plus the concrete `model_id` to request.
#[derive(Debug, Clone, Default)]
pub struct BackendParams {
    pub model_id: String,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One incremental event produced by [`BackendClient::stream`].
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// An incremental slice of assistant text. Forwarded to the output channel immediately.
    TextDelta(String),
    /// A tool call the assistant wants to make, only known once the backend has finished
    /// emitting the assistant message (buffered, then surfaced as a single synthetic event).
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// The backend has nothing further to add for this call; carries the reason the upstream
    /// reported (`"stop"`, `"tool_calls"`, `"length"`, …).
    Finish { reason: String },
}

pub type BackendEventStream = Pin<Box<dyn Stream<Item = Result<BackendEvent, GatewayError>> + Send>>;

/// Protocol-level details of a concrete upstream (authentication headers, payload shape) live
/// behind this trait; the agent runtime only ever sees [`Message`] and [`BackendEvent`].
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Non-streaming call: blocks until the final assistant [`Message`] is available.
    async fn complete(
        &self,
        messages: &[Message],
        tool_decls: &[ToolDeclaration],
        params: &BackendParams,
    ) -> Result<Message, GatewayError>;

    /// Streaming call: yields [`BackendEvent`]s as the upstream produces them. A call that fails
    /// transiently (connection reset, 5xx, timeout) is retried internally per
    /// [`RetryPolicy::DEFAULT`]; `stream` only ever resumes from the start of a fresh call, never
    /// mid-stream.
    async fn stream(
        &self,
        messages: &[Message],
        tool_decls: &[ToolDeclaration],
        params: &BackendParams,
    ) -> Result<BackendEventStream, GatewayError>;
}

/// Exponential backoff with full jitter, bounded by a fixed attempt cap — the policy
/// [`BackendClient`] implementations apply around a single upstream call for
/// [`GatewayError::BackendTransient`]-shaped failures. Authentication/fatal failures (§7) are
/// never retried: callers should classify the upstream response before deciding whether to loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(4),
    };

    /// Full-jitter delay before attempt `attempt` (0-indexed retry count, i.e. 0 on the first
    /// retry after the initial attempt failed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis().saturating_mul(1u128 << attempt.min(16));
        let capped = exp.min(self.max_delay.as_millis());
        let jittered = rand::random::<u64>() % (capped as u64).max(1);
        Duration::from_millis(jittered)
    }
}

/// Run `attempt` up to [`RetryPolicy::max_attempts`] times, retrying only when the returned error
/// is [`GatewayError::BackendTransient`]. Any other error (including
/// [`GatewayError::BackendFatal`]) returns immediately without consuming further attempts.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut attempt: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, GatewayError>>,
{
    let mut last_err = None;
    for n in 0..policy.max_attempts {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(GatewayError::BackendTransient(msg)) => {
                last_err = Some(GatewayError::BackendTransient(msg));
                if n + 1 < policy.max_attempts {
                    tokio::time::sleep(policy.delay_for_attempt(n)).await;
                }
            }
            Err(other) => return Err(other),
        }
    }
    Err(last_err.unwrap_or_else(|| GatewayError::BackendTransient("retry budget exhausted".into())))
}
