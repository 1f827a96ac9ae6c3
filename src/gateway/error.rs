//! Crate-wide error type.
//!
//! `GatewayError` carries the error kinds enumerated in the gateway's design: config
//! unavailability, unknown models, request validation, per-tool failures that are recovered by
//! the agent runtime, backend transport failures, and request cancellation. The HTTP layer maps
//! each variant to the status code documented on the variant itself.

use thiserror::Error;

/// One of the gateway's recognized failure modes.
///
/// Variants prefixed `Tool*` are never surfaced to the HTTP layer directly: the agent runtime
/// catches them and feeds the message back to the model as a `tool` observation instead.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Neither a live config source nor a cached snapshot is available.
    #[error("configuration unavailable: {0}")]
    ConfigUnavailable(String),

    /// The requested logical model name is not present in the current snapshot.
    #[error("model {0} not found in the config")]
    ModelUnknown(String),

    /// The inbound HTTP request failed shape validation. Maps to HTTP 400.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A tool call's arguments failed schema validation. Recovered locally by the agent runtime.
    #[error("tool argument validation failed: {0}")]
    ToolValidationFailed(String),

    /// A tool invocation returned an error. Recovered locally by the agent runtime.
    #[error("tool invocation failed: {0}")]
    ToolInvocationFailed(String),

    /// A transient upstream failure (connection reset, 5xx, timeout) whose retry budget was
    /// exhausted. Maps to HTTP 503.
    #[error("backend transient error: {0}")]
    BackendTransient(String),

    /// A non-retryable upstream failure (auth, quota, unsupported model). Maps to the upstream's
    /// own 4xx/5xx status where known, else HTTP 502.
    #[error("backend fatal error: {0}")]
    BackendFatal(String),

    /// The client disconnected or cancelled the request mid-flight.
    #[error("request cancelled")]
    Cancelled,

    /// Blob store I/O failure distinct from a simple not-found.
    #[error("blob store I/O error: {0}")]
    BlobIoError(String),

    /// A blob lookup for a key that does not exist.
    #[error("blob not found: {0}")]
    BlobNotFound(String),
}

impl GatewayError {
    /// HTTP status code this error maps to when it propagates to the routing layer, per the
    /// error handling design (`model-unknown` is reported as HTTP 200 per OpenAI convention: the
    /// error surfaces as a body-level message, not a transport failure).
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            GatewayError::ConfigUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ModelUnknown(_) => StatusCode::OK,
            GatewayError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            GatewayError::ToolValidationFailed(_) | GatewayError::ToolInvocationFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::BackendTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BackendFatal(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Cancelled => StatusCode::from_u16(499).unwrap(),
            GatewayError::BlobIoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::BlobNotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}
