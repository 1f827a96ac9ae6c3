//! HTTP surface: assembles the `axum::Router` the binary serves (§6).
//!
//! Explicit constructor wiring, no runtime registration: [`build_router`] is called once at
//! process start with every dependency already constructed (§9 "Ad-hoc container / dependency
//! injection ... replaced by explicit constructor wiring").

use crate::gateway::completion_manager::{ChatOutcome, CompletionManager};
use crate::gateway::error::GatewayError;
use crate::gateway::image_generation::{generate_images, ImageGenerationClient, ImageGenerationRequest};
use crate::gateway::openai_adapter::ChatRequest;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub struct AppState {
    pub completion_manager: Arc<CompletionManager>,
    pub image_generator: Arc<dyn ImageGenerationClient>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/chat/completions", post(chat_completions))
        .route("/api/v1/images/generations", post(images_generations))
        .route("/api/v1/models", get(list_models))
        .route("/api/v1/health", get(health))
        .route("/api/v1/image_generation/{*path}", get(serve_blob))
        .with_state(state)
}

fn forwarded_auth_header(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| vec![("Authorization".to_string(), v.to_string())])
        .unwrap_or_default()
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Response {
    let model = request.model.clone();
    let path = "/api/v1/chat/completions";
    let forwarded = forwarded_auth_header(&headers);
    match state
        .completion_manager
        .handle_chat(request, forwarded)
        .await
    {
        Ok(ChatOutcome::Unary(body)) => {
            log::info!("POST {} model={} status=200", path, model);
            Json(body).into_response()
        }
        Ok(ChatOutcome::Stream(stream)) => {
            log::info!("POST {} model={} status=200 stream=true", path, model);
            let body = Body::from_stream(stream);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(body)
                .unwrap()
        }
        Err(err) => {
            log::warn!("POST {} model={} error={}", path, model, err);
            error_response(err)
        }
    }
}

async fn images_generations(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImageGenerationRequest>,
) -> Response {
    match generate_images(
        state.image_generator.as_ref(),
        state.completion_manager.blob_store().as_ref(),
        &request,
    )
    .await
    {
        Ok(response) => Json(response).into_response(),
        Err(err) => {
            log::error!("POST /api/v1/images/generations error={}", err);
            error_response(err)
        }
    }
}

async fn list_models(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.completion_manager.config_store().get().await;
    let data: Vec<_> = snapshot
        .definitions
        .iter()
        .map(|def| {
            json!({
                "id": def.name,
                "object": "model",
                "created": 0,
                "owned_by": def.owner,
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data })).into_response()
}

async fn health() -> Response {
    Json(json!({ "status": "OK" })).into_response()
}

async fn serve_blob(State(state): State<Arc<AppState>>, Path(path): Path<String>) -> Response {
    let blob_store = state.completion_manager.blob_store();
    match blob_store.read("generated", &path).await {
        Ok((stream, content_type)) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from_stream(stream))
            .unwrap(),
        Err(GatewayError::BlobNotFound(_)) => (StatusCode::NOT_FOUND, "File not found").into_response(),
        Err(err) => {
            log::error!("GET /api/v1/image_generation/{} error={}", path, err);
            error_response(err)
        }
    }
}

/// All other errors propagate as HTTP 5xx with a structured body (§7 "Propagation policy").
/// `model-unknown`/`validation-failed` are handled inline by their call sites above this function
/// and never reach it in normal operation; this is the fallback for everything else.
fn error_response(err: GatewayError) -> Response {
    let status = err.status_code();
    let body = json!({
        "message": err.to_string(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "trace_id": Uuid::new_v4().to_string(),
        "call_stack": format!("{:?}", err),
    });
    (status, Json(body)).into_response()
}
