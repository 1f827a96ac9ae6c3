//! Image generation endpoint glue for `POST /images/generations`.
//!
//! The concrete generator backend is out of core scope (§1 "Out of scope"): this module defines
//! the request/response shapes and a thin OpenAI-compatible client, and wires a generator's output
//! through the blob store so `response_format=url` responses resolve to a gateway-served URL
//! rather than whatever the upstream generator itself returned.

use crate::gateway::blob_store::BlobStore;
use crate::gateway::error::GatewayError;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct ImageGenerationRequest {
    pub prompt: String,
    #[serde(default = "default_n")]
    pub n: u32,
    #[serde(default = "default_size")]
    pub size: String,
    #[serde(default = "default_response_format")]
    pub response_format: String,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_n() -> u32 {
    1
}

fn default_size() -> String {
    "1024x1024".to_string()
}

fn default_response_format() -> String {
    "url".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "b64_json")]
    pub b64_json: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageGenerationResponse {
    pub created: i64,
    pub data: Vec<ImageData>,
}

/// Generator-agnostic capability: produce one or more images for a prompt, each returned as raw
/// bytes plus a content type. Concrete upstream wiring (model name, auth) lives on the
/// implementation; this is the only shape the gateway's HTTP layer depends on.
#[async_trait]
pub trait ImageGenerationClient: Send + Sync {
    async fn generate(&self, prompt: &str, n: u32, size: &str) -> Result<Vec<(Vec<u8>, String)>, GatewayError>;
}

/// An OpenAI-compatible `images/generations` client returning base64-encoded PNGs, the shape the
/// gateway then always re-hosts through its own blob store.
pub struct OpenAiImageClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiImageClient {
    pub fn new(http_client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl ImageGenerationClient for OpenAiImageClient {
    async fn generate(&self, prompt: &str, n: u32, size: &str) -> Result<Vec<(Vec<u8>, String)>, GatewayError> {
        let url = format!("{}/images/generations", self.base_url.trim_end_matches('/'));
        let mut req = self.http_client.post(url).json(&serde_json::json!({
            "prompt": prompt,
            "n": n,
            "size": size,
            "response_format": "b64_json",
        }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| GatewayError::BackendTransient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::BackendFatal(format!("{}: {}", status, text)));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::BackendFatal(e.to_string()))?;
        let entries = body
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();

        let mut images = Vec::with_capacity(entries.len());
        for entry in entries {
            let b64 = entry
                .get("b64_json")
                .and_then(|v| v.as_str())
                .ok_or_else(|| GatewayError::BackendFatal("image response missing b64_json".into()))?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| GatewayError::BackendFatal(e.to_string()))?;
            images.push((bytes, "image/png".to_string()));
        }
        Ok(images)
    }
}

/// Runs a generator, persists each image through the blob store, and assembles the response
/// shape `/images/generations` returns: public URLs when `response_format=url`, inline base64
/// otherwise.
pub async fn generate_images(
    generator: &dyn ImageGenerationClient,
    blob_store: &dyn BlobStore,
    request: &ImageGenerationRequest,
) -> Result<ImageGenerationResponse, GatewayError> {
    let images = generator
        .generate(&request.prompt, request.n, &request.size)
        .await?;

    let mut data = Vec::with_capacity(images.len());
    for (bytes, content_type) in images {
        if request.response_format == "b64_json" {
            data.push(ImageData {
                url: None,
                b64_json: Some(base64::engine::general_purpose::STANDARD.encode(&bytes)),
            });
            continue;
        }
        let name = format!("{}.png", Uuid::new_v4());
        blob_store
            .save("generated", &name, bytes::Bytes::from(bytes), &content_type)
            .await?;
        data.push(ImageData {
            url: Some(blob_store.resolve_public_url(&name)),
            b64_json: None,
        });
    }

    Ok(ImageGenerationResponse {
        created: 0,
        data,
    })
}
