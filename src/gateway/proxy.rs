//! Pass-through proxy provider (§4.H), used for `type=openai` model definitions.
//!
//! Forwards a chat-completion request byte-for-byte to an external OpenAI-compatible upstream:
//! one POST and a parsed body for non-streaming requests, or a copied SSE connection for
//! streaming ones. The gateway never interprets the upstream's response shape beyond finding
//! frame boundaries.

use crate::gateway::error::GatewayError;
use crate::gateway::model_definition::ModelDefinition;
use crate::gateway::openai_adapter::SSE_DONE;
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde_json::Value;
use std::pin::Pin;

pub type ProxyByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

/// Binds an HTTP client and a process-wide default upstream URL (used when a model definition
/// doesn't override `url`).
pub struct ProxyProvider {
    http_client: reqwest::Client,
    default_upstream_url: String,
}

impl ProxyProvider {
    pub fn new(http_client: reqwest::Client, default_upstream_url: impl Into<String>) -> Self {
        Self {
            http_client,
            default_upstream_url: default_upstream_url.into(),
        }
    }

    fn upstream_url(&self, model: &ModelDefinition) -> String {
        model
            .url
            .clone()
            .unwrap_or_else(|| self.default_upstream_url.clone())
    }

    fn request(
        &self,
        model: &ModelDefinition,
        headers: &[(String, String)],
        body: &Value,
    ) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/chat/completions",
            self.upstream_url(model).trim_end_matches('/')
        );
        let mut req = self.http_client.post(url).json(body);
        for (key, value) in headers {
            req = req.header(key, value);
        }
        req
    }

    /// Single POST, parsed body returned unchanged to the caller.
    pub async fn complete_unary(
        &self,
        model: &ModelDefinition,
        headers: &[(String, String)],
        body: Value,
    ) -> Result<Value, GatewayError> {
        let resp = self
            .request(model, headers, &body)
            .send()
            .await
            .map_err(|e| GatewayError::BackendFatal(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::BackendFatal(format!("{}: {}", status, text)));
        }
        resp.json()
            .await
            .map_err(|e| GatewayError::BackendFatal(e.to_string()))
    }

    /// Opens an SSE connection upstream and re-emits every `data:` frame verbatim, preserving
    /// ordering and terminating on the upstream's own `[DONE]` marker. A frame that fails to
    /// parse as an SSE event is logged and skipped, not treated as a stream failure.
    pub async fn stream(
        &self,
        model: &ModelDefinition,
        headers: &[(String, String)],
        body: Value,
    ) -> Result<ProxyByteStream, GatewayError> {
        let resp = self
            .request(model, headers, &body)
            .send()
            .await
            .map_err(|e| GatewayError::BackendFatal(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::BackendFatal(format!("{}: {}", status, text)));
        }

        let inner = resp.bytes_stream().eventsource();
        let stream = futures_util::stream::unfold(Some(inner), |state| async move {
            let mut inner = state?;
            loop {
                match inner.next().await {
                    None => return None,
                    Some(Err(e)) => {
                        log::warn!("proxy stream frame failed to decode: {}", e);
                        continue;
                    }
                    Some(Ok(event)) => {
                        if event.data == "[DONE]" {
                            return Some((Ok(Bytes::from_static(SSE_DONE.as_bytes())), None));
                        }
                        let frame = format!("data: {}\n\n", event.data);
                        return Some((Ok(Bytes::from(frame)), Some(inner)));
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
    use crate::gateway::model_definition::ModelType;

    fn model(url: Option<&str>) -> ModelDefinition {
        ModelDefinition {
            id: "m".into(),
            name: "m".into(),
            description: "".into(),
            owner: "".into(),
            model_type: ModelType::Openai,
            disabled: false,
            backend: None,
            system_prompts: vec![],
            model_parameters: serde_json::Map::new(),
            headers: vec![],
            tools: vec![],
            agents: vec![],
            example_prompts: vec![],
            url: url.map(|s| s.to_string()),
        }
    }

    #[test]
    fn model_url_override_takes_precedence_over_default() {
        let proxy = ProxyProvider::new(reqwest::Client::new(), "https://default.example");
        assert_eq!(
            proxy.upstream_url(&model(Some("https://override.example"))),
            "https://override.example"
        );
    }

    #[test]
    fn falls_back_to_default_url_when_model_has_none() {
        let proxy = ProxyProvider::new(reqwest::Client::new(), "https://default.example");
        assert_eq!(proxy.upstream_url(&model(None)), "https://default.example");
    }
}
