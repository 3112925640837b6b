//! Backend capability set and the HTTP implementation for the three
//! dialects' public APIs.

use std::pin::Pin;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::translate::Protocol;

/// Native stream chunks (or events) as JSON, in upstream order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[async_trait]
pub trait Backend: Send + Sync {
    /// Dialect spoken by this backend.
    fn protocol(&self) -> Protocol;

    /// Validate credentials and settings before the first call.
    async fn initialize(&self) -> Result<()>;

    async fn generate_content(&self, model: &str, body: Value) -> Result<Value>;

    async fn generate_content_stream(&self, model: &str, body: Value) -> Result<ChunkStream>;

    /// Native model list. Claude listings are shaped `{models: [...]}`.
    async fn list_models(&self) -> Result<Value>;
}

/// API-key backend for OpenAI-compatible, Claude and Gemini endpoints.
pub struct HttpBackend {
    protocol: Protocol,
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpBackend {
    pub fn new(
        protocol: Protocol,
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            protocol,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &ProxyConfig, client: Client) -> Result<Self> {
        Ok(Self::new(
            config.protocol()?,
            client,
            config.effective_base_url()?,
            config.resolve_api_key()?,
        ))
    }

    fn generate_url(&self, model: &str, stream: bool) -> String {
        match self.protocol {
            Protocol::OpenAi => format!("{}/chat/completions", self.base_url),
            Protocol::Claude => format!("{}/v1/messages", self.base_url),
            Protocol::Gemini if stream => format!(
                "{}/models/{}:streamGenerateContent?alt=sse&key={}",
                self.base_url, model, self.api_key
            ),
            Protocol::Gemini => format!(
                "{}/models/{}:generateContent?key={}",
                self.base_url, model, self.api_key
            ),
        }
    }

    fn models_url(&self) -> String {
        match self.protocol {
            Protocol::OpenAi => format!("{}/models", self.base_url),
            Protocol::Claude => format!("{}/v1/models", self.base_url),
            Protocol::Gemini => format!("{}/models?key={}", self.base_url, self.api_key),
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.protocol {
            Protocol::OpenAi => builder.bearer_auth(&self.api_key),
            Protocol::Claude => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            Protocol::Gemini => builder,
        }
    }

    /// Put the backend model name where the dialect expects it.
    fn prepare_body(&self, model: &str, mut body: Value, stream: bool) -> Value {
        if let Value::Object(map) = &mut body {
            match self.protocol {
                Protocol::Gemini => {
                    map.remove("model");
                }
                Protocol::OpenAi | Protocol::Claude => {
                    map.insert("model".to_string(), Value::String(model.to_string()));
                    map.insert("stream".to_string(), Value::Bool(stream));
                }
            }
            if stream && self.protocol == Protocol::OpenAi {
                map.insert("stream_options".to_string(), json!({"include_usage": true}));
            }
        }
        body
    }

    async fn post(&self, model: &str, body: Value, stream: bool) -> Result<Response> {
        let url = self.generate_url(model, stream);
        let body = self.prepare_body(model, body, stream);
        debug!(protocol = %self.protocol, model, stream, "upstream request");

        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(protocol = %self.protocol, error = %e, "upstream request failed");
                ProxyError::provider(format!("Request failed: {e}"))
            })?;
        ensure_success(response).await
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProxyError::upstream(status.as_u16(), truncate(&body, 500)))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn initialize(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(ProxyError::config(format!(
                "{} backend has an empty API key",
                self.protocol
            )));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ProxyError::config(format!(
                "Backend base URL must be http(s): {}",
                self.base_url
            )));
        }
        info!(protocol = %self.protocol, base_url = %self.base_url, "backend ready");
        Ok(())
    }

    async fn generate_content(&self, model: &str, body: Value) -> Result<Value> {
        let response = self.post(model, body, false).await?;
        let text = response
            .text()
            .await
            .map_err(|e| ProxyError::provider(format!("Failed to read response body: {e}")))?;
        serde_json::from_str(&text).map_err(|e| {
            ProxyError::translation(format!(
                "Failed to parse backend response: {e}. Body: {}",
                truncate(&text, 300)
            ))
        })
    }

    async fn generate_content_stream(&self, model: &str, body: Value) -> Result<ChunkStream> {
        let response = self.post(model, body, true).await?;
        let protocol = self.protocol;

        let chunks = response
            .bytes_stream()
            .eventsource()
            .filter_map(move |result| async move {
                match result {
                    Ok(event) => {
                        let data = event.data.trim();
                        if data.is_empty() || data == "[DONE]" {
                            return None;
                        }
                        match serde_json::from_str::<Value>(data) {
                            Ok(chunk) => Some(Ok(chunk)),
                            Err(e) => {
                                debug!(%protocol, error = %e, data, "skipping unparseable SSE chunk");
                                None
                            }
                        }
                    }
                    Err(e) => Some(Err(ProxyError::provider(format!("Stream error: {e}")))),
                }
            });

        Ok(Box::pin(chunks))
    }

    async fn list_models(&self) -> Result<Value> {
        let url = self.models_url();
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ProxyError::provider(format!("Model listing failed: {e}")))?;
        let mut listing: Value = ensure_success(response).await?.json().await?;

        if self.protocol == Protocol::Claude {
            let data = listing.get_mut("data").map(Value::take);
            if let Some(data) = data {
                listing = json!({ "models": data });
            }
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(protocol: Protocol) -> HttpBackend {
        HttpBackend::new(protocol, Client::new(), "https://example.test/v1/", "sk-test")
    }

    #[test]
    fn test_urls_per_protocol() {
        assert_eq!(
            backend(Protocol::OpenAi).generate_url("gpt-4o", true),
            "https://example.test/v1/chat/completions"
        );
        let claude = HttpBackend::new(Protocol::Claude, Client::new(), "https://api.anthropic.com", "k");
        assert_eq!(claude.models_url(), "https://api.anthropic.com/v1/models");
        assert_eq!(
            backend(Protocol::Gemini).generate_url("gemini-2.5-pro", true),
            "https://example.test/v1/models/gemini-2.5-pro:streamGenerateContent?alt=sse&key=sk-test"
        );
    }

    #[test]
    fn test_prepare_body() {
        let openai = backend(Protocol::OpenAi).prepare_body("gpt-4o", json!({"model": "x"}), true);
        assert_eq!(openai["model"], "gpt-4o");
        assert_eq!(openai["stream"], true);
        assert_eq!(openai["stream_options"]["include_usage"], true);

        let gemini = backend(Protocol::Gemini).prepare_body("g", json!({"model": "x", "contents": []}), false);
        assert!(gemini.get("model").is_none());
        assert!(gemini.get("stream").is_none());
    }

    #[tokio::test]
    async fn test_initialize_rejects_empty_key() {
        let backend = HttpBackend::new(Protocol::OpenAi, Client::new(), "https://x.test", " ");
        assert!(matches!(
            backend.initialize().await,
            Err(ProxyError::Config { .. })
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
