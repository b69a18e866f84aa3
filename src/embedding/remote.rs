//! HTTP embedding backends (Ollama, OpenAI).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use tracing::warn;

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{NotesError, Result};

/// Embedding backend using a local Ollama instance.
///
/// Calls `POST {url}/api/embed`. Requires Ollama to be running with an
/// embedding model pulled (e.g. `ollama pull all-minilm`).
pub struct OllamaEmbedder {
    client: Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: build_client("ollama", config.timeout_secs)?,
            url: config.endpoint(),
            model: config.model_name(),
            dims: config.resolved_dims().unwrap_or_default(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url);
        let json = send_with_retry("ollama", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await?;
        parse_ollama_response(&json)
    }
}

/// Embedding backend using the OpenAI API.
///
/// Calls `POST {url}/v1/embeddings`; reads the key from `OPENAI_API_KEY`.
pub struct OpenAiEmbedder {
    client: Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
    api_key: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            NotesError::EmbeddingUnavailable {
                backend: "openai".to_string(),
                reason: "OPENAI_API_KEY environment variable not set".to_string(),
            }
        })?;
        Ok(Self {
            client: build_client("openai", config.timeout_secs)?,
            url: config.endpoint(),
            model: config.model_name(),
            dims: config.resolved_dims().unwrap_or_default(),
            max_retries: config.max_retries,
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/v1/embeddings", self.url);
        let json = send_with_retry("openai", self.max_retries, || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        parse_openai_response(&json)
    }
}

fn build_client(backend: &str, timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| unavailable(backend, e.to_string()))
}

fn unavailable(backend: &str, reason: impl Into<String>) -> NotesError {
    NotesError::EmbeddingUnavailable {
        backend: backend.to_string(),
        reason: reason.into(),
    }
}

/// Send a request built by `request`, retrying transient failures.
async fn send_with_retry<F>(
    backend: &str,
    max_retries: u32,
    request: F,
) -> Result<serde_json::Value>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| unavailable(backend, format!("invalid response body: {}", e)));
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = unavailable(backend, format!("API error {}: {}", status, body_text));

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(backend, attempt, %status, "Embedding request failed, retrying");
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                warn!(backend, attempt, error = %e, "Embedding request failed");
                last_err = Some(unavailable(backend, format!("connection error: {}", e)));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| unavailable(backend, "embedding failed after retries")))
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| unavailable("ollama", "invalid response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| to_f32(values))
                .ok_or_else(|| unavailable("ollama", "invalid response: embedding is not an array"))
        })
        .collect()
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| unavailable("openai", "invalid response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| unavailable("openai", "invalid response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, to_f32(embedding)));
    }

    // Order must match the input order.
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn to_f32(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}
