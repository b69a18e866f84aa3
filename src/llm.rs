//! LLM client used to generate answers.
//!
//! [`OllamaClient`] talks to an Ollama server's `/api/generate` endpoint
//! without streaming. Any failure to get a completion (connection refused,
//! timeout, non-success status, malformed body) is reported as
//! [`NotesError::LlmUnreachable`] naming the host.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{NotesError, Result};

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
    fn model_name(&self) -> &str;
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaClient {
    host: String,
    model: String,
    timeout: Duration,
    client: OnceCell<Client>,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            client: OnceCell::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn unreachable(&self, reason: impl Into<String>) -> NotesError {
        NotesError::LlmUnreachable {
            host: self.host.clone(),
            reason: reason.into(),
        }
    }

    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async {
                Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .map_err(|e| self.unreachable(e.to_string()))
            })
            .await
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let client = self.client().await?;
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        debug!(model = %self.model, prompt_chars = prompt.len(), "Calling LLM");
        let response = client
            .post(format!("{}/api/generate", self.host))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.unreachable(format!("HTTP {}: {}", status, text)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| self.unreachable(format!("invalid response body: {}", e)))?;
        Ok(parsed.response.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
