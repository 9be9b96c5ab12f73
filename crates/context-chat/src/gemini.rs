//! Gemini `generateContent` client.
//!
//! Implements the core [`Generator`] trait with one synchronous
//! `POST {base_url}/v1beta/models/{model}:generateContent` call per
//! invocation. A call succeeds only when the status is 2xx *and* the body
//! carries `candidates[0].content.parts[0].text`; anything else is a
//! [`GenerationError`] that includes the upstream `error.message` when the
//! body has one. Nothing is retried.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use context_chat_core::error::GenerationError;
use context_chat_core::generation::{Generator, PromptTurn};
use context_chat_core::models::GenerationResult;

use crate::config::GenerationConfig;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: &'a [PromptTurn],
}

/// Client for the hosted generation endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Config(e.to_string()))?;
        let base_url: String = base_url.into();

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    /// Build from configuration, reading the API key from the environment
    /// variable named by `generation.api_key_env`.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            GenerationError::Config(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;
        Self::new(
            &config.base_url,
            &config.model,
            Some(api_key),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, turns: &[PromptTurn]) -> Result<GenerationResult, GenerationError> {
        let url = self.endpoint();
        tracing::debug!("POST {url} ({} turns)", turns.len());

        let mut request = self.http.post(&url).json(&GenerateRequest { contents: turns });
        if let Some(key) = &self.api_key {
            request = request.header("x-goog-api-key", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::Network(e.to_string())
            }
        })?;
        let body: Option<Value> = serde_json::from_str(&body_text).ok();

        if !status.is_success() {
            let message = body
                .as_ref()
                .and_then(upstream_message)
                .unwrap_or_else(|| "Gemini API failed".to_string());
            tracing::warn!(status = status.as_u16(), %message, "generation endpoint returned an error");
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let body = body.ok_or_else(|| GenerationError::Malformed(truncate(&body_text, 200)))?;
        extract_text(&body).map(|text| GenerationResult { text })
    }
}

/// `error.message` from an error body.
fn upstream_message(body: &Value) -> Option<String> {
    body.pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `candidates[0].content.parts[0].text` from a success body.
fn extract_text(body: &Value) -> Result<String, GenerationError> {
    body.pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(GenerationError::EmptyResponse)
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
