//! Embedding provider implementations.
//!
//! Implements the core [`Embedder`] trait for:
//! - **[`GeminiEmbedder`]**: calls the Gemini `embedContent` endpoint.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`DisabledEmbedder`]**: re-exported from core; retrieval is skipped.
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to instantiate the provider named by the
//! configuration:
//!
//! ```rust,no_run
//! # use context_chat::config::EmbeddingConfig;
//! # use context_chat::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```
//!
//! Requests are bounded by `embedding.timeout_secs` and are not retried: a
//! failed embedding only degrades retrieval for that one request.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use context_chat_core::embedding::{DisabledEmbedder, Embedder};
use context_chat_core::error::EmbeddingError;

use crate::config::EmbeddingConfig;

const GEMINI_DEFAULT_URL: &str = "https://generativelanguage.googleapis.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Build the embedder named by `embedding.provider`.
///
/// # Errors
///
/// Returns an error for unknown providers, missing `model`/`dims`, or a
/// missing API key for Gemini.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "gemini" => Ok(Arc::new(GeminiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn request_error(e: reqwest::Error) -> EmbeddingError {
    if e.is_timeout() {
        EmbeddingError::Request("request timed out".to_string())
    } else {
        EmbeddingError::Request(e.to_string())
    }
}

// ============ Gemini Provider ============

/// Embedding provider using the Gemini API.
///
/// Calls `POST {url}/v1beta/models/{model}:embedContent`. The API key is
/// read from the environment variable named by `embedding.api_key_env`.
pub struct GeminiEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: String,
}

impl GeminiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Gemini provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Gemini provider"))?;
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| GEMINI_DEFAULT_URL.to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "content": { "parts": [{ "text": text }] },
        });

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:embedContent",
                self.url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Request(format!(
                "Gemini API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response.json().await.map_err(request_error)?;
        parse_gemini_response(&json)
    }
}

/// Extract `embedding.values` from an `embedContent` response.
fn parse_gemini_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    let values = json
        .pointer("/embedding/values")
        .and_then(|v| v.as_array())
        .ok_or_else(|| EmbeddingError::Malformed("missing embedding.values".into()))?;

    to_vector(values)
}

/// Convert a JSON number array, rejecting any non-numeric element.
fn to_vector(values: &[serde_json::Value]) -> Result<Vec<f32>, EmbeddingError> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::Malformed("non-numeric embedding value".into()))
        })
        .collect()
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
/// Requires Ollama to be running with an embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
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

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                EmbeddingError::Request(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Request(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response.json().await.map_err(request_error)?;
        parse_ollama_response(&json)
    }
}

/// Extract the first vector from an `/api/embed` response.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbeddingError::Malformed("missing embeddings array".into()))?;

    to_vector(first)
}
