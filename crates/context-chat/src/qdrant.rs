//! Qdrant-backed [`VectorIndex`] over the REST API.
//!
//! Issues `POST {url}/collections/{collection}/points/search` with
//! `{ vector, limit, with_payload: true }` and maps `result[]` entries to
//! [`IndexHit`]s. One long-lived `reqwest::Client` is shared by every
//! request; it carries no per-request state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use context_chat_core::error::IndexError;
use context_chat_core::index::{IndexHit, VectorIndex};

use crate::config::RetrievalConfig;

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

pub struct QdrantIndex {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl QdrantIndex {
    pub fn new(config: &RetrievalConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        let url = format!("{}/collections/{}/points/search", self.url, collection);
        tracing::debug!("POST {url} (limit {limit})");

        let mut request = self.client.post(&url).json(&SearchRequest {
            vector,
            limit,
            with_payload: true,
        });
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IndexError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(IndexError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| IndexError::Malformed(e.to_string()))?;

        Ok(body
            .result
            .into_iter()
            .map(|p| IndexHit {
                score: p.score,
                payload: p.payload.unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }
}
