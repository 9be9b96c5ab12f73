//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the only thing the retriever knows about
//! the document index. Production uses Qdrant (see the app crate); tests
//! and local development use [`InMemoryIndex`].

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::embedding::cosine_similarity;
use crate::error::IndexError;

/// One nearest-neighbour match, in descending-similarity order.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub score: f32,
    /// Arbitrary point payload; the passage text lives under `content`.
    pub payload: Value,
}

impl IndexHit {
    /// The `payload.content` string, if present.
    pub fn content(&self) -> Option<&str> {
        self.payload.get("content").and_then(Value::as_str)
    }
}

/// Nearest-neighbour search over a named collection.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError>;
}

struct StoredPoint {
    collection: String,
    vector: Vec<f32>,
    payload: Value,
}

/// Brute-force cosine index for tests and local runs.
pub struct InMemoryIndex {
    points: RwLock<Vec<StoredPoint>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(Vec::new()),
        }
    }

    /// Add a point whose payload is `{ "content": content }`.
    pub fn insert(&self, collection: &str, vector: Vec<f32>, content: &str) {
        self.insert_payload(collection, vector, serde_json::json!({ "content": content }));
    }

    pub fn insert_payload(&self, collection: &str, vector: Vec<f32>, payload: Value) {
        let mut points = self.points.write().unwrap_or_else(|e| e.into_inner());
        points.push(StoredPoint {
            collection: collection.to_string(),
            vector,
            payload,
        });
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        let points = self.points.read().unwrap_or_else(|e| e.into_inner());
        let mut hits: Vec<IndexHit> = points
            .iter()
            .filter(|p| p.collection == collection)
            .map(|p| IndexHit {
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
