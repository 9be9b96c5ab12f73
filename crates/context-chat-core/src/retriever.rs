//! Fail-soft context retrieval.
//!
//! [`ContextRetriever::search`] embeds the query, asks the vector index for
//! the top-K nearest passages, and returns their `payload.content` strings
//! in rank order. Any failure along the way is logged and turned into an
//! empty result: a broken index must never cost the user their answer.

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::{EmbeddingError, RetrievalDegraded};
use crate::index::VectorIndex;
use crate::models::RetrievedPassage;

/// Default collection searched for context.
pub const DEFAULT_COLLECTION: &str = "news";
/// Default number of passages returned.
pub const DEFAULT_TOP_K: usize = 3;

/// Similarity search over a document index.
pub struct ContextRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    top_k: usize,
}

impl ContextRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            collection: DEFAULT_COLLECTION.to_string(),
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Returns up to `top_k` passages. Never fails.
    pub async fn search(&self, query: &str) -> Vec<RetrievedPassage> {
        if !self.embedder.is_enabled() {
            tracing::debug!("embedding disabled, skipping retrieval");
            return Vec::new();
        }

        match self.try_search(query).await {
            Ok(passages) => {
                tracing::debug!(
                    collection = %self.collection,
                    passages = passages.len(),
                    "retrieved context"
                );
                passages
            }
            Err(err) => {
                tracing::warn!(
                    collection = %self.collection,
                    error = %err,
                    "retrieval degraded, continuing without context"
                );
                Vec::new()
            }
        }
    }

    async fn try_search(&self, query: &str) -> Result<Vec<RetrievedPassage>, RetrievalDegraded> {
        let vector = self.embedder.embed(query).await?;
        let expected = self.embedder.dims();
        if expected > 0 && vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            }
            .into());
        }

        let hits = self
            .index
            .search(&self.collection, &vector, self.top_k)
            .await?;

        Ok(hits
            .iter()
            .take(self.top_k)
            .filter_map(|hit| hit.content())
            .filter(|content| !content.is_empty())
            .map(|content| RetrievedPassage {
                content: content.to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledEmbedder;
    use crate::error::IndexError;
    use crate::index::{IndexHit, InMemoryIndex};
    use async_trait::async_trait;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.0.len()
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(self.0.clone())
        }
    }

    struct WrongDims;

    #[async_trait]
    impl Embedder for WrongDims {
        fn model_name(&self) -> &str {
            "wrong"
        }
        fn dims(&self) -> usize {
            768
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.5; 3])
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        async fn search(
            &self,
            _collection: &str,
            _vector: &[f32],
            _limit: usize,
        ) -> Result<Vec<IndexHit>, IndexError> {
            Err(IndexError::Request("connection refused".into()))
        }
    }

    fn seeded_index() -> Arc<InMemoryIndex> {
        let index = InMemoryIndex::new();
        for (i, text) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            index.insert("news", vec![1.0, i as f32], text);
        }
        Arc::new(index)
    }

    #[tokio::test]
    async fn test_search_bounded_to_top_k() {
        let retriever =
            ContextRetriever::new(Arc::new(FixedEmbedder(vec![1.0, 0.0])), seeded_index());
        let passages = retriever.search("anything").await;
        assert_eq!(passages.len(), 3);
        assert_eq!(passages[0].content, "a");
    }

    #[tokio::test]
    async fn test_index_failure_yields_empty() {
        let retriever =
            ContextRetriever::new(Arc::new(FixedEmbedder(vec![1.0])), Arc::new(BrokenIndex));
        assert!(retriever.search("q").await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_embedder_yields_empty() {
        let retriever = ContextRetriever::new(Arc::new(DisabledEmbedder), seeded_index());
        assert!(retriever.search("q").await.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_yields_empty() {
        let retriever = ContextRetriever::new(Arc::new(WrongDims), seeded_index());
        assert!(retriever.search("q").await.is_empty());
    }

    #[tokio::test]
    async fn test_hits_without_content_are_dropped() {
        let index = InMemoryIndex::new();
        index.insert_payload("news", vec![1.0], serde_json::json!({ "title": "x" }));
        index.insert("news", vec![0.9], "kept");
        let retriever = ContextRetriever::new(Arc::new(FixedEmbedder(vec![1.0])), Arc::new(index));
        let passages = retriever.search("q").await;
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].content, "kept");
    }
}
