//! Construction of the long-lived clients the pipeline depends on.
//!
//! [`Backends::connect`] is called once at process start. The handles it
//! returns are shared by every request and released when the last `Arc`
//! is dropped at shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use context_chat_core::embedding::Embedder;
use context_chat_core::generation::Generator;
use context_chat_core::index::{InMemoryIndex, VectorIndex};
use context_chat_core::retriever::ContextRetriever;
use context_chat_core::store::memory::InMemorySessionStore;
use context_chat_core::store::SessionStore;

use crate::config::{Config, IndexBackend, StoreBackend};
use crate::embedding::create_embedder;
use crate::gemini::GeminiClient;
use crate::orchestrator::Orchestrator;
use crate::qdrant::QdrantIndex;
use crate::redis_store::RedisSessionStore;

/// Injected client handles for the store, index, embedder, and model.
pub struct Backends {
    pub store: Arc<dyn SessionStore>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
}

impl Backends {
    pub async fn connect(config: &Config) -> Result<Self> {
        let store: Arc<dyn SessionStore> = match config.session.backend {
            StoreBackend::Redis => Arc::new(
                RedisSessionStore::connect(&config.session)
                    .await
                    .context("Failed to connect to the session store")?,
            ),
            StoreBackend::Memory => {
                tracing::warn!("using in-memory session store; history is lost on restart");
                Arc::new(InMemorySessionStore::with_ttl(Duration::from_secs(
                    config.session.ttl_secs,
                )))
            }
        };

        let index: Arc<dyn VectorIndex> = match config.retrieval.backend {
            IndexBackend::Qdrant => Arc::new(QdrantIndex::new(&config.retrieval)?),
            IndexBackend::Memory => Arc::new(InMemoryIndex::new()),
        };

        let embedder = create_embedder(&config.embedding)?;
        if !embedder.is_enabled() {
            tracing::warn!("embedding provider disabled; queries will run without context");
        }

        let generator: Arc<dyn Generator> = Arc::new(
            GeminiClient::from_config(&config.generation)
                .context("Failed to configure the generation client")?,
        );

        Ok(Self {
            store,
            index,
            embedder,
            generator,
        })
    }

    /// Wire the handles into an [`Orchestrator`] using the retrieval settings.
    pub fn into_orchestrator(self, config: &Config) -> Orchestrator {
        let retriever = ContextRetriever::new(self.embedder, self.index)
            .with_collection(&config.retrieval.collection)
            .with_top_k(config.retrieval.top_k);
        Orchestrator::new(retriever, self.generator, self.store)
    }
}
