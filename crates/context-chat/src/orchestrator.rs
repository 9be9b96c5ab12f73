//! Per-session request handling: retrieve → generate → persist.
//!
//! # Ordering and failure isolation
//!
//! 1. Empty messages are rejected before any I/O.
//! 2. Retrieval never fails the request; it degrades to empty context.
//! 3. The prompt is the retrieved context plus the message. Prior history
//!    is not replayed into the model call.
//! 4. A failed generation aborts the request with nothing written.
//! 5. The `(user, assistant)` pair is appended under a per-session lock so
//!    concurrent requests for one session cannot lose each other's turns.
//! 6. The answer is only returned once the append has succeeded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use context_chat_core::error::ChatError;
use context_chat_core::generation::{build_prompt, Generator};
use context_chat_core::models::Turn;
use context_chat_core::retriever::ContextRetriever;
use context_chat_core::store::SessionStore;

/// One async mutex per session id with an in-flight append.
///
/// Entries nobody holds are pruned on the next acquisition.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// The authoritative per-session request handler.
pub struct Orchestrator {
    retriever: ContextRetriever,
    generator: Arc<dyn Generator>,
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
}

impl Orchestrator {
    pub fn new(
        retriever: ContextRetriever,
        generator: Arc<dyn Generator>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            retriever,
            generator,
            store,
            locks: SessionLocks::new(),
        }
    }

    /// Answer `message` for `session_id` and record the exchange.
    pub async fn handle(&self, session_id: &str, message: &str) -> Result<String, ChatError> {
        if message.trim().is_empty() {
            return Err(ChatError::InvalidRequest("message required".to_string()));
        }

        let passages = self.retriever.search(message).await;
        let prompt = build_prompt(&passages, message);

        let answer = self.generator.generate(&[prompt]).await?.text;

        {
            let _guard = self.locks.acquire(session_id).await;
            self.store
                .append(session_id, &[Turn::user(message), Turn::assistant(&answer)])
                .await?;
        }

        tracing::info!(
            session = %session_id,
            context_passages = passages.len(),
            answer_chars = answer.len(),
            "query answered"
        );
        Ok(answer)
    }

    /// The session's persisted turns, empty when absent or expired.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>, ChatError> {
        Ok(self.store.get(session_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use context_chat_core::embedding::{DisabledEmbedder, Embedder};
    use context_chat_core::error::{EmbeddingError, GenerationError, IndexError, StoreError};
    use context_chat_core::generation::PromptTurn;
    use context_chat_core::index::{IndexHit, InMemoryIndex, VectorIndex};
    use context_chat_core::models::GenerationResult;
    use context_chat_core::store::memory::InMemorySessionStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes the prompt text back so tests can see what the model saw.
    struct EchoGenerator {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl EchoGenerator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(
            &self,
            turns: &[PromptTurn],
        ) -> Result<GenerationResult, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(GenerationResult {
                text: format!("echo: {}", turns[0].text()),
            })
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        async fn generate(&self, _: &[PromptTurn]) -> Result<GenerationResult, GenerationError> {
            Err(GenerationError::Upstream {
                status: 503,
                message: "model overloaded".into(),
            })
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        fn model_name(&self) -> &str {
            "unit"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        async fn search(&self, _: &str, _: &[f32], _: usize) -> Result<Vec<IndexHit>, IndexError> {
            Err(IndexError::Request("collection not found".into()))
        }
    }

    struct DownStore;

    #[async_trait]
    impl SessionStore for DownStore {
        async fn get(&self, _: &str) -> Result<Vec<Turn>, StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
        async fn append(&self, _: &str, _: &[Turn]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
    }

    fn no_context() -> ContextRetriever {
        ContextRetriever::new(Arc::new(DisabledEmbedder), Arc::new(InMemoryIndex::new()))
    }

    #[tokio::test]
    async fn test_empty_message_rejected_without_side_effects() {
        let store = Arc::new(InMemorySessionStore::new());
        let generator = Arc::new(EchoGenerator::new());
        let orch = Orchestrator::new(no_context(), generator.clone(), store.clone());

        for message in ["", "   "] {
            match orch.handle("s1", message).await {
                Err(ChatError::InvalidRequest(msg)) => assert_eq!(msg, "message required"),
                other => panic!("expected InvalidRequest, got {:?}", other),
            }
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert!(store.get("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_concatenation_of_pairs() {
        let store = Arc::new(InMemorySessionStore::new());
        let orch = Orchestrator::new(no_context(), Arc::new(EchoGenerator::new()), store);

        orch.handle("s1", "one").await.unwrap();
        orch.handle("s1", "two").await.unwrap();

        assert_eq!(
            orch.history("s1").await.unwrap(),
            vec![
                Turn::user("one"),
                Turn::assistant("echo: one"),
                Turn::user("two"),
                Turn::assistant("echo: two"),
            ]
        );
    }

    #[tokio::test]
    async fn test_prompt_includes_retrieved_context() {
        let index = InMemoryIndex::new();
        index.insert("news", vec![1.0, 0.0], "markets rallied");
        let retriever = ContextRetriever::new(Arc::new(UnitEmbedder), Arc::new(index));
        let orch = Orchestrator::new(
            retriever,
            Arc::new(EchoGenerator::new()),
            Arc::new(InMemorySessionStore::new()),
        );

        let answer = orch.handle("s1", "what happened?").await.unwrap();
        assert_eq!(
            answer,
            "echo: Context:\nmarkets rallied\n\nUser:\nwhat happened?"
        );
        // Only the raw message is persisted, never the assembled prompt.
        assert_eq!(orch.history("s1").await.unwrap()[0], Turn::user("what happened?"));
    }

    #[tokio::test]
    async fn test_generation_failure_leaves_history_unchanged() {
        let store = Arc::new(InMemorySessionStore::new());
        store
            .append("s1", &[Turn::user("before"), Turn::assistant("kept")])
            .await
            .unwrap();
        let orch = Orchestrator::new(no_context(), Arc::new(FailingGenerator), store.clone());

        match orch.handle("s1", "hello").await {
            Err(ChatError::GenerationFailed(GenerationError::Upstream { message, .. })) => {
                assert_eq!(message, "model overloaded")
            }
            other => panic!("expected GenerationFailed, got {:?}", other),
        }
        assert_eq!(store.get("s1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retrieval_failure_still_answers() {
        let retriever = ContextRetriever::new(Arc::new(UnitEmbedder), Arc::new(BrokenIndex));
        let orch = Orchestrator::new(
            retriever,
            Arc::new(EchoGenerator::new()),
            Arc::new(InMemorySessionStore::new()),
        );
        assert_eq!(orch.handle("s1", "hello").await.unwrap(), "echo: hello");
    }

    #[tokio::test]
    async fn test_store_failure_is_surfaced() {
        let orch = Orchestrator::new(no_context(), Arc::new(EchoGenerator::new()), Arc::new(DownStore));
        assert!(matches!(
            orch.handle("s1", "hello").await,
            Err(ChatError::StoreUnavailable(_))
        ));
        assert!(matches!(
            orch.history("s1").await,
            Err(ChatError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_requests_keep_every_pair() {
        let store = Arc::new(InMemorySessionStore::new());
        let generator = Arc::new(EchoGenerator {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(5),
        });
        let orch = Arc::new(Orchestrator::new(no_context(), generator, store.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let orch = orch.clone();
                tokio::spawn(async move { orch.handle("shared", &format!("m{}", i)).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let turns = store.get("shared").await.unwrap();
        assert_eq!(turns.len(), 16);
        for pair in turns.chunks(2) {
            assert_eq!(pair[1].text, format!("echo: {}", pair[0].text));
        }
    }

    #[tokio::test]
    async fn test_session_locks_pruned() {
        let locks = SessionLocks::new();
        {
            let _a = locks.acquire("a").await;
            let _b = locks.acquire("b").await;
            assert_eq!(locks.len(), 2);
        }
        let _c = locks.acquire("c").await;
        assert_eq!(locks.len(), 1);
    }
}
