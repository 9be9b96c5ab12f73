//! Error hierarchy for the chat pipeline.

use thiserror::Error;

use crate::models::RecordError;

/// Errors surfaced by the orchestrator to its caller.
///
/// Retrieval problems never appear here: the retriever absorbs them and
/// continues with empty context.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    GenerationFailed(#[from] GenerationError),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

/// Errors from the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    #[error("session store timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("session {key} is unreadable: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: RecordError,
    },

    #[error("failed to encode session record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from the hosted generation endpoint.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Non-success HTTP status. `message` is the upstream `error.message`
    /// when the body carried one.
    #[error("generation failed ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("generation response had no candidate text")]
    EmptyResponse,

    #[error("malformed generation response: {0}")]
    Malformed(String),

    #[error("generation request failed: {0}")]
    Network(String),

    #[error("generation request timed out")]
    Timeout,

    #[error("generation client misconfigured: {0}")]
    Config(String),
}

/// Errors from an embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled")]
    Disabled,

    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

/// Errors from a vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index request failed: {0}")]
    Request(String),

    #[error("vector index returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed vector index response: {0}")]
    Malformed(String),
}

/// Anything that made the retriever fall back to empty context.
///
/// Only ever logged; never returned past the retriever.
#[derive(Debug, Error)]
pub enum RetrievalDegraded {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}
