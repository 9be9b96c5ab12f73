//! # Context Chat Core
//!
//! Runtime-agnostic building blocks of the chat pipeline: turn models and
//! the versioned session record, the error taxonomy, the session store,
//! embedding, vector index and generation traits, prompt assembly, and the
//! fail-soft context retriever.
//!
//! This crate contains no tokio, HTTP client, or Redis dependencies. The
//! `context-chat` app crate supplies the network-backed implementations.

pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod retriever;
pub mod store;
