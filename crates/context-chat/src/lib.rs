//! # Context Chat
//!
//! **A retrieval-augmented chat server with per-session history.**
//!
//! Each user message is enriched with passages retrieved from a vector
//! index, answered by a hosted generation model, and recorded in a
//! per-session history with a sliding one-hour expiry. A client-side
//! controller sends messages to the server first and falls back to calling
//! the model directly when the server is unreachable.
//!
//! ## Architecture
//!
//! ```text
//!  ┌────────────────┐  primary   ┌──────────────┐   ┌──────────────┐
//!  │ ChatController │──────────▶│  HTTP server  │──▶│ Orchestrator │
//!  │   (client)     │           └──────────────┘   └──────┬───────┘
//!  └───────┬────────┘                                     │
//!          │ fallback                     ┌───────────────┼──────────────┐
//!          ▼                              ▼               ▼              ▼
//!     ┌─────────┐                   ┌───────────┐   ┌──────────┐   ┌──────────┐
//!     │ Gemini  │◀──────────────────│ Retriever │   │  Gemini  │   │  Redis   │
//!     └─────────┘                   │ (Qdrant)  │   └──────────┘   │ sessions │
//!                                   └───────────┘                  └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`backends`] | Connects store, index, embedder, and model at startup |
//! | [`config`] | TOML configuration with environment overrides |
//! | [`controller`] | Client-side primary/fallback routing |
//! | [`embedding`] | Gemini and Ollama embedding providers |
//! | [`gemini`] | `generateContent` client |
//! | [`orchestrator`] | Retrieve, generate, persist for one request |
//! | [`qdrant`] | Qdrant REST search |
//! | [`redis_store`] | Redis-backed session history |
//! | [`server`] | Axum HTTP API |
//!
//! Runtime-agnostic types and traits live in `context-chat-core`.

pub mod backends;
pub mod config;
pub mod controller;
pub mod embedding;
pub mod gemini;
pub mod orchestrator;
pub mod qdrant;
pub mod redis_store;
pub mod server;
