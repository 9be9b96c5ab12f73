//! Session history storage abstraction.
//!
//! The [`SessionStore`] trait defines the two operations the pipeline needs
//! from a key-value store with expiry: read a session's turns, and append
//! turns while resetting the session's time-to-live.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! The Redis-backed store lives in the app crate; [`memory::InMemorySessionStore`]
//! is used in tests and for single-process development runs.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::Turn;

/// Sliding expiry applied on every append.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Storage key holding a session's encoded history.
pub fn history_key(session_id: &str) -> String {
    format!("session:{}:history", session_id)
}

/// Keyed, time-limited persistence of per-session turn history.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](SessionStore::get) | Ordered turns, empty when absent or expired |
/// | [`append`](SessionStore::append) | Read, extend, write back, reset TTL |
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the session's turns in write order.
    ///
    /// A missing or expired session yields an empty vector, not an error.
    async fn get(&self, session_id: &str) -> Result<Vec<Turn>, StoreError>;

    /// Appends `turns` after the existing history and writes the full
    /// sequence back. The TTL of the whole session restarts from this write.
    ///
    /// The read-then-write is not guaranteed atomic across callers; the
    /// orchestrator serializes appends per session.
    async fn append(&self, session_id: &str, turns: &[Turn]) -> Result<(), StoreError>;
}
