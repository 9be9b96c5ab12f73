//! In-memory [`SessionStore`] implementation for testing and local runs.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Records are kept in their
//! encoded form so the codec path matches the Redis store. Expiry is
//! evaluated against an injectable [`Clock`]: expired entries are hidden on
//! read and evicted on the next append.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{SessionRecord, Turn};

use super::{history_key, SessionStore, DEFAULT_SESSION_TTL};

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct Entry {
    encoded: String,
    expires_at: Instant,
}

/// In-memory session store with sliding expiry.
pub struct InMemorySessionStore {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::with_clock(DEFAULT_SESSION_TTL, Arc::new(SystemClock))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    fn live_record(&self, key: &str) -> Result<Option<SessionRecord>, StoreError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.expires_at > self.clock.now() => decode_entry(key, entry).map(Some),
            _ => Ok(None),
        }
    }
}

fn decode_entry(key: &str, entry: &Entry) -> Result<SessionRecord, StoreError> {
    SessionRecord::decode(&entry.encoded).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        Ok(self
            .live_record(&history_key(session_id))?
            .map(|r| r.turns)
            .unwrap_or_default())
    }

    async fn append(&self, session_id: &str, turns: &[Turn]) -> Result<(), StoreError> {
        let key = history_key(session_id);
        let now = self.clock.now();

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| entry.expires_at > now);

        let mut history = match entries.get(&key) {
            Some(entry) => decode_entry(&key, entry)?.turns,
            None => Vec::new(),
        };
        history.extend_from_slice(turns);
        let encoded = SessionRecord::new(history).encode()?;

        entries.insert(
            key,
            Entry {
                encoded,
                expires_at: now + self.ttl,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A clock that only moves when told to.
    struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }
    }

    fn store_with_clock() -> (InMemorySessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let store = InMemorySessionStore::with_clock(Duration::from_secs(3600), clock.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn test_get_unknown_session_is_empty() {
        let store = InMemorySessionStore::new();
        assert!(store.get("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = InMemorySessionStore::new();
        store
            .append("s1", &[Turn::user("a"), Turn::assistant("b")])
            .await
            .unwrap();
        store
            .append("s1", &[Turn::user("c"), Turn::assistant("d")])
            .await
            .unwrap();

        let turns = store.get("s1").await.unwrap();
        let texts: Vec<_> = turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let (store, clock) = store_with_clock();
        store.append("s1", &[Turn::user("hi")]).await.unwrap();

        clock.advance(Duration::from_secs(3599));
        assert_eq!(store.get("s1").await.unwrap().len(), 1);

        clock.advance(Duration::from_secs(2));
        assert!(store.get("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_resets_ttl_for_whole_session() {
        let (store, clock) = store_with_clock();
        store.append("s1", &[Turn::user("first")]).await.unwrap();

        clock.advance(Duration::from_secs(3000));
        store.append("s1", &[Turn::assistant("second")]).await.unwrap();

        // Past the first write's deadline, inside the second's.
        clock.advance(Duration::from_secs(1000));
        let turns = store.get("s1").await.unwrap();
        assert_eq!(turns, vec![Turn::user("first"), Turn::assistant("second")]);
    }

    #[tokio::test]
    async fn test_append_after_expiry_starts_fresh() {
        let (store, clock) = store_with_clock();
        store.append("s1", &[Turn::user("old")]).await.unwrap();
        clock.advance(Duration::from_secs(3601));
        store.append("s1", &[Turn::user("new")]).await.unwrap();
        assert_eq!(store.get("s1").await.unwrap(), vec![Turn::user("new")]);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = InMemorySessionStore::new();
        store.append("a", &[Turn::user("for a")]).await.unwrap();
        assert!(store.get("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_evicted() {
        let clock = Arc::new(ManualClock::new());
        let store = InMemorySessionStore::with_clock(Duration::from_secs(10), clock.clone());
        for i in 0..1000 {
            store
                .append(&format!("s{}", i), &[Turn::user("hi")])
                .await
                .unwrap();
        }
        assert_eq!(store.entries.read().unwrap().len(), 1000);

        clock.advance(Duration::from_secs(3600));
        store.append("fresh", &[Turn::user("hi")]).await.unwrap();

        let entries = store.entries.read().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key(&history_key("fresh")));
    }
}
