//! Redis-backed [`SessionStore`] implementation.
//!
//! Each session lives under `session:{id}:history` as an encoded
//! [`SessionRecord`], written with `SET ... EX ttl` so every append restarts
//! the expiry of the whole session. A single [`ConnectionManager`] is shared
//! across requests and reconnects on its own after transient failures.
//!
//! Every command is bounded by `session.timeout_secs`; an expired deadline
//! surfaces as [`StoreError::Timeout`] rather than hanging the request.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;

use context_chat_core::error::StoreError;
use context_chat_core::models::{SessionRecord, Turn};
use context_chat_core::store::{history_key, SessionStore};

use crate::config::SessionConfig;

pub struct RedisSessionStore {
    conn: ConnectionManager,
    ttl: Duration,
    timeout: Duration,
}

impl RedisSessionStore {
    /// Open the connection described by `session.redis_url`.
    pub async fn connect(config: &SessionConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let conn = bounded(timeout, ConnectionManager::new(client)).await?;
        tracing::info!("connected to redis");

        Ok(Self {
            conn,
            ttl: Duration::from_secs(config.ttl_secs),
            timeout,
        })
    }

    async fn read(&self, key: &str) -> Result<Option<SessionRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = bounded(self.timeout, conn.get(key)).await?;
        raw.map(|raw| {
            SessionRecord::decode(&raw).map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
    }
}

async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = redis::RedisResult<T>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(StoreError::Unavailable(e.to_string())),
        Err(_) => Err(StoreError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        Ok(self
            .read(&history_key(session_id))
            .await?
            .map(|r| r.turns)
            .unwrap_or_default())
    }

    async fn append(&self, session_id: &str, turns: &[Turn]) -> Result<(), StoreError> {
        let key = history_key(session_id);
        let mut history = self.read(&key).await?.map(|r| r.turns).unwrap_or_default();
        history.extend_from_slice(turns);
        let encoded = SessionRecord::new(history).encode()?;

        let mut conn = self.conn.clone();
        let () = bounded(self.timeout, conn.set_ex(&key, encoded, self.ttl.as_secs())).await?;
        tracing::debug!(key = %key, ttl_secs = self.ttl.as_secs(), "session history written");
        Ok(())
    }
}
