use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::clients::redis::RedisClient;
use crate::errors::{AppError, AppResult};
use crate::types::auth::SessionData;

/// Cookie carrying the opaque session token.
pub const SESSION_COOKIE: &str = "alma_session";

/// Single token-to-state mapping trusted by both the HTTP layer and the
/// socket acceptance path. Neither transport keeps its own session cache.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, token: &str) -> AppResult<Option<SessionData>>;
    async fn set(&self, token: &str, data: &SessionData, ttl: Duration) -> AppResult<()>;
    async fn touch(&self, token: &str, ttl: Duration) -> AppResult<()>;
    async fn destroy(&self, token: &str) -> AppResult<()>;
}

/// Generates an opaque session token: 32 random bytes, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn session_key(token: &str) -> String {
    format!("session:{token}")
}

pub struct RedisSessionStore {
    redis: RedisClient,
}

impl RedisSessionStore {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, token: &str) -> AppResult<Option<SessionData>> {
        let raw = self
            .redis
            .get(&session_key(token))
            .await
            .map_err(|e| AppError::internal(format!("session store read failed: {e}")))?;

        match raw {
            Some(json) => {
                let data = serde_json::from_str(&json)
                    .map_err(|e| AppError::internal(format!("corrupt session record: {e}")))?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, token: &str, data: &SessionData, ttl: Duration) -> AppResult<()> {
        let json = serde_json::to_string(data)
            .map_err(|e| AppError::internal(format!("session serialization failed: {e}")))?;
        self.redis
            .set(&session_key(token), &json, ttl.as_secs())
            .await
            .map_err(|e| AppError::internal(format!("session store write failed: {e}")))
    }

    async fn touch(&self, token: &str, ttl: Duration) -> AppResult<()> {
        self.redis
            .expire(&session_key(token), ttl.as_secs() as i64)
            .await
            .map_err(|e| AppError::internal(format!("session touch failed: {e}")))
    }

    async fn destroy(&self, token: &str) -> AppResult<()> {
        self.redis
            .del(&session_key(token))
            .await
            .map_err(|e| AppError::internal(format!("session destroy failed: {e}")))
    }
}

/// In-process session store with the same semantics as the Redis-backed one.
/// Used by tests; expired entries read as absent and are dropped lazily.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: DashMap<String, (SessionData, Instant)>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, token: &str) -> AppResult<Option<SessionData>> {
        if let Some(entry) = self.entries.get(token) {
            let (data, deadline) = entry.value();
            if Instant::now() < *deadline {
                return Ok(Some(data.clone()));
            }
        }
        self.entries.remove(token);
        Ok(None)
    }

    async fn set(&self, token: &str, data: &SessionData, ttl: Duration) -> AppResult<()> {
        self.entries
            .insert(token.to_string(), (data.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn touch(&self, token: &str, ttl: Duration) -> AppResult<()> {
        if let Some(mut entry) = self.entries.get_mut(token) {
            entry.value_mut().1 = Instant::now() + ttl;
        }
        Ok(())
    }

    async fn destroy(&self, token: &str) -> AppResult<()> {
        self.entries.remove(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_opaque_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemorySessionStore::new();
        let data = SessionData::pending("grad@alumni.edu");

        store.set("tok", &data, Duration::from_secs(60)).await.unwrap();
        let loaded = store.get("tok").await.unwrap();
        assert_eq!(loaded, Some(data));

        store.destroy("tok").await.unwrap();
        assert_eq!(store.get("tok").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_sessions_read_as_absent() {
        let store = MemorySessionStore::new();
        let data = SessionData::pending("grad@alumni.edu");

        store.set("tok", &data, Duration::from_secs(0)).await.unwrap();
        assert_eq!(store.get("tok").await.unwrap(), None);
    }

    #[tokio::test]
    async fn touch_extends_the_deadline() {
        let store = MemorySessionStore::new();
        let data = SessionData::pending("grad@alumni.edu");

        store.set("tok", &data, Duration::from_millis(1)).await.unwrap();
        store.touch("tok", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.get("tok").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_token_is_none() {
        let store = MemorySessionStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }
}
