//! Typed TTL cache
//!
//! One cache interface for every cache kind in the system. Callers supply a
//! fingerprint (a stable deterministic key for the cached computation); the
//! cache owns serialization, the key prefix and the TTL. Cache failures are
//! logged and degrade to a miss, never an error.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::kv::KeyValueStore;

/// TTL cache for one kind of value.
pub struct TypedCache<T> {
    store: Arc<dyn KeyValueStore>,
    prefix: &'static str,
    ttl: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedCache<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            prefix: self.prefix,
            ttl: self.ttl,
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> TypedCache<T> {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: &'static str, ttl: Duration) -> Self {
        Self {
            store,
            prefix,
            ttl,
            _marker: PhantomData,
        }
    }

    fn key(&self, fingerprint: &str) -> String {
        format!("{}:{}", self.prefix, fingerprint)
    }

    /// Look up a cached value. Store errors degrade to a miss.
    pub async fn get(&self, fingerprint: &str) -> Option<T> {
        let key = self.key(fingerprint);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "dropping undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed");
                None
            }
        }
    }

    /// Write a value under its fingerprint. Failures are logged only:
    /// writes are idempotent and last-writer-wins because the fingerprint
    /// encodes determinism.
    pub async fn put(&self, fingerprint: &str, value: &T) {
        let key = self.key(fingerprint);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache value failed to serialize");
                return;
            }
        };
        if let Err(e) = self.store.set_ex(&key, &raw, self.ttl).await {
            tracing::warn!(key = %key, error = %e, "cache write failed");
        }
    }

    pub async fn invalidate(&self, fingerprint: &str) {
        let key = self.key(fingerprint);
        if let Err(e) = self.store.del(&key).await {
            tracing::warn!(key = %key, error = %e, "cache invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Cached {
        text: String,
        confidence: f32,
    }

    #[tokio::test]
    async fn test_read_your_writes() {
        let cache: TypedCache<Cached> = TypedCache::new(
            Arc::new(MemoryStore::new()),
            "response",
            Duration::from_secs(60),
        );

        assert!(cache.get("fp-1").await.is_none());

        let value = Cached {
            text: "不好意思，我不需要。".into(),
            confidence: 0.8,
        };
        cache.put("fp-1", &value).await;
        assert_eq!(cache.get("fp-1").await, Some(value));
    }

    #[tokio::test]
    async fn test_expiry_is_cache_policy() {
        let cache: TypedCache<Cached> = TypedCache::new(
            Arc::new(MemoryStore::new()),
            "response",
            Duration::from_millis(20),
        );
        cache
            .put(
                "fp",
                &Cached {
                    text: "x".into(),
                    confidence: 1.0,
                },
            )
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("fp").await.is_none());
    }
}
