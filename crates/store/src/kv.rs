//! Key-value store contract
//!
//! The operation set mirrors what the engine actually needs from its
//! backing store: plain get/set with TTLs, counters, list queues with a
//! blocking multi-key pop, pattern listing, and pub/sub.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::StoreError;

/// Receiver half of a channel subscription.
pub struct Subscription {
    receiver: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<String>) -> Self {
        Self { receiver }
    }

    /// Next message on the channel, or `None` once the subscription closes.
    pub async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// Pluggable key-value backend.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Set with expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete a key. Returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically increment an integer key, creating it at 0.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Set expiry on an existing key. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Push to the head of a list. Returns the new length.
    async fn lpush(&self, key: &str, value: &str) -> Result<usize, StoreError>;

    /// Blocking pop from the tail of the first non-empty list, scanning
    /// `queues` in order. `None` on timeout. FIFO within a key.
    async fn brpop(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError>;

    async fn llen(&self, key: &str) -> Result<usize, StoreError>;

    /// List keys matching a glob pattern (`*` wildcard).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError>;
}
