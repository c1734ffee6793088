//! Key-value store, caches and queue backing
//!
//! Every persisted key the engine touches goes through the [`KeyValueStore`]
//! trait: caches, dialogue-state snapshots, the analysis task queues, batch
//! records and the result channel. Two backends exist:
//! - [`RedisStore`] for deployments
//! - [`MemoryStore`] for tests and single-node development
//!
//! Ad-hoc key concatenation is consolidated in the [`keys`] module and the
//! [`TypedCache`] wrapper; TTL and eviction are cache-level policy, not a
//! caller concern.

pub mod cache;
pub mod keys;
pub mod kv;
pub mod memory;
pub mod redis_store;

pub use cache::TypedCache;
pub use kv::{KeyValueStore, Subscription};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use thiserror::Error;

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation failed: {0}")]
    Operation(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Operation(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<StoreError> for callguard_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(msg) => callguard_core::Error::Transient(msg),
            other => callguard_core::Error::Transient(other.to_string()),
        }
    }
}
