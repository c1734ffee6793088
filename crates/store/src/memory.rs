//! In-memory store
//!
//! Single-process implementation of [`KeyValueStore`] used by tests and
//! store-less development runs. Expiry is lazy: a key past its deadline is
//! dropped on first touch.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Notify};

use crate::kv::{KeyValueStore, Subscription};
use crate::StoreError;

struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory [`KeyValueStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, ValueEntry>>,
    lists: Arc<DashMap<String, VecDeque<String>>>,
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    list_activity: Arc<Notify>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        // The read guard must drop before the expired key is removed.
        {
            let entry = self.entries.get(key)?;
            if !entry.expired() {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove(key);
        None
    }

    fn channel(&self, name: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }

    /// Glob match supporting only the `*` wildcard, which is all the
    /// engine's key patterns use.
    fn glob_match(pattern: &str, key: &str) -> bool {
        let mut segments = pattern.split('*');
        let first = segments.next().unwrap_or("");
        if !key.starts_with(first) {
            return false;
        }
        let mut rest = &key[first.len()..];
        let mut segments: Vec<&str> = segments.collect();
        let last = if pattern.ends_with('*') {
            None
        } else {
            segments.pop()
        };
        for segment in segments {
            match rest.find(segment) {
                Some(idx) => rest = &rest[idx + segment.len()..],
                None => return false,
            }
        }
        match last {
            Some(suffix) => rest.ends_with(suffix),
            None => true,
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let had_entry = self.entries.remove(key).is_some();
        let had_list = self.lists.remove(key).is_some();
        Ok(had_entry || had_list)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entry = self.entries.entry(key.to_string()).or_insert(ValueEntry {
            value: "0".to_string(),
            expires_at: None,
        });
        if entry.expired() {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| StoreError::Operation(format!("key {} is not an integer", key)))?;
        entry.value = (current + 1).to_string();
        Ok(current + 1)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let len = {
            let mut list = self.lists.entry(key.to_string()).or_default();
            list.push_front(value.to_string());
            list.len()
        };
        self.list_activity.notify_waiters();
        Ok(len)
    }

    async fn brpop(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for wakeups before scanning, so a push landing
            // between the scan and the wait is not missed.
            let mut notified = std::pin::pin!(self.list_activity.notified());
            notified.as_mut().enable();

            for queue in queues {
                if let Some(mut list) = self.lists.get_mut(queue) {
                    if let Some(value) = list.pop_back() {
                        return Ok(Some((queue.clone(), value)));
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(remaining) => return Ok(None),
            }
        }
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.lists.get(key).map(|l| l.len()).unwrap_or(0))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut matched: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().expired())
            .map(|entry| entry.key().clone())
            .chain(self.lists.iter().map(|entry| entry.key().clone()))
            .filter(|key| Self::glob_match(pattern, key))
            .collect();
        matched.sort();
        matched.dedup();
        Ok(matched)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        // No subscribers is not an error.
        let _ = self.channel(channel).send(message.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let mut source = self.channel(channel).subscribe();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "in-memory subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(rx))
    }
}
