//! In-memory store implementation.
//!
//! Backs all three store traits for tests and single-node deployments.
//! DashMap shard locks make every operation an atomic round-trip; a
//! sweeper task evicts expired entries and publishes their key names.
//! Reads treat stale entries as absent so correctness never depends on
//! sweeper timing, only event delivery does.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::Result;

use super::{ExpiryEvents, KvStore, QueueStore};

/// Capacity of the expiry-event channel. Slow subscribers lose events,
/// which matches the best-effort delivery contract.
const EXPIRY_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Single-process store with TTL support and expiry notification.
pub struct MemoryStore {
    lists: DashMap<String, VecDeque<String>>,
    entries: DashMap<String, KvEntry>,
    expiry_tx: broadcast::Sender<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (expiry_tx, _) = broadcast::channel(EXPIRY_CHANNEL_CAPACITY);
        Self {
            lists: DashMap::new(),
            entries: DashMap::new(),
            expiry_tx,
        }
    }

    /// Evict expired entries, publishing each evicted key name.
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            // Re-check under the shard lock; a concurrent set_ex may
            // have refreshed the entry since the scan.
            let gone = self
                .entries
                .remove_if(&key, |_, entry| entry.is_expired(now))
                .is_some();
            if gone {
                removed += 1;
                let _ = self.expiry_tx.send(key);
            }
        }
        if removed > 0 {
            debug!(entries_removed = removed, "swept expired store entries");
        }
        removed
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the periodic sweeper for a store.
pub fn spawn_sweeper(store: Arc<MemoryStore>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            store.sweep();
        }
    });
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn pop(&self, list: &str) -> Result<Option<String>> {
        Ok(self
            .lists
            .get_mut(list)
            .and_then(|mut l| l.pop_front()))
    }

    async fn push(&self, list: &str, item: &str) -> Result<()> {
        self.lists
            .entry(list.to_string())
            .or_default()
            .push_back(item.to_string());
        Ok(())
    }

    async fn len(&self, list: &str) -> Result<usize> {
        Ok(self.lists.get(list).map(|l| l.len()).unwrap_or(0))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        Ok(self.entries.get(key).and_then(|e| {
            if e.is_expired(now) {
                None
            } else {
                Some(e.value.clone())
            }
        }))
    }

    async fn decr_by(&self, key: &str, amount: i64) -> Result<i64> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert(KvEntry {
            value: "0".to_string(),
            expires_at: None,
        });
        if entry.is_expired(now) {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }
        let current: i64 = entry.value.parse().unwrap_or(0);
        let next = current - amount;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

impl ExpiryEvents for MemoryStore {
    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.expiry_tx.subscribe()
    }
}
