//! External store capability.
//!
//! Queue and lease data never live in process memory as far as the core
//! is concerned: pools and lease stores go through these traits, and the
//! traits promise atomic single-round-trip semantics. [`memory`] ships
//! the single-process implementation; a networked store with the same
//! primitives slots in for multi-instance deployments.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::Result;

pub use memory::MemoryStore;

/// Ordered FIFO lists of credentials, one per pool.
///
/// All three operations are atomic round-trips in the store; callers
/// must not layer read-then-write logic on top.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Pop the oldest item. Empty is a normal condition, not an error,
    /// and never blocks.
    async fn pop(&self, list: &str) -> Result<Option<String>>;

    /// Append an item.
    async fn push(&self, list: &str, item: &str) -> Result<()>;

    /// Current length.
    async fn len(&self, list: &str) -> Result<usize>;
}

/// Expiring key/value records for lease data and refill tokens.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Set a value with a time-to-live.
    async fn set_ex(&self, key: &str, value: &str, ttl: std::time::Duration) -> Result<()>;

    /// Set a value that does not expire.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read a value; expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomically decrement an integer value, returning the new value.
    /// Does not clamp; missing keys start from zero.
    async fn decr_by(&self, key: &str, amount: i64) -> Result<i64>;

    /// Delete a key. Deleting a missing key is a no-op.
    async fn del(&self, key: &str) -> Result<()>;
}

/// Best-effort delivery of expired-key names.
///
/// Events fire at most once in the common case; a missed event leaves
/// an orphaned credential behind, which the system tolerates.
pub trait ExpiryEvents: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<String>;
}
