//! Credential pool: FIFO queue plus the refill coordinator.
//!
//! A pool owns one store-backed list of funded credentials. Popping is
//! non-blocking; every pop fires a background refill evaluation, and a
//! timer re-evaluates periodically. Refill is rate-bounded to at most
//! one funding decision per chain height per pool via a store-persisted
//! refill token.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ledger::{Address, LedgerGateway, SecretKey};
use crate::store::{KvStore, QueueStore};
use crate::types::Result;

/// Per-pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pool identity.
    pub id: String,
    /// Store list holding the queued credentials.
    pub list_name: String,
    /// Queue depth the refill coordinator aims for.
    pub target_buffer: usize,
    /// Credentials generated and funded per batch.
    pub batch_size: usize,
    /// Funding per credential, in the ledger's smallest unit.
    pub funding_amount: i64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            list_name: "credential_list".to_string(),
            target_buffer: 100,
            batch_size: 20,
            funding_amount: 10_000_000,
        }
    }
}

/// A custodial pool of pre-funded credentials.
pub struct CredentialPool {
    config: PoolConfig,
    queue: Arc<dyn QueueStore>,
    kv: Arc<dyn KvStore>,
    ledger: Arc<dyn LedgerGateway>,
}

impl CredentialPool {
    pub fn new(
        config: PoolConfig,
        queue: Arc<dyn QueueStore>,
        kv: Arc<dyn KvStore>,
        ledger: Arc<dyn LedgerGateway>,
    ) -> Self {
        Self {
            config,
            queue,
            kv,
            ledger,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn funding_amount(&self) -> i64 {
        self.config.funding_amount
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerGateway> {
        &self.ledger
    }

    /// Borrow one credential from the queue.
    ///
    /// Empty means out of stock, never an error. Every pop fires a
    /// background refill evaluation; the request path never waits on it.
    pub async fn pop(self: &Arc<Self>) -> Result<Option<SecretKey>> {
        let item = self.queue.pop(&self.config.list_name).await?;

        let pool = Arc::clone(self);
        tokio::spawn(async move {
            pool.refill().await;
        });

        match item {
            Some(encoded) => {
                let secret = SecretKey::from_b58(&encoded)?;
                info!(pool = %self.config.id, address = %secret.address(), "credential issued");
                Ok(Some(secret))
            }
            None => Ok(None),
        }
    }

    /// Current queue depth.
    pub async fn size(&self) -> Result<usize> {
        self.queue.len(&self.config.list_name).await
    }

    /// Return a credential to the back of the queue (lease recycling).
    pub async fn push(&self, secret: &SecretKey) -> Result<()> {
        self.queue
            .push(&self.config.list_name, &secret.to_b58())
            .await
    }

    /// Balance of the funding account backing this pool.
    pub async fn funding_balance(&self) -> Result<i64> {
        self.ledger.funder_balance().await
    }

    fn token_key(&self) -> String {
        format!("{}:refill-token", self.config.id)
    }

    /// Evaluate and, if warranted, execute one refill.
    ///
    /// Failures are recovered locally: logged, never surfaced. The pool
    /// simply stays under target until a later evaluation succeeds.
    pub async fn refill(&self) {
        if let Err(e) = self.try_refill().await {
            warn!(pool = %self.config.id, error = %e, "refill attempt abandoned");
        }
    }

    async fn try_refill(&self) -> Result<()> {
        let height = self.ledger.height().await?;
        let size = self.size().await?;

        if size >= self.config.target_buffer {
            return Ok(());
        }

        // One funding decision per height per pool. The token is read
        // and advanced before any submission: a concurrent evaluation at
        // the same height then declines instead of double-funding.
        let token_key = self.token_key();
        let token: u64 = self
            .kv
            .get(&token_key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if height <= token {
            debug!(pool = %self.config.id, height, token, "refill already decided at this height");
            return Ok(());
        }
        self.kv.set(&token_key, &height.to_string()).await?;

        info!(pool = %self.config.id, height, size, "generating new credentials");

        let mut batch: Vec<(SecretKey, Address)> = Vec::with_capacity(self.config.batch_size);
        for _ in 0..self.config.batch_size {
            batch.push(self.ledger.generate_keypair());
        }

        let dests: Vec<(Address, i64)> = batch
            .iter()
            .map(|(_, address)| (address.clone(), self.config.funding_amount))
            .collect();
        let op_hash = self.ledger.submit_batch_funding(&dests).await?;

        for (secret, _) in &batch {
            self.queue
                .push(&self.config.list_name, &secret.to_b58())
                .await?;
        }

        info!(
            pool = %self.config.id,
            op_hash = %op_hash,
            produced = batch.len(),
            "new credential batch funded and queued"
        );
        Ok(())
    }
}

/// Spawn the periodic refill task for a pool.
pub fn spawn_refill_timer(pool: Arc<CredentialPool>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; that doubles as the startup
        // fill for an empty pool.
        loop {
            ticker.tick().await;
            pool.refill().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mock::MockLedger;
    use crate::store::MemoryStore;
    use std::sync::atomic::Ordering;

    fn test_pool(
        config: PoolConfig,
        store: &Arc<MemoryStore>,
        ledger: &Arc<MockLedger>,
    ) -> Arc<CredentialPool> {
        Arc::new(CredentialPool::new(
            config,
            Arc::clone(store) as Arc<dyn QueueStore>,
            Arc::clone(store) as Arc<dyn KvStore>,
            Arc::clone(ledger) as Arc<dyn LedgerGateway>,
        ))
    }

    fn small_config() -> PoolConfig {
        PoolConfig {
            id: "test".into(),
            list_name: "test_list".into(),
            target_buffer: 2,
            batch_size: 1,
            funding_amount: 10_000_000,
        }
    }

    #[tokio::test]
    async fn test_refill_funds_and_queues_batch() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new(100));
        let pool = test_pool(small_config(), &store, &ledger);

        pool.refill().await;

        assert_eq!(pool.size().await.unwrap(), 1);
        assert_eq!(ledger.submissions(), 1);
        // Every generated credential got funded with the configured amount.
        let submissions = ledger.fund_submissions.lock().unwrap();
        assert_eq!(submissions[0].len(), 1);
        assert_eq!(submissions[0][0].1, 10_000_000);
    }

    #[tokio::test]
    async fn test_refill_rate_bound_per_height() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new(100));
        let pool = test_pool(small_config(), &store, &ledger);

        // First evaluation at height 100 submits and advances the token.
        pool.refill().await;
        assert_eq!(ledger.submissions(), 1);

        // Still under target (1 < 2), but the height has not advanced.
        pool.refill().await;
        pool.refill().await;
        assert_eq!(ledger.submissions(), 1, "one decision per height");

        // Height advances: refill proceeds again.
        ledger.height.store(101, Ordering::SeqCst);
        pool.refill().await;
        assert_eq!(ledger.submissions(), 2);
        assert_eq!(pool.size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_refill_noop_at_target_buffer() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new(100));
        let pool = test_pool(small_config(), &store, &ledger);

        store.push("test_list", "a").await.unwrap();
        store.push("test_list", "b").await.unwrap();

        pool.refill().await;
        assert_eq!(ledger.submissions(), 0);
        // Token untouched when no decision was needed.
        assert_eq!(store.get("test:refill-token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_token_advances_before_submission_failure() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new(100));
        ledger.fail_funding.store(true, Ordering::SeqCst);
        let pool = test_pool(small_config(), &store, &ledger);

        // Failure is swallowed; nothing reaches the queue.
        pool.refill().await;
        assert_eq!(pool.size().await.unwrap(), 0);

        // The decision was still consumed for height 100.
        assert_eq!(
            store.get("test:refill-token").await.unwrap().as_deref(),
            Some("100")
        );
        ledger.fail_funding.store(false, Ordering::SeqCst);
        pool.refill().await;
        assert_eq!(ledger.submissions(), 0, "same height stays consumed");

        ledger.height.store(101, Ordering::SeqCst);
        pool.refill().await;
        assert_eq!(ledger.submissions(), 1);
        assert_eq!(pool.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pop_empty_then_refill_scenario() {
        // targetBuffer=2, batchSize=1, empty queue, height=100.
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new(100));
        let pool = test_pool(small_config(), &store, &ledger);

        // First pop: out of stock, not an error. It fires a background
        // refill evaluation.
        assert!(pool.pop().await.unwrap().is_none());

        // Let the spawned refill run to completion.
        for _ in 0..100 {
            if ledger.submissions() > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(ledger.submissions(), 1);
        assert_eq!(
            store.get("test:refill-token").await.unwrap().as_deref(),
            Some("100")
        );

        // Second trigger at the same height is a no-op.
        pool.refill().await;
        assert_eq!(ledger.submissions(), 1);

        // At height 101 the refill proceeds again.
        ledger.height.store(101, Ordering::SeqCst);
        pool.refill().await;
        assert_eq!(ledger.submissions(), 2);
    }

    #[tokio::test]
    async fn test_pop_returns_decodable_credential() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new(100));
        let pool = test_pool(small_config(), &store, &ledger);

        pool.refill().await;
        let secret = pool.pop().await.unwrap().expect("one queued credential");
        assert!(secret.address().as_str().starts_with("sp1"));
        // The funded address matches the credential we got back.
        let submissions = ledger.fund_submissions.lock().unwrap();
        assert_eq!(submissions[0][0].0, secret.address());
    }
}
