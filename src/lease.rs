//! Ephemeral credential leases.
//!
//! A lease binds one borrowed credential to a decaying spend allowance
//! and a time-to-live. The store schema keeps three records per lease:
//! an expire marker with the lease duration, and the secret and
//! allowance with twice that, so the recycle handler can still read the
//! secret shortly after the marker fires. On expiry the credential is
//! either recycled back into its pool or discarded, depending on how
//! much allowance is left.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ledger::{Address, SecretKey};
use crate::pool::CredentialPool;
use crate::registry::PoolRegistry;
use crate::store::KvStore;
use crate::types::{Result, SpigotError};

/// Per-lease-pool configuration.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Lifetime of a lease; record data survives twice as long.
    pub lease_duration: Duration,
    /// Amount held back from the allowance for reuse and fees.
    pub reserve_amount: i64,
    /// Allowance below which an expired credential is discarded
    /// instead of recycled.
    pub reuse_threshold: i64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(300),
            reserve_amount: 1_000_000,
            reuse_threshold: 1_000_000,
        }
    }
}

/// What a caller gets back from lease creation. The secret never
/// leaves the store.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LeaseGrant {
    pub id: String,
    pub pkh: Address,
}

/// Stored lease data. Absence of either field means the lease is not
/// usable; that is a normal condition, not an error.
#[derive(Debug)]
pub struct LeaseRecord {
    pub secret: Option<SecretKey>,
    pub allowance: Option<i64>,
}

/// Explicit lease state, inferred from which records survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Expire marker still present; the lease is usable.
    Active,
    /// Marker fired but the secret is still readable; the recycle
    /// window is open. A lease that never gets its expiry event stays
    /// here until the data TTL lapses (orphaned, tolerated).
    Expiring,
    /// Nothing left in the store.
    Gone,
}

/// Issues and terminates leases over one pool's credentials.
pub struct LeaseStore {
    id: String,
    config: LeaseConfig,
    pool: Arc<CredentialPool>,
    kv: Arc<dyn KvStore>,
}

impl LeaseStore {
    pub fn new(
        id: String,
        config: LeaseConfig,
        pool: Arc<CredentialPool>,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            id,
            config,
            pool,
            kv,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    fn expire_key(&self, lease_id: &str) -> String {
        format!("{}:{}:expire", self.id, lease_id)
    }

    fn secret_key(&self, lease_id: &str) -> String {
        format!("{}:{}:secret", self.id, lease_id)
    }

    fn amount_key(&self, lease_id: &str) -> String {
        format!("{}:{}:amount", self.id, lease_id)
    }

    /// Create a lease: borrow a credential, compute its allowance from
    /// the live balance minus the reserve, persist the records.
    pub async fn create(&self) -> Result<LeaseGrant> {
        let secret = self
            .pool
            .pop()
            .await?
            .ok_or(SpigotError::OutOfCredentials)?;
        let address = secret.address();

        let balance = self.pool.ledger().balance(&address).await?;
        let allowance = balance - self.config.reserve_amount;

        let lease_id = Uuid::new_v4().to_string();
        let ttl = self.config.lease_duration;
        let data_ttl = ttl * 2;

        self.kv.set_ex(&self.expire_key(&lease_id), "", ttl).await?;
        self.kv
            .set_ex(&self.secret_key(&lease_id), &secret.to_b58(), data_ttl)
            .await?;
        self.kv
            .set_ex(&self.amount_key(&lease_id), &allowance.to_string(), data_ttl)
            .await?;

        info!(
            lease_pool = %self.id,
            lease = %lease_id,
            address = %address,
            allowance,
            "ephemeral lease issued"
        );

        Ok(LeaseGrant {
            id: lease_id,
            pkh: address,
        })
    }

    /// Read a lease's secret and allowance. Missing or expired records
    /// read as absent.
    pub async fn get(&self, lease_id: &str) -> Result<LeaseRecord> {
        let secret = match self.kv.get(&self.secret_key(lease_id)).await? {
            Some(encoded) => Some(SecretKey::from_b58(&encoded)?),
            None => None,
        };
        let allowance = self
            .kv
            .get(&self.amount_key(lease_id)).await?
            .and_then(|v| v.parse::<i64>().ok());
        Ok(LeaseRecord { secret, allowance })
    }

    /// Current lease state, inferred from surviving records.
    pub async fn state(&self, lease_id: &str) -> Result<LeaseState> {
        if self.kv.get(&self.expire_key(lease_id)).await?.is_some() {
            return Ok(LeaseState::Active);
        }
        if self.kv.get(&self.secret_key(lease_id)).await?.is_some() {
            return Ok(LeaseState::Expiring);
        }
        Ok(LeaseState::Gone)
    }

    /// Atomically decrement the stored allowance. No clamping: the
    /// policy engine validates before calling.
    pub async fn decr(&self, lease_id: &str, amount: i64) -> Result<i64> {
        self.kv.decr_by(&self.amount_key(lease_id), amount).await
    }

    /// Terminate a lease after its expire marker fires.
    ///
    /// Missing data is a silent no-op (already cleaned up, or the event
    /// outlived the 2x data window). Otherwise the credential is pushed
    /// back to its pool when the remaining allowance clears the reuse
    /// threshold, and dropped for good when it does not.
    pub async fn recycle(&self, lease_id: &str) -> Result<()> {
        let record = self.get(lease_id).await?;
        let Some(secret) = record.secret else {
            debug!(lease_pool = %self.id, lease = %lease_id, "expired lease has no data, nothing to recycle");
            return Ok(());
        };
        // Missing allowance with a surviving secret reads as zero:
        // below any sensible threshold, so the credential is dropped
        // rather than reissued with an unknown quota.
        let allowance = record.allowance.unwrap_or(0);

        if allowance < self.config.reuse_threshold {
            info!(
                lease_pool = %self.id,
                lease = %lease_id,
                allowance,
                threshold = self.config.reuse_threshold,
                "discarding expired credential"
            );
        } else {
            self.pool.push(&secret).await?;
            info!(
                lease_pool = %self.id,
                lease = %lease_id,
                allowance,
                pool = %self.pool.id(),
                "recycled expired credential"
            );
        }

        // The marker has normally already expired by the time we run;
        // deleting it too keeps the state consistent when recycling is
        // invoked directly.
        self.kv.del(&self.expire_key(lease_id)).await?;
        self.kv.del(&self.secret_key(lease_id)).await?;
        self.kv.del(&self.amount_key(lease_id)).await?;
        Ok(())
    }
}

/// Split an expired key name of the form `{pool}:{lease}:expire`.
fn parse_expire_key(key: &str) -> Option<(&str, &str)> {
    key.strip_suffix(":expire")?.rsplit_once(':')
}

/// Consume expiry events and dispatch recycling.
///
/// Decoupled from the notification transport: anything that can feed
/// the broadcast channel (store sweeper, keyspace notifications) drives
/// the same handler. Lagged and unparseable events are dropped, which
/// matches the best-effort delivery contract.
pub fn spawn_recycle_task(registry: Arc<PoolRegistry>, mut events: broadcast::Receiver<String>) {
    tokio::spawn(async move {
        loop {
            let key = match events.recv().await {
                Ok(key) => key,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "expiry events lagged; orphaned credentials possible");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("expiry event channel closed, recycle task stopping");
                    return;
                }
            };

            let Some((lease_pool_id, lease_id)) = parse_expire_key(&key) else {
                continue;
            };
            let Some(lease_store) = registry.ephemeral_by_id(lease_pool_id) else {
                warn!(lease_pool = %lease_pool_id, "expiry event for unknown lease pool");
                continue;
            };
            if let Err(e) = lease_store.recycle(lease_id).await {
                warn!(
                    lease_pool = %lease_pool_id,
                    lease = %lease_id,
                    error = %e,
                    "unable to recycle credential"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mock::MockLedger;
    use crate::ledger::LedgerGateway;
    use crate::pool::PoolConfig;
    use crate::store::{KvStore, MemoryStore, QueueStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        ledger: Arc<MockLedger>,
        pool: Arc<CredentialPool>,
    }

    fn fixture(config: LeaseConfig) -> (Fixture, LeaseStore) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new(50));
        let pool = Arc::new(CredentialPool::new(
            PoolConfig {
                id: "pool-a".into(),
                list_name: "pool_a_list".into(),
                // Zero target: pop-triggered refills decline, keeping
                // these tests deterministic.
                target_buffer: 0,
                batch_size: 1,
                funding_amount: 1_000_000,
            },
            Arc::clone(&store) as Arc<dyn QueueStore>,
            Arc::clone(&store) as Arc<dyn KvStore>,
            Arc::clone(&ledger) as Arc<dyn LedgerGateway>,
        ));
        let lease_store = LeaseStore::new(
            "eph-a".into(),
            config,
            Arc::clone(&pool),
            Arc::clone(&store) as Arc<dyn KvStore>,
        );
        (
            Fixture {
                store,
                ledger,
                pool,
            },
            lease_store,
        )
    }

    /// Queue a credential with a known balance; returns its secret.
    async fn seed_credential(fx: &Fixture, balance: i64) -> SecretKey {
        let (secret, address) = crate::ledger::generate_keypair();
        fx.ledger.set_balance(&address, balance);
        fx.store.push("pool_a_list", &secret.to_b58()).await.unwrap();
        secret
    }

    fn config(reserve: i64, threshold: i64) -> LeaseConfig {
        LeaseConfig {
            lease_duration: Duration::from_secs(60),
            reserve_amount: reserve,
            reuse_threshold: threshold,
        }
    }

    #[tokio::test]
    async fn test_create_computes_allowance_from_live_balance() {
        let (fx, leases) = fixture(config(1_000_000, 500_000));
        let secret = seed_credential(&fx, 5_000_000).await;

        let grant = leases.create().await.unwrap();
        assert_eq!(grant.pkh, secret.address());

        let record = leases.get(&grant.id).await.unwrap();
        assert_eq!(record.allowance, Some(4_000_000));
        assert_eq!(record.secret.unwrap().to_b58(), secret.to_b58());
        assert_eq!(leases.state(&grant.id).await.unwrap(), LeaseState::Active);
    }

    #[tokio::test]
    async fn test_create_out_of_credentials() {
        let (_fx, leases) = fixture(config(0, 0));
        let err = leases.create().await.unwrap_err();
        assert!(matches!(err, SpigotError::OutOfCredentials));
    }

    #[tokio::test]
    async fn test_get_missing_lease_is_absent_not_error() {
        let (_fx, leases) = fixture(config(0, 0));
        let record = leases.get("no-such-lease").await.unwrap();
        assert!(record.secret.is_none());
        assert!(record.allowance.is_none());
        assert_eq!(
            leases.state("no-such-lease").await.unwrap(),
            LeaseState::Gone
        );
    }

    #[tokio::test]
    async fn test_decr_does_not_clamp() {
        let (fx, leases) = fixture(config(0, 0));
        seed_credential(&fx, 1_000).await;
        let grant = leases.create().await.unwrap();

        assert_eq!(leases.decr(&grant.id, 400).await.unwrap(), 600);
        assert_eq!(leases.decr(&grant.id, 700).await.unwrap(), -100);
    }

    #[tokio::test]
    async fn test_recycle_above_threshold_requeues_exactly_once() {
        let (fx, leases) = fixture(config(1_000_000, 500_000));
        let secret = seed_credential(&fx, 5_000_000).await;
        let grant = leases.create().await.unwrap();
        assert_eq!(fx.pool.size().await.unwrap(), 0);

        leases.recycle(&grant.id).await.unwrap();
        assert_eq!(fx.pool.size().await.unwrap(), 1);
        let requeued = fx.store.pop("pool_a_list").await.unwrap().unwrap();
        assert_eq!(requeued, secret.to_b58());

        // A second event for the same lease finds no data: no-op.
        leases.recycle(&grant.id).await.unwrap();
        assert_eq!(fx.pool.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recycle_below_threshold_discards() {
        let (fx, leases) = fixture(config(1_000_000, 500_000));
        seed_credential(&fx, 5_000_000).await;
        let grant = leases.create().await.unwrap();

        // Spend the allowance below the reuse threshold.
        leases.decr(&grant.id, 3_800_000).await.unwrap();

        leases.recycle(&grant.id).await.unwrap();
        assert_eq!(fx.pool.size().await.unwrap(), 0, "never reappears");
        assert_eq!(leases.state(&grant.id).await.unwrap(), LeaseState::Gone);
    }

    #[tokio::test]
    async fn test_recycle_missing_lease_is_silent() {
        let (_fx, leases) = fixture(config(0, 0));
        leases.recycle("never-created").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_machine_over_ttls() {
        let (fx, leases) = fixture(config(0, 0));
        seed_credential(&fx, 1_000).await;
        let grant = leases.create().await.unwrap();
        assert_eq!(leases.state(&grant.id).await.unwrap(), LeaseState::Active);

        // Marker fires at the lease duration; data survives to 2x.
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(leases.state(&grant.id).await.unwrap(), LeaseState::Expiring);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(leases.state(&grant.id).await.unwrap(), LeaseState::Gone);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_event_drives_recycle_task() {
        let (fx, leases) = fixture(config(1_000_000, 500_000));
        let secret = seed_credential(&fx, 5_000_000).await;
        let grant = leases.create().await.unwrap();

        let registry = Arc::new(PoolRegistry::new());
        registry.insert_pool(Arc::clone(&fx.pool));
        registry.insert_ephemeral(Arc::new(LeaseStore::new(
            "eph-a".into(),
            config(1_000_000, 500_000),
            Arc::clone(&fx.pool),
            Arc::clone(&fx.store) as Arc<dyn KvStore>,
        )));

        use crate::store::ExpiryEvents;
        spawn_recycle_task(Arc::clone(&registry), fx.store.subscribe());

        // Fire the marker and sweep: the event reaches the task, the
        // credential comes back to the pool.
        tokio::time::advance(Duration::from_secs(61)).await;
        fx.store.sweep();
        for _ in 0..100 {
            if fx.pool.size().await.unwrap() > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(fx.pool.size().await.unwrap(), 1);
        let requeued = fx.store.pop("pool_a_list").await.unwrap().unwrap();
        assert_eq!(requeued, secret.to_b58());
        drop(leases);
        let _ = grant;
    }

    #[test]
    fn test_parse_expire_key() {
        assert_eq!(
            parse_expire_key("eph-a:1234-abcd:expire"),
            Some(("eph-a", "1234-abcd"))
        );
        assert_eq!(parse_expire_key("eph-a:1234:secret"), None);
        assert_eq!(parse_expire_key("noseparator"), None);
    }
}
