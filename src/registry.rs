//! Pool registry.
//!
//! Maps account and network identifiers to pool and lease-store
//! instances. Pure lookups, no business logic.

use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::lease::LeaseStore;
use crate::pool::CredentialPool;

/// Pool bindings for one account on one network.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountBinding {
    /// Pool id serving plain credential pops.
    pub regular: String,
    /// Lease-store id serving ephemeral leases.
    pub ephemeral: String,
}

/// Account map shape of the accounts config file:
/// account -> network -> binding.
pub type AccountsConfig = HashMap<String, HashMap<String, AccountBinding>>;

/// Registry of pools, lease stores and account bindings.
pub struct PoolRegistry {
    pools: DashMap<String, Arc<CredentialPool>>,
    ephemeral: DashMap<String, Arc<LeaseStore>>,
    accounts: std::sync::RwLock<AccountsConfig>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
            ephemeral: DashMap::new(),
            accounts: std::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn insert_pool(&self, pool: Arc<CredentialPool>) {
        self.pools.insert(pool.id().to_string(), pool);
    }

    pub fn insert_ephemeral(&self, store: Arc<LeaseStore>) {
        self.ephemeral.insert(store.id().to_string(), store);
    }

    pub fn set_accounts(&self, accounts: AccountsConfig) {
        *self.accounts.write().expect("accounts lock poisoned") = accounts;
    }

    /// Whether the account is recognized at all.
    pub fn has_user(&self, account: &str) -> bool {
        self.accounts
            .read()
            .expect("accounts lock poisoned")
            .contains_key(account)
    }

    fn binding(&self, account: &str, network: &str) -> Option<AccountBinding> {
        self.accounts
            .read()
            .expect("accounts lock poisoned")
            .get(account)?
            .get(network)
            .cloned()
    }

    /// Regular pool bound to an account on a network.
    pub fn pool(&self, account: &str, network: &str) -> Option<Arc<CredentialPool>> {
        let binding = self.binding(account, network)?;
        self.pool_by_id(&binding.regular)
    }

    /// Lease store bound to an account on a network.
    pub fn ephemeral_pool(&self, account: &str, network: &str) -> Option<Arc<LeaseStore>> {
        let binding = self.binding(account, network)?;
        self.ephemeral_by_id(&binding.ephemeral)
    }

    pub fn pool_by_id(&self, id: &str) -> Option<Arc<CredentialPool>> {
        self.pools.get(id).map(|p| Arc::clone(&p))
    }

    pub fn ephemeral_by_id(&self, id: &str) -> Option<Arc<LeaseStore>> {
        self.ephemeral.get(id).map(|s| Arc::clone(&s))
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
