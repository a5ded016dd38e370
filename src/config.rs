//! Configuration for Spigot.
//!
//! CLI arguments and environment variable handling using clap, plus the
//! JSON config files describing pools, lease pools and account
//! bindings.

use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use uuid::Uuid;

use crate::registry::AccountsConfig;
use crate::types::{Result, SpigotError};

/// Spigot - custodial credential pool and ephemeral signing gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "spigot")]
#[command(about = "Leases pre-funded signing credentials with spend-limited quotas")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Path to the pools config (pool id -> funding parameters)
    #[arg(long, env = "POOLS_CONFIG", default_value = "pools-config.json")]
    pub pools_config: String,

    /// Path to the accounts config (account -> network -> pool bindings)
    #[arg(long, env = "ACCOUNTS_CONFIG", default_value = "accounts-config.json")]
    pub accounts_config: String,

    /// Path to the ephemeral config (lease pool id -> lease parameters)
    #[arg(long, env = "EPHEMERAL_CONFIG", default_value = "ephemeral-config.json")]
    pub ephemeral_config: String,

    /// Periodic refill evaluation interval in milliseconds (0 disables
    /// the timer; refills then run only after pops)
    #[arg(long, env = "REFILL_INTERVAL_MS", default_value = "60000")]
    pub refill_interval_ms: u64,

    /// Store sweep interval in milliseconds (expiry event granularity)
    #[arg(long, env = "SWEEP_INTERVAL_MS", default_value = "1000")]
    pub sweep_interval_ms: u64,

    /// Ledger RPC request timeout in milliseconds
    #[arg(long, env = "RPC_TIMEOUT_MS", default_value = "30000")]
    pub rpc_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration before startup.
    pub fn validate(&self) -> Result<()> {
        if self.rpc_timeout_ms == 0 {
            return Err(SpigotError::Internal(
                "RPC_TIMEOUT_MS must be positive".into(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(SpigotError::Internal(
                "SWEEP_INTERVAL_MS must be positive".into(),
            ));
        }
        for path in [
            &self.pools_config,
            &self.accounts_config,
            &self.ephemeral_config,
        ] {
            if !Path::new(path).exists() {
                return Err(SpigotError::Internal(format!(
                    "config file not found: {path}"
                )));
            }
        }
        Ok(())
    }
}

/// One entry of the pools config file.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolFileEntry {
    /// Ledger node RPC endpoint for this pool.
    pub rpc_url: String,
    /// Store list holding the queued credentials.
    pub list_name: String,
    /// Queue depth the refill coordinator aims for.
    #[serde(default = "default_target_buffer")]
    pub target_buffer: usize,
    /// Credentials generated and funded per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Funding per credential, in the ledger's smallest unit.
    pub funding_amount: i64,
}

fn default_target_buffer() -> usize {
    100
}

fn default_batch_size() -> usize {
    20
}

/// One entry of the ephemeral config file.
#[derive(Debug, Clone, Deserialize)]
pub struct EphemeralFileEntry {
    /// Pool the lease store borrows credentials from.
    #[serde(rename = "pool-id")]
    pub pool_id: String,
    /// Lease lifetime in seconds.
    pub expire_secs: u64,
    /// Amount held back from each lease's allowance.
    pub reserve_amount: i64,
    /// Allowance below which an expired credential is discarded.
    pub reuse_threshold: i64,
}

/// Pools config file: pool id -> entry.
pub type PoolsFileConfig = HashMap<String, PoolFileEntry>;

/// Ephemeral config file: lease pool id -> entry.
pub type EphemeralFileConfig = HashMap<String, EphemeralFileEntry>;

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SpigotError::Internal(format!("read {path}: {e}")))?;
    serde_json::from_str(&raw).map_err(|e| SpigotError::Internal(format!("parse {path}: {e}")))
}

pub fn load_pools(path: &str) -> Result<PoolsFileConfig> {
    read_json(path)
}

pub fn load_accounts(path: &str) -> Result<AccountsConfig> {
    read_json(path)
}

pub fn load_ephemeral(path: &str) -> Result<EphemeralFileConfig> {
    read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_entry_defaults() {
        let entry: PoolFileEntry = serde_json::from_str(
            r#"{
                "rpc_url": "http://node:8732",
                "list_name": "testnet_keys",
                "funding_amount": 10000000
            }"#,
        )
        .unwrap();
        assert_eq!(entry.target_buffer, 100);
        assert_eq!(entry.batch_size, 20);
        assert_eq!(entry.funding_amount, 10_000_000);
    }

    #[test]
    fn test_ephemeral_entry_shape() {
        let config: EphemeralFileConfig = serde_json::from_str(
            r#"{
                "testnet-eph": {
                    "pool-id": "testnet-pool",
                    "expire_secs": 300,
                    "reserve_amount": 1000000,
                    "reuse_threshold": 500000
                }
            }"#,
        )
        .unwrap();
        let entry = &config["testnet-eph"];
        assert_eq!(entry.pool_id, "testnet-pool");
        assert_eq!(entry.expire_secs, 300);
    }
}
