//! Spigot - custodial credential pool and ephemeral signing gateway.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spigot::{
    config::{self, Args},
    ledger::{LedgerGateway, RpcGateway},
    lease::{spawn_recycle_task, LeaseConfig, LeaseStore},
    pool::{spawn_refill_timer, CredentialPool, PoolConfig},
    registry::PoolRegistry,
    server::{self, AppState},
    store::{memory::spawn_sweeper, ExpiryEvents, KvStore, MemoryStore, QueueStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("spigot={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let pools_config = config::load_pools(&args.pools_config)?;
    let accounts_config = config::load_accounts(&args.accounts_config)?;
    let ephemeral_config = config::load_ephemeral(&args.ephemeral_config)?;

    info!("======================================");
    info!("  Spigot - credential pool gateway");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Pools: {}", pools_config.len());
    info!("Lease pools: {}", ephemeral_config.len());
    info!("Accounts: {}", accounts_config.len());
    info!("======================================");

    // External store. The in-memory implementation serves single-node
    // deployments; its sweeper doubles as the expiry notifier.
    let store = Arc::new(MemoryStore::new());
    spawn_sweeper(
        Arc::clone(&store),
        Duration::from_millis(args.sweep_interval_ms),
    );

    let registry = Arc::new(PoolRegistry::new());
    registry.set_accounts(accounts_config);

    let rpc_timeout = Duration::from_millis(args.rpc_timeout_ms);
    for (pool_id, entry) in pools_config {
        let ledger: Arc<dyn LedgerGateway> =
            Arc::new(RpcGateway::new(&entry.rpc_url, rpc_timeout)?);
        let pool = Arc::new(CredentialPool::new(
            PoolConfig {
                id: pool_id.clone(),
                list_name: entry.list_name,
                target_buffer: entry.target_buffer,
                batch_size: entry.batch_size,
                funding_amount: entry.funding_amount,
            },
            Arc::clone(&store) as Arc<dyn QueueStore>,
            Arc::clone(&store) as Arc<dyn KvStore>,
            ledger,
        ));
        if args.refill_interval_ms > 0 {
            spawn_refill_timer(
                Arc::clone(&pool),
                Duration::from_millis(args.refill_interval_ms),
            );
        }
        info!(pool = %pool_id, "pool registered");
        registry.insert_pool(pool);
    }

    for (lease_pool_id, entry) in ephemeral_config {
        let Some(pool) = registry.pool_by_id(&entry.pool_id) else {
            error!(
                lease_pool = %lease_pool_id,
                pool = %entry.pool_id,
                "ephemeral config references unknown pool"
            );
            std::process::exit(1);
        };
        let lease_store = Arc::new(LeaseStore::new(
            lease_pool_id.clone(),
            LeaseConfig {
                lease_duration: Duration::from_secs(entry.expire_secs),
                reserve_amount: entry.reserve_amount,
                reuse_threshold: entry.reuse_threshold,
            },
            pool,
            Arc::clone(&store) as Arc<dyn KvStore>,
        ));
        info!(lease_pool = %lease_pool_id, "lease pool registered");
        registry.insert_ephemeral(lease_store);
    }

    // Expiry events drive recycling, decoupled from the store transport.
    spawn_recycle_task(Arc::clone(&registry), store.subscribe());

    let state = Arc::new(AppState::new(args, registry));
    server::run(state).await?;
    Ok(())
}
