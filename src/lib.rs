//! Spigot - custodial credential pool and ephemeral signing gateway.
//!
//! Spigot operates pools of pre-funded signing credentials and leases
//! short-lived, spend-limited delegated credentials to untrusted
//! clients, so they can obtain real network signatures without ever
//! holding a durable secret.
//!
//! ## Services
//!
//! - **Pools**: self-replenishing FIFO queues of funded credentials
//! - **Leases**: time- and quota-bounded delegation of one credential
//! - **Policy**: simulation-backed signature approval within the quota
//! - **Gateway**: HTTP surface for trusted IDE/tooling backends

pub mod config;
pub mod ledger;
pub mod lease;
pub mod policy;
pub mod pool;
pub mod registry;
pub mod routes;
pub mod server;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, SpigotError};
