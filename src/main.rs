//! plasma-txmgr
//!
//! Root-chain transaction manager for a Plasma-style layer-2 operator.
//! Wires an `alloy`-backed RPC backend and local-key keystore into
//! `txmgr_core::TransactionManager`, installs structured logging, and
//! drives `start`/`stop` around a shutdown signal. No business logic
//! lives here — everything below is plumbing.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use txmgr_chain::{AlloyBackend, AlloyKeystore};
use txmgr_core::{ManagerConfig, MemStore, TransactionManager};

/// Environment variable names.
mod env {
    pub const RPC_HTTP_URL: &str = "PLASMA_RPC_HTTP_URL";
    pub const RPC_WS_URL: &str = "PLASMA_RPC_WS_URL";
    pub const CHAIN_ID: &str = "PLASMA_CHAIN_ID";
    pub const PRIVATE_KEYS: &str = "PLASMA_PRIVATE_KEYS";
    pub const CONFIG_FILE: &str = "PLASMA_CONFIG_FILE";
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,txmgr_core=debug,txmgr_chain=debug")),
        )
        .init();

    info!("starting plasma-txmgr");

    let runtime_config = load_runtime_config()?;
    let manager_config = load_manager_config(&runtime_config)?;
    manager_config.log_config();

    let backend = Arc::new(AlloyBackend::new(
        runtime_config.rpc_http_url.clone(),
        runtime_config.rpc_ws_url.clone(),
    ));

    let mut keystore = AlloyKeystore::new();
    for key in &runtime_config.private_keys {
        let addr = keystore
            .add_key(key)
            .context("loading a configured private key")?;
        info!(%addr, "loaded signing key");
    }
    let keystore = Arc::new(keystore);

    // Embedded in-process store. A production deployment durable across
    // restarts implements `KvStore` against its own disk-backed engine
    // and is injected here in its place — the manager never constructs
    // its own store.
    let store = Arc::new(MemStore::new());

    let manager = TransactionManager::new(backend, keystore.clone(), store, manager_config)
        .await
        .context("constructing transaction manager")?;

    for addr in keystore.addresses() {
        manager
            .ensure_account(addr)
            .await
            .context("registering a configured account")?;
    }

    manager.start().await.context("starting transaction manager")?;
    info!("transaction manager running, awaiting shutdown signal");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("shutdown signal received, stopping");
    manager.stop().await;
    info!("plasma-txmgr stopped cleanly");

    Ok(())
}

/// Raw environment-derived configuration, before it is folded into a
/// [`ManagerConfig`].
struct RuntimeConfig {
    rpc_http_url: String,
    rpc_ws_url: String,
    chain_id: u64,
    private_keys: Vec<String>,
    config_file: Option<String>,
}

fn load_runtime_config() -> Result<RuntimeConfig> {
    let get_env = |name: &str| -> Result<String> {
        std::env::var(name).with_context(|| format!("missing env var: {name}"))
    };

    let chain_id: u64 = get_env(env::CHAIN_ID)?
        .parse()
        .context("PLASMA_CHAIN_ID must be a u64")?;

    let private_keys: Vec<String> = get_env(env::PRIVATE_KEYS)?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if private_keys.is_empty() {
        anyhow::bail!("PLASMA_PRIVATE_KEYS must contain at least one key");
    }

    Ok(RuntimeConfig {
        rpc_http_url: get_env(env::RPC_HTTP_URL)?,
        rpc_ws_url: get_env(env::RPC_WS_URL)?,
        chain_id,
        private_keys,
        config_file: std::env::var(env::CONFIG_FILE).ok(),
    })
}

/// Load a [`ManagerConfig`] from `PLASMA_CONFIG_FILE` if set, otherwise
/// fall back to defaults seeded with the runtime chain id.
fn load_manager_config(runtime: &RuntimeConfig) -> Result<ManagerConfig> {
    match &runtime.config_file {
        Some(path) => ManagerConfig::from_file(path).context("loading manager config file"),
        None => {
            let mut config = ManagerConfig::default();
            config.chain_id = runtime.chain_id;
            config.validate().context("default manager config")?;
            Ok(config)
        }
    }
}
