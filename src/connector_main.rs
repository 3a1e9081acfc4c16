//! EVM trigger connector binary
//!
//! Polls the configured chains for ERC20 transfers of the contracts that
//! gamification rules watch and publishes the resulting triggers.

use anyhow::{Context, Result};
use clap::Parser;
use evm_triggers::chain::{ChainClient, ChainRegistry};
use evm_triggers::config::load_config;
use evm_triggers::connector::Connector;
use evm_triggers::dispatch::{build_sink, Dispatcher};
use evm_triggers::rpc::RpcClient;
use evm_triggers::rules::FileRuleSource;
use evm_triggers::store::{ConnectorStore, RocksConnectorStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// EVM trigger connector
#[derive(Parser)]
#[command(name = "connector")]
#[command(about = "Turn ERC20 transfers into gamification triggers")]
struct Args {
    /// Path to the service config file (JSON)
    #[arg(short, long, default_value = "connector.json")]
    config: PathBuf,

    /// Path to the rules file (JSON array), re-read on every tick
    #[arg(short, long, default_value = "rules.json")]
    rules: PathBuf,

    /// Path to RocksDB database directory
    #[arg(short, long, default_value = "./connector_db")]
    db_path: PathBuf,

    /// Run a single tick, wait for its dispatches, and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    info!("Starting EVM trigger connector");
    info!("Config: {:?}", args.config);
    info!("Rules: {:?}", args.rules);
    info!("Database: {:?}", args.db_path);

    let config = load_config(&args.config)?;

    // Open connector store
    let store: Arc<dyn ConnectorStore> = Arc::new(
        RocksConnectorStore::open(&args.db_path)
            .with_context(|| format!("Failed to open database at {:?}", args.db_path))?,
    );

    // One RPC client per network
    let mut chains = ChainRegistry::new();
    for network in &config.networks {
        let rpc = RpcClient::new(network.rpc_url.clone(), config.rpc_timeout())
            .with_context(|| format!("Failed to create RPC client for {}", network.name))?;
        info!("Network {} ({}): {}", network.name, network.network_id, rpc.url());
        // A node on the wrong chain is fatal; an unreachable one is retried every tick
        match rpc.chain_id().await {
            Ok(id) => network.check_chain_id(id)?,
            Err(e) => warn!("Could not reach network {}: {}", network.name, e),
        }
        chains.insert(network.network_id, Arc::new(rpc) as Arc<dyn ChainClient>);
    }

    info!("Watching networks {:?}", chains.network_ids());

    let sink = build_sink(&config.sink, config.rpc_timeout()).context("Failed to create sink")?;
    let dispatcher = Dispatcher::spawn(
        sink,
        store.clone(),
        config.dispatch_workers,
        config.dispatch_queue,
    );

    let connector = Connector::new(
        store,
        chains,
        Box::new(FileRuleSource::new(args.rules)),
        dispatcher.handle(),
        config.max_block_range,
    );

    if args.once {
        connector.tick().await;
        drop(connector);
        dispatcher.shutdown().await;
        info!("Connector stopped");
        return Ok(());
    }

    // Handle Ctrl+C gracefully; in-flight dispatches are abandoned
    tokio::select! {
        _ = connector.run(config.poll_interval()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    info!("Connector stopped");
    Ok(())
}
