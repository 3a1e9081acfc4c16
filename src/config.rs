//! Service configuration loading
//!
//! The connector is configured by a JSON file:
//!
//! ```json
//! {
//!   "poll_interval_secs": 60,
//!   "rpc_timeout_secs": 30,
//!   "max_block_range": 2000,
//!   "dispatch_workers": 5,
//!   "dispatch_queue": 1024,
//!   "networks": [
//!     { "name": "polygon", "network_id": 137, "rpc_url": "https://polygon-rpc.com" }
//!   ],
//!   "sink": { "type": "webhook", "url": "http://127.0.0.1:8080/triggers" }
//! }
//! ```
//!
//! Everything but `networks` has a default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// One chain the connector can reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub network_id: u64,
    pub rpc_url: String,
}

impl NetworkConfig {
    /// Refuse a node that serves another chain than the configured one.
    pub fn check_chain_id(&self, reported: u64) -> Result<()> {
        if reported != self.network_id {
            anyhow::bail!(
                "Network {} is configured as chain {} but its node reports chain {}",
                self.name,
                self.network_id,
                reported
            );
        }
        Ok(())
    }
}

/// Where outbound events go.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    /// JSON lines on stdout
    #[default]
    Stdout,
    /// HTTP POST of each event
    Webhook { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Largest block range of one `eth_getLogs` request
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,
    /// Capacity of the dispatch queue. A full queue makes the tick wait for room.
    #[serde(default = "default_dispatch_queue")]
    pub dispatch_queue: usize,
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub sink: SinkConfig,
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

fn default_max_block_range() -> u64 {
    2000
}

fn default_dispatch_workers() -> usize {
    5
}

fn default_dispatch_queue() -> usize {
    1024
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.networks.is_empty() {
            anyhow::bail!("Config must list at least one network");
        }
        let mut ids = HashSet::new();
        for network in &self.networks {
            if !ids.insert(network.network_id) {
                anyhow::bail!("Network id {} is configured twice", network.network_id);
            }
            if network.rpc_url.trim().is_empty() {
                anyhow::bail!("Network {} has an empty rpc_url", network.name);
            }
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        if self.rpc_timeout_secs == 0 {
            anyhow::bail!("rpc_timeout_secs must be greater than zero");
        }
        if self.max_block_range == 0 {
            anyhow::bail!("max_block_range must be greater than zero");
        }
        if self.dispatch_workers == 0 || self.dispatch_queue == 0 {
            anyhow::bail!("dispatch_workers and dispatch_queue must be greater than zero");
        }
        if let SinkConfig::Webhook { url } = &self.sink {
            if url.trim().is_empty() {
                anyhow::bail!("Webhook sink needs a url");
            }
        }
        Ok(())
    }
}

/// Parse and validate a config document.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = serde_json::from_str(contents).context("Invalid config JSON")?;
    config.validate()?;
    Ok(config)
}

/// Load the service config from a file.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    parse_config(&contents).with_context(|| format!("Failed to load config file: {:?}", path))
}
