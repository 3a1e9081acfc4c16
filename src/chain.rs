//! Chain client capability
//!
//! The connector only needs a handful of JSON-RPC calls. They sit behind the
//! `ChainClient` trait so the scanning pipeline can run against any node
//! client, and against scripted clients in tests.

use crate::error::ConnectorError;
use crate::types::{Log, Receipt};
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 = B256::new([
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b, 0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d,
    0xaa, 0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16, 0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23,
    0xb3, 0xef,
]);

/// `eth_getLogs` filter: one contract, one topic0, inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: B256,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    /// Filter for ERC20 `Transfer` events of a contract.
    pub fn transfers(address: Address, from_block: u64, to_block: u64) -> Self {
        Self {
            address,
            topic0: TRANSFER_TOPIC,
            from_block,
            to_block,
        }
    }

    /// JSON-RPC params object.
    ///
    /// Single-topic filter: some nodes reject `[topic0, null, null]`.
    pub fn to_params(&self) -> Value {
        json!({
            "address": format!("0x{:x}", self.address),
            "topics": [format!("0x{:x}", self.topic0)],
            "fromBlock": format!("0x{:x}", self.from_block),
            "toBlock": format!("0x{:x}", self.to_block),
        })
    }
}

/// Read-only chain access needed by the connector.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain head.
    async fn block_number(&self) -> Result<u64, ConnectorError>;

    /// Logs matching a filter. An empty result is not an error.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ConnectorError>;

    /// Receipt of a transaction, `None` if the node does not know it.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, ConnectorError>;

    /// Timestamp (Unix epoch seconds) of a block.
    async fn block_timestamp(&self, block: u64) -> Result<u64, ConnectorError>;

    /// ERC20 `balanceOf(holder)` at the latest block.
    async fn erc20_balance_of(&self, token: Address, holder: Address) -> Result<U256, ConnectorError>;
}

/// Chain clients keyed by network id.
#[derive(Clone, Default)]
pub struct ChainRegistry {
    clients: HashMap<u64, Arc<dyn ChainClient>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the client of a network.
    pub fn insert(&mut self, network_id: u64, client: Arc<dyn ChainClient>) {
        self.clients.insert(network_id, client);
    }

    /// Client of a network. Rules pointing at an unknown network are
    /// misconfigured.
    pub fn get(&self, network_id: u64) -> Result<Arc<dyn ChainClient>, ConnectorError> {
        self.clients.get(&network_id).cloned().ok_or_else(|| {
            ConnectorError::Configuration(format!("no RPC endpoint configured for network {}", network_id))
        })
    }

    pub fn network_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
