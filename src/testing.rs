//! Scripted chain client and recording sink shared by the unit tests.

use crate::chain::{ChainClient, LogFilter, TRANSFER_TOPIC};
use crate::dispatch::TriggerSink;
use crate::error::ConnectorError;
use crate::records::{NewTransfer, OutboundEvent, Trigger};
use crate::store::RocksConnectorStore;
use crate::types::{Log, Receipt};
use alloy_primitives::{address, Address, B256, U256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tempfile::TempDir;

pub const TOKEN: Address = address!("334d85047da64738c065d36e10b2adeb965000d0");
pub const ALICE: Address = address!("70997970c51812dc3a010c7d01b50e0d17dc79c8");
pub const BOB: Address = address!("3c44cdddb6a900fa2b585dd299e03d12fa4293bc");
pub const CAROL: Address = address!("90f79bf6eb2c4f870365e785982e1f101e93b906");
pub const NETWORK: u64 = 137;

/// One token unit with 18 decimals.
pub fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

pub fn create_test_store() -> (RocksConnectorStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = RocksConnectorStore::open(temp_dir.path()).unwrap();
    (store, temp_dir)
}

/// A decoded transfer on the test partition.
pub fn new_transfer(hash_byte: u8, from: Address, to: Address, amount: U256, sent_date: u64) -> NewTransfer {
    NewTransfer {
        transaction_hash: B256::repeat_byte(hash_byte),
        log_index: 0,
        block_number: 100,
        from,
        to,
        contract: TOKEN,
        network_id: NETWORK,
        amount,
        sent_date,
    }
}

fn topic_for(addr: Address) -> String {
    format!("0x{:0>64}", hex::encode(addr.as_slice()))
}

/// A well-formed Transfer log.
pub fn transfer_log(
    contract: Address,
    from: Address,
    to: Address,
    amount: U256,
    block: u64,
    tx_hash: B256,
    log_index: u64,
) -> Log {
    Log {
        address: contract,
        topics: vec![format!("0x{:x}", TRANSFER_TOPIC), topic_for(from), topic_for(to)],
        data: amount.to_be_bytes::<32>().to_vec(),
        block_number: Some(block),
        transaction_hash: Some(tx_hash),
        log_index: Some(log_index),
        removed: false,
    }
}

#[derive(Default)]
struct ChainState {
    head: u64,
    logs: Vec<Log>,
    receipts: HashMap<B256, Receipt>,
    timestamps: HashMap<u64, u64>,
    balances: HashMap<(Address, Address), U256>,
    offline: HashSet<&'static str>,
    undecodable: HashSet<B256>,
    calls: HashMap<&'static str, usize>,
}

/// In-memory `ChainClient` whose answers are set up by the test.
#[derive(Default)]
pub struct ScriptedChain {
    state: Mutex<ChainState>,
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn set_block_timestamp(&self, block: u64, secs: u64) {
        self.state.lock().unwrap().timestamps.insert(block, secs);
    }

    pub fn set_balance(&self, token: Address, holder: Address, balance: U256) {
        self.state.lock().unwrap().balances.insert((token, holder), balance);
    }

    /// Make every call of `method` fail with a connectivity error.
    pub fn set_offline(&self, method: &'static str) {
        self.state.lock().unwrap().offline.insert(method);
    }

    pub fn set_online(&self, method: &'static str) {
        self.state.lock().unwrap().offline.remove(method);
    }

    /// Answer the receipt of `hash` with a payload that does not decode.
    pub fn set_receipt_undecodable(&self, hash: B256) {
        self.state.lock().unwrap().undecodable.insert(hash);
    }

    /// Register a receipt and expose its logs through `eth_getLogs`.
    pub fn add_receipt(&self, receipt: Receipt) {
        let mut state = self.state.lock().unwrap();
        state.logs.extend(receipt.logs.iter().cloned());
        state.receipts.insert(receipt.transaction_hash, receipt);
    }

    /// Expose a log through `eth_getLogs` only.
    pub fn add_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    /// Successful receipt carrying `logs`.
    pub fn receipt(tx_hash: B256, block: u64, logs: Vec<Log>) -> Receipt {
        Receipt {
            transaction_hash: tx_hash,
            block_number: Some(block),
            status: Some(1),
            logs,
        }
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().unwrap().calls.get(method).copied().unwrap_or(0)
    }

    fn enter(&self, method: &'static str) -> Result<std::sync::MutexGuard<'_, ChainState>, ConnectorError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(method).or_insert(0) += 1;
        if state.offline.contains(method) {
            return Err(ConnectorError::Connectivity(format!("{} timed out", method)));
        }
        Ok(state)
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn block_number(&self) -> Result<u64, ConnectorError> {
        Ok(self.enter("eth_blockNumber")?.head)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ConnectorError> {
        let state = self.enter("eth_getLogs")?;
        let topic0 = format!("0x{:x}", filter.topic0);
        Ok(state
            .logs
            .iter()
            .filter(|log| log.address == filter.address)
            .filter(|log| log.topics.first() == Some(&topic0))
            .filter(|log| {
                log.block_number
                    .map_or(false, |b| b >= filter.from_block && b <= filter.to_block)
            })
            .cloned()
            .collect())
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, ConnectorError> {
        let state = self.enter("eth_getTransactionReceipt")?;
        if state.undecodable.contains(&hash) {
            return Err(ConnectorError::Decode(format!("invalid receipt for 0x{:x}", hash)));
        }
        Ok(state.receipts.get(&hash).cloned())
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, ConnectorError> {
        let state = self.enter("eth_getBlockByNumber")?;
        Ok(state
            .timestamps
            .get(&block)
            .copied()
            .unwrap_or(1_700_000_000 + block * 12))
    }

    async fn erc20_balance_of(&self, token: Address, holder: Address) -> Result<U256, ConnectorError> {
        let state = self.enter("eth_call")?;
        Ok(state.balances.get(&(token, holder)).copied().unwrap_or(U256::ZERO))
    }
}

/// Sink that keeps every published event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<OutboundEvent>>,
    failing: Mutex<HashSet<u64>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject triggers for the given transaction id.
    pub fn fail_transaction(&self, transaction_id: u64) {
        self.failing.lock().unwrap().insert(transaction_id);
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn triggers(&self) -> Vec<Trigger> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                OutboundEvent::Trigger(trigger) => Some(trigger),
                OutboundEvent::WatermarkAdvanced { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl TriggerSink for RecordingSink {
    async fn publish(&self, event: &OutboundEvent) -> Result<(), ConnectorError> {
        if let OutboundEvent::Trigger(trigger) = event {
            if self.failing.lock().unwrap().contains(&trigger.transaction_id) {
                return Err(ConnectorError::Connectivity("sink unavailable".into()));
            }
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
