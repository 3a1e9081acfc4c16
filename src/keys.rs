//! Key encoding and decoding utilities
//!
//! All keys are fixed-width big-endian binary so that RocksDB's lexicographic
//! order matches numeric order. Partitioned keys start with the partition
//! prefix: network id (8 bytes) + contract address (20 bytes).

use crate::records::TriggerKind;
use alloy_primitives::{Address, B256};
use anyhow::Result;

/// Length of a (network, contract) partition prefix.
pub const PARTITION_LEN: usize = 28;

/// Encode a (network, contract) partition prefix.
///
/// Format: network_id (8 bytes, big-endian) + contract (20 bytes)
/// Total length: 28 bytes
pub fn encode_partition(network_id: u64, contract: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(PARTITION_LEN);
    key.extend_from_slice(&network_id.to_be_bytes());
    key.extend_from_slice(contract.as_slice());
    key
}

/// Encode a checkpoint key. Same layout as the partition prefix.
pub fn encode_checkpoint_key(network_id: u64, contract: Address) -> Vec<u8> {
    encode_partition(network_id, contract)
}

/// Encode a transaction key.
///
/// Format: partition (28 bytes) + id (8 bytes, big-endian)
/// Total length: 36 bytes
pub fn encode_transaction_key(network_id: u64, contract: Address, id: u64) -> Vec<u8> {
    let mut key = encode_partition(network_id, contract);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Decode a transaction key into (network_id, contract, id).
pub fn decode_transaction_key(key: &[u8]) -> Result<(u64, Address, u64)> {
    if key.len() != PARTITION_LEN + 8 {
        anyhow::bail!("Transaction key must be 36 bytes, got {}", key.len());
    }
    let network_id = u64::from_be_bytes(key[0..8].try_into()?);
    let contract = Address::from_slice(&key[8..28]);
    let id = u64::from_be_bytes(key[28..36].try_into()?);
    Ok((network_id, contract, id))
}

/// Encode a transfer identity key, used to make ingestion idempotent.
///
/// Format: partition (28 bytes) + tx_hash (32 bytes) + log_index (8 bytes)
/// Total length: 68 bytes
pub fn encode_transfer_index_key(
    network_id: u64,
    contract: Address,
    tx_hash: B256,
    log_index: u64,
) -> Vec<u8> {
    let mut key = encode_partition(network_id, contract);
    key.extend_from_slice(tx_hash.as_slice());
    key.extend_from_slice(&log_index.to_be_bytes());
    key
}

/// Encode an outgoing-transfer index key.
///
/// Format: partition (28 bytes) + from (20 bytes) + id (8 bytes)
/// Total length: 56 bytes
pub fn encode_outgoing_key(network_id: u64, contract: Address, from: Address, id: u64) -> Vec<u8> {
    let mut key = encode_outgoing_prefix(network_id, contract, from);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Prefix of all outgoing-transfer keys for one sender.
pub fn encode_outgoing_prefix(network_id: u64, contract: Address, from: Address) -> Vec<u8> {
    let mut key = encode_partition(network_id, contract);
    key.extend_from_slice(from.as_slice());
    key
}

/// Decode the transaction id from an outgoing-transfer key.
pub fn decode_outgoing_id(key: &[u8]) -> Result<u64> {
    if key.len() != PARTITION_LEN + 28 {
        anyhow::bail!("Outgoing key must be 56 bytes, got {}", key.len());
    }
    Ok(u64::from_be_bytes(key[48..56].try_into()?))
}

/// Encode a watermark key.
///
/// Format: rule_id (8 bytes, big-endian)
pub fn encode_watermark_key(rule_id: u64) -> Vec<u8> {
    rule_id.to_be_bytes().to_vec()
}

/// Encode a dispatch status key.
///
/// Format: partition (28 bytes) + id (8 bytes) + trigger kind tag (1 byte)
/// Total length: 37 bytes
pub fn encode_status_key(network_id: u64, contract: Address, id: u64, kind: TriggerKind) -> Vec<u8> {
    let mut key = encode_transaction_key(network_id, contract, id);
    key.push(kind.as_byte());
    key
}

/// Encode a sequence key (next transaction id of a partition).
///
/// Format: byte 'Q' (0x51) + partition (28 bytes)
/// Total length: 29 bytes
pub fn encode_sequence_key(network_id: u64, contract: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + PARTITION_LEN);
    key.push(b'Q');
    key.extend_from_slice(&encode_partition(network_id, contract));
    key
}
