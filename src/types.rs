//! Ethereum JSON-RPC types
//!
//! Type definitions for logs, receipts and block headers returned from
//! Ethereum JSON-RPC endpoints.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Deserializer};

/// Log entry, either from `eth_getLogs` or embedded in a receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    /// Address of the contract that emitted the log
    #[serde(rename = "address", deserialize_with = "deserialize_hex_address")]
    pub address: Address,

    /// Indexed topics (topic0 = event signature, topics[1..] = indexed params).
    /// Kept as raw strings so one malformed topic only spoils its own log.
    #[serde(rename = "topics", default)]
    pub topics: Vec<String>,

    /// Non-indexed event data (hex string)
    #[serde(rename = "data", deserialize_with = "deserialize_hex_bytes")]
    pub data: Vec<u8>,

    /// Block containing the log (null for pending logs)
    #[serde(rename = "blockNumber", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub block_number: Option<u64>,

    /// Hash of the transaction that emitted the log (null for pending logs)
    #[serde(rename = "transactionHash", default, deserialize_with = "deserialize_hex_b256_opt")]
    pub transaction_hash: Option<B256>,

    /// Position of the log in the block
    #[serde(rename = "logIndex", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub log_index: Option<u64>,

    /// True when the log was invalidated by a chain reorganization
    #[serde(rename = "removed", default)]
    pub removed: bool,
}

/// Transaction receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct Receipt {
    /// Transaction hash (hex string in JSON)
    #[serde(rename = "transactionHash", deserialize_with = "deserialize_hex_b256")]
    pub transaction_hash: B256,

    /// Block the transaction was included in
    #[serde(rename = "blockNumber", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub block_number: Option<u64>,

    /// Transaction status: 1 = success, 0 = failure. Absent before Byzantium.
    #[serde(rename = "status", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub status: Option<u64>,

    /// Logs emitted during transaction execution (empty for reverted txs)
    #[serde(rename = "logs", default)]
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Check if the transaction succeeded.
    ///
    /// Pre-Byzantium receipts carry a state root instead of a status; those
    /// are treated as successful.
    pub fn is_success(&self) -> bool {
        self.status.map_or(true, |s| s == 1)
    }
}

/// Minimal block header, as returned by `eth_getBlockByNumber(n, false)`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    /// Block number
    #[serde(rename = "number", deserialize_with = "deserialize_hex_u64")]
    pub number: u64,

    /// Block timestamp (Unix epoch seconds)
    #[serde(rename = "timestamp", deserialize_with = "deserialize_hex_u64")]
    pub timestamp: u64,
}

// Hex deserialization helpers

/// Pad an odd-length hex string with a leading zero.
/// This handles cases where RPC returns hex strings without leading zeros.
pub(crate) fn pad_hex_string(s: &str) -> String {
    if s.is_empty() {
        return s.to_string();
    }
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Parse a quantity such as `0x1a` into a u64.
pub(crate) fn parse_hex_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(s, 16)
}

/// Deserialize a hex string to u64.
fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_u64(&s).map_err(serde::de::Error::custom)
}

/// Deserialize an optional hex string to u64.
fn deserialize_hex_u64_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) => parse_hex_u64(&s).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn decode_b256(s: &str) -> Result<B256, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).map_err(|e| e.to_string())?;
    if bytes.len() != 32 {
        return Err(format!("Expected 32 bytes for hash, got {}", bytes.len()));
    }
    Ok(B256::from_slice(&bytes))
}

/// Deserialize a hex string to B256.
fn deserialize_hex_b256<'de, D>(deserializer: D) -> Result<B256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    decode_b256(&s).map_err(serde::de::Error::custom)
}

/// Deserialize an optional hex string to B256.
fn deserialize_hex_b256_opt<'de, D>(deserializer: D) -> Result<Option<B256>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) => decode_b256(&s).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Deserialize a hex string to Address.
fn deserialize_hex_address<'de, D>(deserializer: D) -> Result<Address, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
    if bytes.len() != 20 {
        return Err(serde::de::Error::custom(format!(
            "Expected 20 bytes for address, got {}",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

/// Deserialize a hex string to bytes.
fn deserialize_hex_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    if s.is_empty() {
        Ok(Vec::new())
    } else {
        let s = pad_hex_string(s);
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_from_get_logs() {
        let raw = json!({
            "address": "0x334d85047da64738c065d36e10b2adeb965000d0",
            "topics": [
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
                "0x00000000000000000000000070997970c51812dc3a010c7d01b50e0d17dc79c8",
                "0x0000000000000000000000003c44cdddb6a900fa2b585dd299e03d12fa4293bc"
            ],
            "data": "0x0000000000000000000000000000000000000000000000000de0b6b3a7640000",
            "blockNumber": "0x10",
            "transactionHash": "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060",
            "logIndex": "0x1",
            "removed": false
        });
        let log: Log = serde_json::from_value(raw).unwrap();
        assert_eq!(log.topics.len(), 3);
        assert_eq!(log.data.len(), 32);
        assert_eq!(log.block_number, Some(16));
        assert_eq!(log.log_index, Some(1));
        assert!(log.transaction_hash.is_some());
        assert!(!log.removed);
    }

    #[test]
    fn test_log_removed_defaults_false() {
        let raw = json!({
            "address": "0x334d85047da64738c065d36e10b2adeb965000d0",
            "topics": [],
            "data": "0x"
        });
        let log: Log = serde_json::from_value(raw).unwrap();
        assert!(!log.removed);
        assert!(log.data.is_empty());
        assert_eq!(log.block_number, None);
    }

    #[test]
    fn test_receipt_status() {
        let ok: Receipt = serde_json::from_value(json!({
            "transactionHash": "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060",
            "blockNumber": "0x10",
            "status": "0x1",
            "logs": []
        }))
        .unwrap();
        assert!(ok.is_success());

        let failed: Receipt = serde_json::from_value(json!({
            "transactionHash": "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060",
            "status": "0x0"
        }))
        .unwrap();
        assert!(!failed.is_success());

        let legacy: Receipt = serde_json::from_value(json!({
            "transactionHash": "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060",
            "root": "0x01"
        }))
        .unwrap();
        assert!(legacy.is_success());
    }

    #[test]
    fn test_block_header() {
        let header: BlockHeader = serde_json::from_value(json!({
            "number": "0x1b4",
            "timestamp": "0x6553f100",
            "hash": "0x00"
        }))
        .unwrap();
        assert_eq!(header.number, 436);
        assert_eq!(header.timestamp, 0x6553f100);
    }

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert_eq!(parse_hex_u64("0x").unwrap(), 0);
        assert_eq!(parse_hex_u64("ff").unwrap(), 255);
        assert!(parse_hex_u64("0xzz").is_err());
    }
}
