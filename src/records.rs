//! Record types for the connector state
//!
//! Persisted records use postcard for binary serialization, which is compact
//! and deterministic. Outbound events are JSON with camelCase field names.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Gamification condition a rule rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// The wallet sent tokens.
    Send,
    /// The wallet received tokens.
    Receive,
    /// The wallet received tokens and still holds them after a minimum duration.
    Hold,
}

impl TriggerKind {
    /// Single-byte tag used in store keys.
    pub fn as_byte(self) -> u8 {
        match self {
            TriggerKind::Send => b's',
            TriggerKind::Receive => b'r',
            TriggerKind::Hold => b'h',
        }
    }

    /// Inverse of [`TriggerKind::as_byte`].
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b's' => Some(TriggerKind::Send),
            b'r' => Some(TriggerKind::Receive),
            b'h' => Some(TriggerKind::Hold),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Send => "send",
            TriggerKind::Receive => "receive",
            TriggerKind::Hold => "hold",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = String;

    /// Accepts the short names and the legacy `sendToken` style trigger titles.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "send" | "sendtoken" => Ok(TriggerKind::Send),
            "receive" | "receivetoken" => Ok(TriggerKind::Receive),
            "hold" | "holdtoken" => Ok(TriggerKind::Hold),
            other => Err(format!("unknown trigger kind '{}'", other)),
        }
    }
}

/// Outcome of handing a trigger to the outbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Dispatched,
    Failed,
}

impl DispatchStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            DispatchStatus::Dispatched => 1,
            DispatchStatus::Failed => 2,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(DispatchStatus::Dispatched),
            2 => Some(DispatchStatus::Failed),
            _ => None,
        }
    }
}

/// A decoded ERC20 Transfer, before it is assigned an id by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub transaction_hash: B256,
    /// Position of the Transfer log in its block; disambiguates several
    /// transfers carried by one transaction.
    pub log_index: u64,
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    pub contract: Address,
    pub network_id: u64,
    pub amount: U256,
    /// Block timestamp in Unix epoch milliseconds
    pub sent_date: u64,
}

/// Persisted transfer record.
///
/// Ids are strictly increasing within a (contract, network) partition.
/// Records are never mutated after insertion; dispatch bookkeeping lives in
/// its own column family and is merged into `status` on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    pub contract: Address,
    pub network_id: u64,
    pub amount: U256,
    /// Block timestamp in Unix epoch milliseconds
    pub sent_date: u64,
    /// Per-trigger-kind dispatch status
    #[serde(default)]
    pub status: BTreeMap<TriggerKind, DispatchStatus>,
}

impl TransactionRecord {
    pub fn from_new(id: u64, t: &NewTransfer) -> Self {
        Self {
            id,
            transaction_hash: t.transaction_hash,
            log_index: t.log_index,
            block_number: t.block_number,
            from: t.from,
            to: t.to,
            contract: t.contract,
            network_id: t.network_id,
            amount: t.amount,
            sent_date: t.sent_date,
            status: BTreeMap::new(),
        }
    }
}

/// Trigger handed to the downstream rewards engine. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub rule_id: u64,
    pub transaction_id: u64,
    pub trigger_kind: TriggerKind,
    pub wallet_address: Address,
    pub target_address: Option<Address>,
    pub contract_address: Address,
    pub network_id: u64,
    #[serde(serialize_with = "serialize_u256_decimal")]
    pub amount: U256,
    pub sent_date: u64,
    pub transaction_hash: B256,
    #[serde(
        serialize_with = "serialize_u256_decimal_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub token_balance: Option<U256>,
}

/// Messages published on the outbound event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundEvent {
    /// A rule matched a transfer.
    Trigger(Trigger),
    /// Informational: a rule's watermark moved forward.
    #[serde(rename_all = "camelCase")]
    WatermarkAdvanced { rule_id: u64, transaction_id: u64 },
}

/// Amounts go out as decimal strings; JSON numbers cannot carry 256 bits.
fn serialize_u256_decimal<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(v)
}

fn serialize_u256_decimal_opt<S: Serializer>(v: &Option<U256>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(v) => s.collect_str(v),
        None => s.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_trigger_kind_parsing() {
        assert_eq!("send".parse::<TriggerKind>().unwrap(), TriggerKind::Send);
        assert_eq!("Receive".parse::<TriggerKind>().unwrap(), TriggerKind::Receive);
        assert_eq!("holdtoken".parse::<TriggerKind>().unwrap(), TriggerKind::Hold);
        assert_eq!("sendToken".parse::<TriggerKind>().unwrap(), TriggerKind::Send);
        assert!("mint".parse::<TriggerKind>().is_err());
    }

    #[test]
    fn test_trigger_kind_byte_tags() {
        for kind in [TriggerKind::Send, TriggerKind::Receive, TriggerKind::Hold] {
            assert_eq!(TriggerKind::from_byte(kind.as_byte()), Some(kind));
        }
        assert_eq!(TriggerKind::from_byte(b'x'), None);
    }

    #[test]
    fn test_record_postcard_keeps_large_amounts() {
        let t = NewTransfer {
            transaction_hash: B256::repeat_byte(0xab),
            log_index: 3,
            block_number: 100,
            from: address!("70997970c51812dc3a010c7d01b50e0d17dc79c8"),
            to: address!("3c44cdddb6a900fa2b585dd299e03d12fa4293bc"),
            contract: address!("334d85047da64738c065d36e10b2adeb965000d0"),
            network_id: 137,
            amount: U256::MAX,
            sent_date: 1_700_000_000_000,
        };
        let record = TransactionRecord::from_new(7, &t);
        let bytes = postcard::to_allocvec(&record).unwrap();
        let back: TransactionRecord = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.amount, U256::MAX);
    }

    #[test]
    fn test_trigger_json_shape() {
        let trigger = Trigger {
            rule_id: 12,
            transaction_id: 40,
            trigger_kind: TriggerKind::Send,
            wallet_address: address!("70997970c51812dc3a010c7d01b50e0d17dc79c8"),
            target_address: Some(address!("3c44cdddb6a900fa2b585dd299e03d12fa4293bc")),
            contract_address: address!("334d85047da64738c065d36e10b2adeb965000d0"),
            network_id: 137,
            amount: U256::from(5_000_000_000_000_000_000u128),
            sent_date: 1_700_000_000_000,
            transaction_hash: B256::ZERO,
            token_balance: None,
        };
        let v = serde_json::to_value(OutboundEvent::Trigger(trigger)).unwrap();
        assert_eq!(v["type"], "trigger");
        assert_eq!(v["ruleId"], 12);
        assert_eq!(v["transactionId"], 40);
        assert_eq!(v["triggerKind"], "send");
        assert_eq!(v["amount"], "5000000000000000000");
        assert!(v.get("tokenBalance").is_none());
    }

    #[test]
    fn test_watermark_notice_json_shape() {
        let v = serde_json::to_value(OutboundEvent::WatermarkAdvanced {
            rule_id: 3,
            transaction_id: 99,
        })
        .unwrap();
        assert_eq!(v["type"], "watermarkAdvanced");
        assert_eq!(v["ruleId"], 3);
        assert_eq!(v["transactionId"], 99);
    }
}
