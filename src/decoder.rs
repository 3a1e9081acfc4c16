//! ERC20 Transfer decoder
//!
//! Resolves the receipt of every transaction seen by the scanner and decodes
//! the `Transfer` logs of the watched contract into [`NewTransfer`] records.
//!
//! - One receipt fetch per transaction hash, however many logs share it.
//! - Reverted transactions are ignored.
//! - A receipt may carry several Transfer logs of the contract; each becomes
//!   its own record.
//! - A malformed log is logged and skipped; the rest of the batch goes on.

use crate::cache::BlockTimeCache;
use crate::chain::{ChainClient, TRANSFER_TOPIC};
use crate::error::ConnectorError;
use crate::records::NewTransfer;
use crate::types::{pad_hex_string, Log, Receipt};
use alloy_primitives::{Address, B256, U256};
use std::collections::HashSet;

/// Decodes Transfer logs of one contract on one network.
pub struct TransferDecoder<'a> {
    client: &'a dyn ChainClient,
    contract: Address,
    network_id: u64,
}

impl<'a> TransferDecoder<'a> {
    pub fn new(client: &'a dyn ChainClient, contract: Address, network_id: u64) -> Self {
        Self {
            client,
            contract,
            network_id,
        }
    }

    /// Decode the transfers of the transactions referenced by `logs`.
    ///
    /// Connectivity failures abort the batch so the caller can retry the
    /// whole block range. Decode failures only drop the offending log, or the
    /// offending transaction when its receipt cannot be decoded.
    pub async fn decode(
        &self,
        logs: &[Log],
        cache: &mut BlockTimeCache,
    ) -> Result<Vec<NewTransfer>, ConnectorError> {
        let mut seen = HashSet::new();
        let mut hashes = Vec::new();
        for log in logs {
            match log.transaction_hash {
                Some(hash) => {
                    if seen.insert(hash) {
                        hashes.push(hash);
                    }
                }
                None => tracing::warn!(contract = %self.contract, "Skipping log without transaction hash"),
            }
        }

        let mut transfers = Vec::new();
        for hash in hashes {
            let receipt = match self.client.transaction_receipt(hash).await {
                Ok(Some(r)) => r,
                Ok(None) => {
                    tracing::warn!(tx_hash = %hash, "Receipt not found, skipping transaction");
                    continue;
                }
                Err(ConnectorError::Decode(e)) => {
                    tracing::warn!(tx_hash = %hash, "Skipping transaction with undecodable receipt: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Only successful transactions moved tokens
            if !receipt.is_success() {
                tracing::debug!(tx_hash = %hash, "Skipping reverted transaction");
                continue;
            }

            self.decode_receipt(&receipt, cache, &mut transfers).await?;
        }

        Ok(transfers)
    }

    async fn decode_receipt(
        &self,
        receipt: &Receipt,
        cache: &mut BlockTimeCache,
        out: &mut Vec<NewTransfer>,
    ) -> Result<(), ConnectorError> {
        for log in &receipt.logs {
            if log.address != self.contract || !is_transfer_event(log) {
                continue;
            }

            let (from, to, amount) = match decode_transfer_log(log) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(
                        tx_hash = %receipt.transaction_hash,
                        log_index = ?log.log_index,
                        "Skipping malformed Transfer log: {}",
                        e
                    );
                    continue;
                }
            };

            let (Some(block_number), Some(log_index)) =
                (log.block_number.or(receipt.block_number), log.log_index)
            else {
                tracing::warn!(
                    tx_hash = %receipt.transaction_hash,
                    "Skipping Transfer log without block number or log index"
                );
                continue;
            };

            let sent_date = cache.timestamp_ms(self.client, block_number).await?;

            tracing::debug!(
                tx_hash = %receipt.transaction_hash,
                log_index,
                "Decoded transfer {} -> {} amount {}",
                from,
                to,
                amount
            );

            out.push(NewTransfer {
                transaction_hash: receipt.transaction_hash,
                log_index,
                block_number,
                from,
                to,
                contract: self.contract,
                network_id: self.network_id,
                amount,
                sent_date,
            });
        }
        Ok(())
    }
}

/// Check if a log is an ERC20 Transfer event.
fn is_transfer_event(log: &Log) -> bool {
    log.topics
        .first()
        .and_then(|t| parse_topic(t).ok())
        .map_or(false, |t| t == TRANSFER_TOPIC)
}

/// Parse from, to, value from a Transfer log.
///
/// topics[1] = from (indexed, padded to 32 bytes), topics[2] = to, data = value.
/// Anything other than exactly two indexed addresses and one 32-byte word of
/// data is not an ERC20 Transfer (ERC721 indexes the token id, for one).
pub fn decode_transfer_log(log: &Log) -> Result<(Address, Address, U256), ConnectorError> {
    if log.topics.len() != 3 {
        return Err(ConnectorError::Decode(format!(
            "Transfer log must have 3 topics, got {}",
            log.topics.len()
        )));
    }
    if log.data.len() != 32 {
        return Err(ConnectorError::Decode(format!(
            "Transfer log data must be 32 bytes, got {}",
            log.data.len()
        )));
    }
    let from = parse_address_from_topic(&log.topics[1])?;
    let to = parse_address_from_topic(&log.topics[2])?;
    let value = U256::from_be_slice(&log.data);
    Ok((from, to, value))
}

fn parse_topic(topic: &str) -> Result<B256, ConnectorError> {
    let s = topic.strip_prefix("0x").unwrap_or(topic);
    let bytes = hex::decode(pad_hex_string(s))
        .map_err(|e| ConnectorError::Decode(format!("Invalid hex in topic {}: {}", topic, e)))?;
    if bytes.len() != 32 {
        return Err(ConnectorError::Decode(format!(
            "Topic must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

/// Parse a 32-byte hex topic into an Address (last 20 bytes).
fn parse_address_from_topic(topic: &str) -> Result<Address, ConnectorError> {
    let word = parse_topic(topic)?;
    Ok(Address::from_slice(&word[12..]))
}
