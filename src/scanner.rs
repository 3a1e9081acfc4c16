//! Transfer log scanner
//!
//! Queries a chain's log index for ERC20 `Transfer` events of one contract in
//! an inclusive block range. Reorg-invalidated logs are dropped here so
//! nothing downstream ever sees them.

use crate::chain::{ChainClient, LogFilter};
use crate::error::ConnectorError;
use crate::types::Log;
use alloy_primitives::Address;

/// Inclusive block ranges of at most `max_range` blocks covering
/// `[from, to]`. Empty when `from > to`.
pub fn chunk_range(from: u64, to: u64, max_range: u64) -> Vec<(u64, u64)> {
    let max_range = max_range.max(1);
    let mut chunks = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(max_range - 1).min(to);
        chunks.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    chunks
}

/// Scans one contract on one chain.
pub struct LogScanner<'a> {
    client: &'a dyn ChainClient,
    contract: Address,
}

impl<'a> LogScanner<'a> {
    pub fn new(client: &'a dyn ChainClient, contract: Address) -> Self {
        Self { client, contract }
    }

    /// Transfer logs of the contract in `[from_block, to_block]`.
    ///
    /// No logs is an empty result, not an error.
    pub async fn scan(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, ConnectorError> {
        if from_block > to_block {
            return Ok(Vec::new());
        }
        let filter = LogFilter::transfers(self.contract, from_block, to_block);
        let logs = self.client.get_logs(&filter).await?;
        let total = logs.len();

        let logs: Vec<Log> = logs.into_iter().filter(|log| !log.removed).collect();
        if logs.len() < total {
            tracing::debug!(
                contract = %self.contract,
                "Dropped {} removed log(s) in blocks {}..={}",
                total - logs.len(),
                from_block,
                to_block
            );
        }
        Ok(logs)
    }
}
