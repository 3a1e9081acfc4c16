//! Block timestamp cache
//!
//! In-memory cache to avoid repeated `eth_getBlockByNumber` calls when several
//! Transfer logs of one scan chunk live in the same block.
//!
//! Block timestamps never change once a block is final, so entries are kept
//! for as long as the cache lives. One cache is created per partition scan.

use crate::chain::ChainClient;
use crate::error::ConnectorError;
use std::collections::HashMap;

/// Cache of block number -> timestamp in Unix epoch milliseconds.
#[derive(Debug, Default)]
pub struct BlockTimeCache {
    cache: HashMap<u64, u64>,
}

impl BlockTimeCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached timestamp (ms) of a block, if known.
    pub fn get(&self, block: u64) -> Option<u64> {
        self.cache.get(&block).copied()
    }

    /// Record the timestamp of a block, given in seconds.
    pub fn insert_secs(&mut self, block: u64, timestamp_secs: u64) -> u64 {
        let ms = timestamp_secs.saturating_mul(1000);
        self.cache.insert(block, ms);
        ms
    }

    /// Timestamp (ms) of a block, fetched from the chain on a miss.
    pub async fn timestamp_ms(
        &mut self,
        client: &dyn ChainClient,
        block: u64,
    ) -> Result<u64, ConnectorError> {
        if let Some(ms) = self.get(block) {
            return Ok(ms);
        }
        let secs = client.block_timestamp(block).await?;
        Ok(self.insert_secs(block, secs))
    }
}
