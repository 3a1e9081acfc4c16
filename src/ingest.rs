//! Transfer ingestion
//!
//! Moves the block checkpoint of one (contract, network) partition forward:
//! scan new blocks for Transfer logs, decode them, persist the resulting
//! transaction records. Ingestion knows nothing about rules, so one scan
//! serves every rule that watches the partition.

use crate::cache::BlockTimeCache;
use crate::chain::ChainClient;
use crate::decoder::TransferDecoder;
use crate::error::ConnectorError;
use crate::scanner::{chunk_range, LogScanner};
use crate::store::ConnectorStore;
use alloy_primitives::Address;
use tracing::{debug, info};

/// Result of one ingestion pass over a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First sighting of the partition: the checkpoint was set to the chain
    /// head and nothing was scanned.
    Initialized { head: u64 },
    /// The checkpoint already covers the chain head.
    UpToDate { head: u64 },
    /// Blocks `from_block..=to_block` were scanned.
    Scanned {
        from_block: u64,
        to_block: u64,
        logs: usize,
        inserted: usize,
        duplicates: usize,
    },
}

/// Ingests Transfer events of one chain into the store.
pub struct Ingestor<'a> {
    store: &'a dyn ConnectorStore,
    client: &'a dyn ChainClient,
    max_block_range: u64,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a dyn ConnectorStore, client: &'a dyn ChainClient, max_block_range: u64) -> Self {
        Self {
            store,
            client,
            max_block_range,
        }
    }

    /// Scan the blocks between the partition checkpoint and the chain head.
    ///
    /// The window is split into chunks of at most `max_block_range` blocks and
    /// the checkpoint advances after each persisted chunk, so a failure
    /// resumes at the chunk that failed.
    pub async fn ingest(&self, contract: Address, network_id: u64) -> Result<IngestOutcome, ConnectorError> {
        let checkpoint = self.store.get_checkpoint(contract, network_id)?;
        let head = self.client.block_number().await?;

        // No history backfill: start watching from the current head
        if checkpoint == 0 {
            self.store.set_checkpoint(head, contract, network_id)?;
            info!(%contract, network_id, "First scan, checkpoint set to head {}", head);
            return Ok(IngestOutcome::Initialized { head });
        }

        if checkpoint >= head {
            debug!(%contract, network_id, "Up to date at block {} (head {})", checkpoint, head);
            return Ok(IngestOutcome::UpToDate { head });
        }

        let scanner = LogScanner::new(self.client, contract);
        let decoder = TransferDecoder::new(self.client, contract, network_id);
        let mut cache = BlockTimeCache::new();

        let from_block = checkpoint + 1;
        let (mut logs_seen, mut inserted, mut duplicates) = (0, 0, 0);

        for (from, to) in chunk_range(from_block, head, self.max_block_range) {
            let logs = scanner.scan(from, to).await?;
            logs_seen += logs.len();

            let transfers = decoder.decode(&logs, &mut cache).await?;
            for transfer in &transfers {
                match self.store.insert_transfer(transfer)? {
                    Some(record) => {
                        debug!(
                            %contract,
                            network_id,
                            tx_hash = %record.transaction_hash,
                            "Stored transaction {}",
                            record.id
                        );
                        inserted += 1;
                    }
                    None => duplicates += 1,
                }
            }

            self.store.set_checkpoint(to, contract, network_id)?;
        }

        info!(
            %contract,
            network_id,
            "Scanned blocks {}..={}: {} log(s), {} new transaction(s), {} duplicate(s)",
            from_block,
            head,
            logs_seen,
            inserted,
            duplicates
        );

        Ok(IngestOutcome::Scanned {
            from_block,
            to_block: head,
            logs: logs_seen,
            inserted,
            duplicates,
        })
    }
}
