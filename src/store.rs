//! ConnectorStore trait and RocksDB implementation
//!
//! Durable state of the connector: per-partition block checkpoints, ingested
//! transfer records, per-rule watermarks and dispatch bookkeeping.
//! Uses RocksDB with column families for efficient organization.

use crate::keys::{
    decode_outgoing_id, decode_transaction_key, encode_checkpoint_key, encode_outgoing_key,
    encode_outgoing_prefix, encode_partition, encode_sequence_key, encode_status_key,
    encode_transaction_key, encode_transfer_index_key, encode_watermark_key,
};
use crate::records::{DispatchStatus, NewTransfer, TransactionRecord, TriggerKind};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::path::Path;

/// Column family names.
const CF_CHECKPOINTS: &str = "checkpoints";
const CF_TRANSACTIONS: &str = "transactions";
const CF_TRANSFER_INDEX: &str = "transfer_index";
const CF_OUTGOING_INDEX: &str = "outgoing_index";
const CF_WATERMARKS: &str = "watermarks";
const CF_DISPATCH_STATUS: &str = "dispatch_status";
const CF_META: &str = "meta";

/// Trait defining the semantic store contract of the connector.
///
/// Implementations must be shareable across the scan loop and the dispatch
/// workers.
pub trait ConnectorStore: Send + Sync {
    /// Last scanned block of a (contract, network) pair, 0 if never seen.
    fn get_checkpoint(&self, contract: Address, network_id: u64) -> Result<u64>;

    /// Persist the last scanned block of a (contract, network) pair.
    fn set_checkpoint(&self, block: u64, contract: Address, network_id: u64) -> Result<()>;

    /// Insert a decoded transfer, assigning the next id of its partition.
    ///
    /// Returns `None` when the same (tx hash, log index) was already stored.
    fn insert_transfer(&self, transfer: &NewTransfer) -> Result<Option<TransactionRecord>>;

    /// Get a transaction record by id, with its dispatch status merged in.
    fn get_transaction(
        &self,
        contract: Address,
        network_id: u64,
        id: u64,
    ) -> Result<Option<TransactionRecord>>;

    /// Highest transaction id of a partition, 0 if empty.
    fn max_transaction_id(&self, contract: Address, network_id: u64) -> Result<u64>;

    /// Transactions with id strictly greater than `after_id`, ascending, at
    /// most `limit` of them.
    fn transactions_after(
        &self,
        contract: Address,
        network_id: u64,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>>;

    /// Whether `holder` sent tokens in any stored transfer of the partition
    /// other than `exclude_id`.
    fn has_outgoing_transfers(
        &self,
        contract: Address,
        network_id: u64,
        holder: Address,
        exclude_id: u64,
    ) -> Result<bool>;

    /// Watermark of a rule. `None` means the rule was never initialized.
    fn get_watermark(&self, rule_id: u64) -> Result<Option<u64>>;

    /// Advance the watermark of a rule. A value lower than the stored one is
    /// ignored, so the watermark never decreases. Returns the stored value.
    fn advance_watermark(&self, rule_id: u64, transaction_id: u64) -> Result<u64>;

    /// Record the dispatch outcome of a (transaction, trigger kind) pair.
    fn set_dispatch_status(
        &self,
        contract: Address,
        network_id: u64,
        id: u64,
        kind: TriggerKind,
        status: DispatchStatus,
    ) -> Result<()>;
}

/// RocksDB-backed implementation of ConnectorStore.
///
/// Column families:
/// - checkpoints: (network, contract) -> last scanned block
/// - transactions: (network, contract, id) -> transfer record
/// - transfer_index: (network, contract, tx hash, log index) -> id
/// - outgoing_index: (network, contract, from, id) -> ()
/// - watermarks: rule id -> last evaluated transaction id
/// - dispatch_status: (network, contract, id, kind) -> status
/// - meta: id sequences
pub struct RocksConnectorStore {
    db: DB,
}

impl RocksConnectorStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all required column families if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new(CF_CHECKPOINTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default()),
            ColumnFamilyDescriptor::new(CF_TRANSFER_INDEX, Options::default()),
            ColumnFamilyDescriptor::new(CF_OUTGOING_INDEX, Options::default()),
            ColumnFamilyDescriptor::new(CF_WATERMARKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_DISPATCH_STATUS, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .context("Failed to open RocksDB database")?;

        Ok(Self { db })
    }

    /// Get a column family handle by name.
    fn get_cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("Column family '{}' not found", name))
    }

    fn get_u64(&self, cf_name: &str, key: &[u8]) -> Result<Option<u64>> {
        let cf = self.get_cf(cf_name)?;
        match self
            .db
            .get_cf(cf, key)
            .with_context(|| format!("Failed to read from '{}'", cf_name))?
        {
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    anyhow::anyhow!("Value in '{}' must be 8 bytes, got {}", cf_name, bytes.len())
                })?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Merge stored dispatch statuses into a record.
    fn with_status(&self, mut record: TransactionRecord) -> Result<TransactionRecord> {
        let cf = self.get_cf(CF_DISPATCH_STATUS)?;
        let prefix = encode_transaction_key(record.network_id, record.contract, record.id);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut status = BTreeMap::new();
        for item in iter {
            let (key, value) = item.context("Failed to read iterator")?;
            if !key.starts_with(&prefix) {
                break;
            }
            let kind = key.get(prefix.len()).copied().and_then(TriggerKind::from_byte);
            let outcome = value.first().copied().and_then(DispatchStatus::from_byte);
            if let (Some(kind), Some(outcome)) = (kind, outcome) {
                status.insert(kind, outcome);
            }
        }
        record.status = status;
        Ok(record)
    }

    /// Overwrite the watermark of a rule, bypassing the monotonic guard.
    ///
    /// Operator tooling only; the connector itself goes through
    /// [`ConnectorStore::advance_watermark`].
    pub fn put_watermark(&self, rule_id: u64, transaction_id: u64) -> Result<()> {
        let cf = self.get_cf(CF_WATERMARKS)?;
        self.db
            .put_cf(cf, encode_watermark_key(rule_id), transaction_id.to_be_bytes())
            .context("Failed to put watermark")?;
        Ok(())
    }
}

impl ConnectorStore for RocksConnectorStore {
    fn get_checkpoint(&self, contract: Address, network_id: u64) -> Result<u64> {
        let key = encode_checkpoint_key(network_id, contract);
        Ok(self.get_u64(CF_CHECKPOINTS, &key)?.unwrap_or(0))
    }

    fn set_checkpoint(&self, block: u64, contract: Address, network_id: u64) -> Result<()> {
        let cf = self.get_cf(CF_CHECKPOINTS)?;
        let key = encode_checkpoint_key(network_id, contract);
        self.db
            .put_cf(cf, &key, block.to_be_bytes())
            .context("Failed to set checkpoint")?;
        Ok(())
    }

    fn insert_transfer(&self, transfer: &NewTransfer) -> Result<Option<TransactionRecord>> {
        let index_cf = self.get_cf(CF_TRANSFER_INDEX)?;
        let index_key = encode_transfer_index_key(
            transfer.network_id,
            transfer.contract,
            transfer.transaction_hash,
            transfer.log_index,
        );
        if self
            .db
            .get_cf(index_cf, &index_key)
            .context("Failed to read transfer index")?
            .is_some()
        {
            return Ok(None);
        }

        let seq_key = encode_sequence_key(transfer.network_id, transfer.contract);
        let id = self.get_u64(CF_META, &seq_key)?.unwrap_or(0) + 1;
        let record = TransactionRecord::from_new(id, transfer);
        let value = postcard::to_allocvec(&record).context("Failed to serialize transaction")?;

        // Record, indexes and sequence land together or not at all
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.get_cf(CF_TRANSACTIONS)?,
            encode_transaction_key(transfer.network_id, transfer.contract, id),
            &value,
        );
        batch.put_cf(index_cf, &index_key, id.to_be_bytes());
        batch.put_cf(
            self.get_cf(CF_OUTGOING_INDEX)?,
            encode_outgoing_key(transfer.network_id, transfer.contract, transfer.from, id),
            b"",
        );
        batch.put_cf(self.get_cf(CF_META)?, &seq_key, id.to_be_bytes());
        self.db.write(batch).context("Failed to write transaction batch")?;

        Ok(Some(record))
    }

    fn get_transaction(
        &self,
        contract: Address,
        network_id: u64,
        id: u64,
    ) -> Result<Option<TransactionRecord>> {
        let cf = self.get_cf(CF_TRANSACTIONS)?;
        let key = encode_transaction_key(network_id, contract, id);
        match self.db.get_cf(cf, &key).context("Failed to get transaction")? {
            Some(bytes) => {
                let record: TransactionRecord = postcard::from_bytes(&bytes)
                    .context("Failed to deserialize transaction record")?;
                Ok(Some(self.with_status(record)?))
            }
            None => Ok(None),
        }
    }

    fn max_transaction_id(&self, contract: Address, network_id: u64) -> Result<u64> {
        let key = encode_sequence_key(network_id, contract);
        Ok(self.get_u64(CF_META, &key)?.unwrap_or(0))
    }

    fn transactions_after(
        &self,
        contract: Address,
        network_id: u64,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>> {
        let cf = self.get_cf(CF_TRANSACTIONS)?;
        let Some(start_id) = after_id.checked_add(1) else {
            return Ok(Vec::new());
        };
        let prefix = encode_partition(network_id, contract);
        let start_key = encode_transaction_key(network_id, contract, start_id);

        let mut records = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start_key, Direction::Forward));

        for item in iter {
            if records.len() >= limit {
                break;
            }
            let (key, value) = item.context("Failed to read iterator")?;

            // Stop once we leave this partition
            if !key.starts_with(&prefix) {
                break;
            }

            let (_, _, id) = decode_transaction_key(&key).context("Failed to decode transaction key")?;
            let record: TransactionRecord = postcard::from_bytes(&value)
                .with_context(|| format!("Failed to deserialize transaction {}", id))?;
            records.push(self.with_status(record)?);
        }

        Ok(records)
    }

    fn has_outgoing_transfers(
        &self,
        contract: Address,
        network_id: u64,
        holder: Address,
        exclude_id: u64,
    ) -> Result<bool> {
        let cf = self.get_cf(CF_OUTGOING_INDEX)?;
        let prefix = encode_outgoing_prefix(network_id, contract, holder);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        for item in iter {
            let (key, _) = item.context("Failed to read iterator")?;
            if !key.starts_with(&prefix) {
                break;
            }
            if decode_outgoing_id(&key)? != exclude_id {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn get_watermark(&self, rule_id: u64) -> Result<Option<u64>> {
        self.get_u64(CF_WATERMARKS, &encode_watermark_key(rule_id))
    }

    fn advance_watermark(&self, rule_id: u64, transaction_id: u64) -> Result<u64> {
        let key = encode_watermark_key(rule_id);
        let current = self.get_u64(CF_WATERMARKS, &key)?;
        if let Some(current) = current {
            if current >= transaction_id {
                return Ok(current);
            }
        }
        let cf = self.get_cf(CF_WATERMARKS)?;
        self.db
            .put_cf(cf, &key, transaction_id.to_be_bytes())
            .context("Failed to put watermark")?;
        Ok(transaction_id)
    }

    fn set_dispatch_status(
        &self,
        contract: Address,
        network_id: u64,
        id: u64,
        kind: TriggerKind,
        status: DispatchStatus,
    ) -> Result<()> {
        let cf = self.get_cf(CF_DISPATCH_STATUS)?;
        let key = encode_status_key(network_id, contract, id, kind);
        self.db
            .put_cf(cf, &key, [status.as_byte()])
            .context("Failed to put dispatch status")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, B256, U256};
    use tempfile::TempDir;

    const TOKEN: Address = address!("334d85047da64738c065d36e10b2adeb965000d0");
    const ALICE: Address = address!("70997970c51812dc3a010c7d01b50e0d17dc79c8");
    const BOB: Address = address!("3c44cdddb6a900fa2b585dd299e03d12fa4293bc");

    fn create_test_store() -> (RocksConnectorStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksConnectorStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    fn transfer(hash_byte: u8, log_index: u64, from: Address, to: Address) -> NewTransfer {
        NewTransfer {
            transaction_hash: B256::repeat_byte(hash_byte),
            log_index,
            block_number: 100,
            from,
            to,
            contract: TOKEN,
            network_id: 137,
            amount: U256::from(1000u64),
            sent_date: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_checkpoint_defaults_to_zero() {
        let (store, _temp_dir) = create_test_store();
        assert_eq!(store.get_checkpoint(TOKEN, 137).unwrap(), 0);

        store.set_checkpoint(12345, TOKEN, 137).unwrap();
        assert_eq!(store.get_checkpoint(TOKEN, 137).unwrap(), 12345);
        // Other network is a different partition
        assert_eq!(store.get_checkpoint(TOKEN, 1).unwrap(), 0);
    }

    #[test]
    fn test_checkpoint_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksConnectorStore::open(temp_dir.path()).unwrap();
            store.set_checkpoint(77, TOKEN, 137).unwrap();
        }
        let store = RocksConnectorStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.get_checkpoint(TOKEN, 137).unwrap(), 77);
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let (store, _temp_dir) = create_test_store();
        let a = store.insert_transfer(&transfer(1, 0, ALICE, BOB)).unwrap().unwrap();
        let b = store.insert_transfer(&transfer(2, 0, BOB, ALICE)).unwrap().unwrap();
        let c = store.insert_transfer(&transfer(2, 1, BOB, ALICE)).unwrap().unwrap();
        assert_eq!((a.id, b.id, c.id), (1, 2, 3));
        assert_eq!(store.max_transaction_id(TOKEN, 137).unwrap(), 3);
        assert_eq!(store.max_transaction_id(TOKEN, 1).unwrap(), 0);
    }

    #[test]
    fn test_insert_is_idempotent_per_log() {
        let (store, _temp_dir) = create_test_store();
        assert!(store.insert_transfer(&transfer(1, 4, ALICE, BOB)).unwrap().is_some());
        assert!(store.insert_transfer(&transfer(1, 4, ALICE, BOB)).unwrap().is_none());
        assert_eq!(store.max_transaction_id(TOKEN, 137).unwrap(), 1);
    }

    #[test]
    fn test_transactions_after_is_exclusive_and_ordered() {
        let (store, _temp_dir) = create_test_store();
        for i in 0..5u8 {
            store.insert_transfer(&transfer(i, 0, ALICE, BOB)).unwrap();
        }
        let after_two = store.transactions_after(TOKEN, 137, 2, 100).unwrap();
        let ids: Vec<u64> = after_two.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);

        let limited = store.transactions_after(TOKEN, 137, 0, 2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, 1);

        assert!(store.transactions_after(TOKEN, 137, 5, 100).unwrap().is_empty());
        assert!(store.transactions_after(TOKEN, 1, 0, 100).unwrap().is_empty());
    }

    #[test]
    fn test_has_outgoing_transfers() {
        let (store, _temp_dir) = create_test_store();
        let first = store.insert_transfer(&transfer(1, 0, ALICE, BOB)).unwrap().unwrap();
        assert!(!store.has_outgoing_transfers(TOKEN, 137, BOB, 0).unwrap());
        assert!(!store.has_outgoing_transfers(TOKEN, 137, ALICE, first.id).unwrap());

        store.insert_transfer(&transfer(2, 0, BOB, ALICE)).unwrap();
        assert!(store.has_outgoing_transfers(TOKEN, 137, BOB, 0).unwrap());
    }

    #[test]
    fn test_watermark_never_decreases() {
        let (store, _temp_dir) = create_test_store();
        assert_eq!(store.get_watermark(9).unwrap(), None);

        assert_eq!(store.advance_watermark(9, 10).unwrap(), 10);
        assert_eq!(store.advance_watermark(9, 4).unwrap(), 10);
        assert_eq!(store.get_watermark(9).unwrap(), Some(10));

        // A zero watermark still marks the rule as initialized
        assert_eq!(store.advance_watermark(10, 0).unwrap(), 0);
        assert_eq!(store.get_watermark(10).unwrap(), Some(0));
    }

    #[test]
    fn test_put_watermark_can_rewind() {
        let (store, _temp_dir) = create_test_store();
        store.advance_watermark(3, 50).unwrap();
        store.put_watermark(3, 20).unwrap();
        assert_eq!(store.get_watermark(3).unwrap(), Some(20));
    }

    #[test]
    fn test_dispatch_status_is_merged_on_read() {
        let (store, _temp_dir) = create_test_store();
        let record = store.insert_transfer(&transfer(1, 0, ALICE, BOB)).unwrap().unwrap();
        assert!(record.status.is_empty());

        store
            .set_dispatch_status(TOKEN, 137, record.id, TriggerKind::Send, DispatchStatus::Dispatched)
            .unwrap();
        store
            .set_dispatch_status(TOKEN, 137, record.id, TriggerKind::Hold, DispatchStatus::Failed)
            .unwrap();

        let loaded = store.get_transaction(TOKEN, 137, record.id).unwrap().unwrap();
        assert_eq!(loaded.status.get(&TriggerKind::Send), Some(&DispatchStatus::Dispatched));
        assert_eq!(loaded.status.get(&TriggerKind::Hold), Some(&DispatchStatus::Failed));
        assert_eq!(loaded.status.get(&TriggerKind::Receive), None);
    }
}
