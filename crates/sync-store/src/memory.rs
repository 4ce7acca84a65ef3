//! In-memory reference implementation of the sync store.
//!
//! Backs tests and cache-disabled runs. Each logical table is its own lock
//! so a single call never holds more than it writes.

use std::collections::HashMap;

use alloy_primitives::{Bytes, B256};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracery_filters::{ChildAddresses, Factory, Filter};
use tracery_intervals::{BlockInterval, IntervalSet};
use tracery_primitives::{
    BlockRecord, BlockRef, ChainId, Checkpoint, LogRecord, TraceRecord,
    TransactionReceiptRecord, TransactionRecord,
};

use crate::{RpcRequestKey, SyncStore, SyncStoreError};

fn factory_key(chain_id: ChainId, factory: &Factory) -> String {
    format!(
        "{chain_id}_{}_{}_{}",
        factory.address, factory.event_selector, factory.child_location
    )
}

#[derive(Debug, Default)]
pub struct InMemorySyncStore {
    blocks: RwLock<HashMap<(ChainId, B256), BlockRecord>>,
    transactions: RwLock<HashMap<(ChainId, B256), TransactionRecord>>,
    receipts: RwLock<HashMap<(ChainId, B256), TransactionReceiptRecord>>,
    logs: RwLock<HashMap<(ChainId, u64, u64), LogRecord>>,
    traces: RwLock<HashMap<(ChainId, u64, u64), TraceRecord>>,
    children: RwLock<HashMap<String, ChildAddresses>>,
    intervals: RwLock<HashMap<(ChainId, String), IntervalSet>>,
    rpc_results: RwLock<HashMap<(ChainId, RpcRequestKey), Bytes>>,
    checkpoints: RwLock<HashMap<ChainId, Checkpoint>>,
}

impl InMemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored logs, across chains.
    pub fn log_count(&self) -> usize {
        self.logs.read().len()
    }

    /// Number of stored blocks, across chains.
    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }
}

#[async_trait]
impl SyncStore for InMemorySyncStore {
    async fn insert_blocks(
        &self,
        chain_id: ChainId,
        blocks: &[BlockRecord],
    ) -> Result<(), SyncStoreError> {
        let mut table = self.blocks.write();
        for block in blocks {
            table.insert((chain_id, block.hash), block.clone());
        }
        Ok(())
    }

    async fn insert_transactions(
        &self,
        chain_id: ChainId,
        transactions: &[TransactionRecord],
    ) -> Result<(), SyncStoreError> {
        let mut table = self.transactions.write();
        for transaction in transactions {
            table.insert((chain_id, transaction.hash), transaction.clone());
        }
        Ok(())
    }

    async fn insert_transaction_receipts(
        &self,
        chain_id: ChainId,
        receipts: &[TransactionReceiptRecord],
    ) -> Result<(), SyncStoreError> {
        let mut table = self.receipts.write();
        for receipt in receipts {
            table.insert((chain_id, receipt.transaction_hash), receipt.clone());
        }
        Ok(())
    }

    async fn insert_logs(
        &self,
        chain_id: ChainId,
        logs: &[LogRecord],
    ) -> Result<(), SyncStoreError> {
        let mut table = self.logs.write();
        for log in logs {
            table.insert((chain_id, log.block_number, log.log_index), log.clone());
        }
        Ok(())
    }

    async fn insert_traces(
        &self,
        chain_id: ChainId,
        traces: &[TraceRecord],
    ) -> Result<(), SyncStoreError> {
        let mut table = self.traces.write();
        for trace in traces {
            table.insert(
                (chain_id, trace.block_number, trace.trace_index),
                trace.clone(),
            );
        }
        Ok(())
    }

    async fn insert_child_addresses(
        &self,
        chain_id: ChainId,
        factory: &Factory,
        children: &ChildAddresses,
    ) -> Result<(), SyncStoreError> {
        let mut table = self.children.write();
        table
            .entry(factory_key(chain_id, factory))
            .or_default()
            .merge(children);
        Ok(())
    }

    async fn get_child_addresses(
        &self,
        chain_id: ChainId,
        factory: &Factory,
        up_to_block: u64,
    ) -> Result<ChildAddresses, SyncStoreError> {
        let table = self.children.read();
        let all = table
            .get(&factory_key(chain_id, factory))
            .cloned()
            .unwrap_or_default();
        Ok(all
            .iter()
            .filter(|(_, &first_seen)| first_seen <= up_to_block)
            .map(|(&address, &first_seen)| (address, first_seen))
            .collect())
    }

    async fn insert_intervals(
        &self,
        chain_id: ChainId,
        entries: &[(Filter, BlockInterval)],
    ) -> Result<(), SyncStoreError> {
        let mut table = self.intervals.write();
        for (filter, interval) in entries {
            for fragment in filter.fragments() {
                table
                    .entry((chain_id, fragment.id()))
                    .or_default()
                    .insert(*interval);
            }
        }
        Ok(())
    }

    async fn get_intervals(
        &self,
        chain_id: ChainId,
        filters: &[Filter],
    ) -> Result<Vec<IntervalSet>, SyncStoreError> {
        let table = self.intervals.read();
        let mut results = Vec::with_capacity(filters.len());

        for filter in filters {
            let mut cached: Option<IntervalSet> = None;
            for fragment in filter.fragments() {
                let fragment_set = table
                    .get(&(chain_id, fragment.id()))
                    .cloned()
                    .unwrap_or_default();
                cached = Some(match cached {
                    // A filter is cached only where all its fragments are.
                    Some(set) => set.intersection(&fragment_set),
                    None => fragment_set,
                });
            }
            results.push(cached.unwrap_or_default());
        }

        Ok(results)
    }

    async fn prune_rpc_request_results(
        &self,
        chain_id: ChainId,
        reorged_blocks: &[u64],
    ) -> Result<(), SyncStoreError> {
        let mut table = self.rpc_results.write();
        table.retain(|(entry_chain, key), _| {
            *entry_chain != chain_id || !reorged_blocks.contains(&key.block_number)
        });
        Ok(())
    }

    async fn insert_rpc_request_result(
        &self,
        chain_id: ChainId,
        key: RpcRequestKey,
        result: Bytes,
    ) -> Result<(), SyncStoreError> {
        self.rpc_results.write().insert((chain_id, key), result);
        Ok(())
    }

    async fn get_rpc_request_result(
        &self,
        chain_id: ChainId,
        key: &RpcRequestKey,
    ) -> Result<Option<Bytes>, SyncStoreError> {
        Ok(self
            .rpc_results
            .read()
            .get(&(chain_id, key.clone()))
            .cloned())
    }

    async fn commit_checkpoint(
        &self,
        chain_id: ChainId,
        checkpoint: Checkpoint,
    ) -> Result<(), SyncStoreError> {
        self.checkpoints.write().insert(chain_id, checkpoint);
        Ok(())
    }

    async fn get_checkpoint(
        &self,
        chain_id: ChainId,
    ) -> Result<Option<Checkpoint>, SyncStoreError> {
        Ok(self.checkpoints.read().get(&chain_id).copied())
    }

    async fn get_safe_block(
        &self,
        chain_id: ChainId,
        max_number: u64,
    ) -> Result<Option<BlockRef>, SyncStoreError> {
        let table = self.blocks.read();
        Ok(table
            .iter()
            .filter(|((entry_chain, _), block)| {
                *entry_chain == chain_id && block.number <= max_number
            })
            .max_by_key(|(_, block)| block.number)
            .map(|(_, block)| block.block_ref()))
    }

    async fn get_blocks_in_range(
        &self,
        chain_id: ChainId,
        from: u64,
        to: u64,
    ) -> Result<Vec<BlockRecord>, SyncStoreError> {
        let table = self.blocks.read();
        let mut blocks: Vec<BlockRecord> = table
            .iter()
            .filter(|((entry_chain, _), block)| {
                *entry_chain == chain_id && block.number >= from && block.number <= to
            })
            .map(|(_, block)| block.clone())
            .collect();
        blocks.sort_by_key(|block| block.number);
        Ok(blocks)
    }

    async fn get_logs_in_range(
        &self,
        chain_id: ChainId,
        from: u64,
        to: u64,
    ) -> Result<Vec<LogRecord>, SyncStoreError> {
        let table = self.logs.read();
        let mut logs: Vec<LogRecord> = table
            .iter()
            .filter(|((entry_chain, number, _), _)| {
                *entry_chain == chain_id && *number >= from && *number <= to
            })
            .map(|(_, log)| log.clone())
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    async fn get_traces_in_range(
        &self,
        chain_id: ChainId,
        from: u64,
        to: u64,
    ) -> Result<Vec<TraceRecord>, SyncStoreError> {
        let table = self.traces.read();
        let mut traces: Vec<TraceRecord> = table
            .iter()
            .filter(|((entry_chain, number, _), _)| {
                *entry_chain == chain_id && *number >= from && *number <= to
            })
            .map(|(_, trace)| trace.clone())
            .collect();
        traces.sort_by_key(|trace| (trace.block_number, trace.trace_index));
        Ok(traces)
    }

    async fn get_transactions_in_range(
        &self,
        chain_id: ChainId,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransactionRecord>, SyncStoreError> {
        let table = self.transactions.read();
        let mut transactions: Vec<TransactionRecord> = table
            .iter()
            .filter(|((entry_chain, _), transaction)| {
                *entry_chain == chain_id
                    && transaction.block_number >= from
                    && transaction.block_number <= to
            })
            .map(|(_, transaction)| transaction.clone())
            .collect();
        transactions.sort_by_key(|transaction| {
            (transaction.block_number, transaction.transaction_index)
        });
        Ok(transactions)
    }

    async fn get_receipts_in_range(
        &self,
        chain_id: ChainId,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransactionReceiptRecord>, SyncStoreError> {
        let table = self.receipts.read();
        let mut receipts: Vec<TransactionReceiptRecord> = table
            .iter()
            .filter(|((entry_chain, _), receipt)| {
                *entry_chain == chain_id
                    && receipt.block_number >= from
                    && receipt.block_number <= to
            })
            .map(|(_, receipt)| receipt.clone())
            .collect();
        receipts.sort_by_key(|receipt| (receipt.block_number, receipt.transaction_index));
        Ok(receipts)
    }
}
