use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use tracery_filters::{ChildAddresses, Factory, Filter};
use tracery_intervals::{BlockInterval, IntervalSet};
use tracery_primitives::{
    BlockRecord, BlockRef, ChainId, Checkpoint, LogRecord, TraceRecord,
    TransactionReceiptRecord, TransactionRecord,
};

use crate::SyncStoreError;

/// Cache key for an idempotent contract-read result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RpcRequestKey {
    pub block_number: u64,
    pub address: Address,
    pub calldata: Bytes,
}

/// Persistence contract for raw chain data, interval bookkeeping, child
/// addresses, the rpc-result cache, and the recovery checkpoint.
///
/// Every mutating operation is transactional at the granularity of a single
/// call, and inserts upsert by natural key (hash, or `(block_number, index)`),
/// so any call may be retried after a transient failure.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn insert_blocks(
        &self,
        chain_id: ChainId,
        blocks: &[BlockRecord],
    ) -> Result<(), SyncStoreError>;

    async fn insert_transactions(
        &self,
        chain_id: ChainId,
        transactions: &[TransactionRecord],
    ) -> Result<(), SyncStoreError>;

    async fn insert_transaction_receipts(
        &self,
        chain_id: ChainId,
        receipts: &[TransactionReceiptRecord],
    ) -> Result<(), SyncStoreError>;

    async fn insert_logs(
        &self,
        chain_id: ChainId,
        logs: &[LogRecord],
    ) -> Result<(), SyncStoreError>;

    async fn insert_traces(
        &self,
        chain_id: ChainId,
        traces: &[TraceRecord],
    ) -> Result<(), SyncStoreError>;

    /// Unions `children` into the factory's map; the earliest first-seen
    /// block wins per address.
    async fn insert_child_addresses(
        &self,
        chain_id: ChainId,
        factory: &Factory,
        children: &ChildAddresses,
    ) -> Result<(), SyncStoreError>;

    /// Children whose first-seen block is at or before `up_to_block`.
    async fn get_child_addresses(
        &self,
        chain_id: ChainId,
        factory: &Factory,
        up_to_block: u64,
    ) -> Result<ChildAddresses, SyncStoreError>;

    /// Marks each filter's fragments cached over the paired interval,
    /// merging touching intervals.
    async fn insert_intervals(
        &self,
        chain_id: ChainId,
        entries: &[(Filter, BlockInterval)],
    ) -> Result<(), SyncStoreError>;

    /// Per filter, the interval set cached for *all* of its fragments
    /// (intersection over fragments). Parallel to the input slice.
    async fn get_intervals(
        &self,
        chain_id: ChainId,
        filters: &[Filter],
    ) -> Result<Vec<IntervalSet>, SyncStoreError>;

    /// Drops cached rpc-call results keyed at any of the reorged block
    /// numbers.
    async fn prune_rpc_request_results(
        &self,
        chain_id: ChainId,
        reorged_blocks: &[u64],
    ) -> Result<(), SyncStoreError>;

    async fn insert_rpc_request_result(
        &self,
        chain_id: ChainId,
        key: RpcRequestKey,
        result: Bytes,
    ) -> Result<(), SyncStoreError>;

    async fn get_rpc_request_result(
        &self,
        chain_id: ChainId,
        key: &RpcRequestKey,
    ) -> Result<Option<Bytes>, SyncStoreError>;

    /// Durable recovery cursor, one per chain.
    async fn commit_checkpoint(
        &self,
        chain_id: ChainId,
        checkpoint: Checkpoint,
    ) -> Result<(), SyncStoreError>;

    async fn get_checkpoint(
        &self,
        chain_id: ChainId,
    ) -> Result<Option<Checkpoint>, SyncStoreError>;

    /// Latest stored block at or below `max_number`, used to seed recovery.
    async fn get_safe_block(
        &self,
        chain_id: ChainId,
        max_number: u64,
    ) -> Result<Option<BlockRef>, SyncStoreError>;

    /// Stored blocks with number in `[from, to]`, ascending.
    ///
    /// Only blocks referenced by persisted artifacts exist; gaps are normal.
    async fn get_blocks_in_range(
        &self,
        chain_id: ChainId,
        from: u64,
        to: u64,
    ) -> Result<Vec<BlockRecord>, SyncStoreError>;

    /// Stored logs with block number in `[from, to]`, ascending by
    /// `(block_number, log_index)`.
    async fn get_logs_in_range(
        &self,
        chain_id: ChainId,
        from: u64,
        to: u64,
    ) -> Result<Vec<LogRecord>, SyncStoreError>;

    /// Stored traces with block number in `[from, to]`, ascending by
    /// `(block_number, trace_index)`.
    async fn get_traces_in_range(
        &self,
        chain_id: ChainId,
        from: u64,
        to: u64,
    ) -> Result<Vec<TraceRecord>, SyncStoreError>;

    /// Stored transactions with block number in `[from, to]`.
    async fn get_transactions_in_range(
        &self,
        chain_id: ChainId,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransactionRecord>, SyncStoreError>;

    /// Stored receipts with block number in `[from, to]`.
    async fn get_receipts_in_range(
        &self,
        chain_id: ChainId,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransactionReceiptRecord>, SyncStoreError>;
}
