use async_trait::async_trait;
use serde_json::Value;
use tracery_primitives::{ChainId, Checkpoint};

use crate::IndexingStoreError;

/// One buffered row mutation, stamped with the checkpoint of the event that
/// produced it (the version log keys rollback on it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOp {
    pub table: String,
    pub key: String,
    pub write: RowWrite,
    pub checkpoint: Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowWrite {
    /// Full row value after the write.
    Put(Value),
    Delete,
}

/// Durable side of the indexing store.
///
/// `flush` is the only write path and must be atomic: either every row
/// write and every checkpoint lands, or none do. That single guarantee is
/// what the crash-recovery invariant rests on.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait IndexingBackend: Send + Sync {
    /// Applies a batch of row writes and checkpoint commits in one
    /// transaction.
    async fn flush(
        &self,
        batch: &[FlushOp],
        checkpoints: &[(ChainId, Checkpoint)],
    ) -> Result<(), IndexingStoreError>;

    /// Point read, used on cache miss.
    async fn find(&self, table: &str, key: &str) -> Result<Option<Value>, IndexingStoreError>;

    /// Rolls user tables back to their state at `checkpoint`.
    ///
    /// Backends without a version log return
    /// [`IndexingStoreError::RevertUnsupported`]; the dispatcher then
    /// re-runs events from the last committed checkpoint instead.
    async fn revert_to_checkpoint(
        &self,
        chain_id: ChainId,
        checkpoint: Checkpoint,
    ) -> Result<(), IndexingStoreError>;

    /// Raw SQL escape hatch.
    async fn execute_sql(&self, sql: &str) -> Result<Value, IndexingStoreError>;

    /// The durable recovery cursor, committed by `flush`.
    async fn get_checkpoint(
        &self,
        chain_id: ChainId,
    ) -> Result<Option<Checkpoint>, IndexingStoreError>;
}
