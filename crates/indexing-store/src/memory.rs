//! In-memory backend with a per-row version log, for tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracery_primitives::{ChainId, Checkpoint};

use crate::{FlushOp, IndexingBackend, IndexingStoreError, RowWrite};

#[derive(Debug)]
struct VersionEntry {
    table: String,
    key: String,
    chain_id: ChainId,
    checkpoint: Checkpoint,
    /// Row value before the write; `None` means the row did not exist.
    prior: Option<Value>,
}

#[derive(Debug, Default)]
struct Inner {
    rows: HashMap<(String, String), Value>,
    versions: Vec<VersionEntry>,
    checkpoints: HashMap<ChainId, Checkpoint>,
}

/// Backend holding everything under one lock, making `flush` trivially
/// atomic.
#[derive(Debug, Default)]
pub struct InMemoryIndexingBackend {
    inner: Mutex<Inner>,
}

impl InMemoryIndexingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(&self, table: &str, key: &str) -> Option<Value> {
        self.inner
            .lock()
            .rows
            .get(&(table.to_string(), key.to_string()))
            .cloned()
    }

    pub fn row_count(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn committed_checkpoint(&self, chain_id: ChainId) -> Option<Checkpoint> {
        self.inner.lock().checkpoints.get(&chain_id).copied()
    }
}

#[async_trait]
impl IndexingBackend for InMemoryIndexingBackend {
    async fn flush(
        &self,
        batch: &[FlushOp],
        checkpoints: &[(ChainId, Checkpoint)],
    ) -> Result<(), IndexingStoreError> {
        let mut inner = self.inner.lock();

        for op in batch {
            let slot = (op.table.clone(), op.key.clone());
            let prior = inner.rows.get(&slot).cloned();
            inner.versions.push(VersionEntry {
                table: op.table.clone(),
                key: op.key.clone(),
                chain_id: op.checkpoint.chain_id,
                checkpoint: op.checkpoint,
                prior,
            });
            match &op.write {
                RowWrite::Put(value) => {
                    inner.rows.insert(slot, value.clone());
                }
                RowWrite::Delete => {
                    inner.rows.remove(&slot);
                }
            }
        }

        for &(chain_id, checkpoint) in checkpoints {
            inner.checkpoints.insert(chain_id, checkpoint);
        }

        Ok(())
    }

    async fn find(&self, table: &str, key: &str) -> Result<Option<Value>, IndexingStoreError> {
        Ok(self
            .inner
            .lock()
            .rows
            .get(&(table.to_string(), key.to_string()))
            .cloned())
    }

    async fn revert_to_checkpoint(
        &self,
        chain_id: ChainId,
        checkpoint: Checkpoint,
    ) -> Result<(), IndexingStoreError> {
        let mut inner = self.inner.lock();

        // Undo newest-first so overlapping writes restore the oldest prior.
        // Entries from other chains are kept; their tables are disjoint
        // under per-chain namespacing.
        let mut kept = Vec::with_capacity(inner.versions.len());
        while let Some(entry) = inner.versions.pop() {
            if entry.chain_id != chain_id || entry.checkpoint <= checkpoint {
                kept.push(entry);
                continue;
            }
            let slot = (entry.table, entry.key);
            match entry.prior {
                Some(value) => {
                    inner.rows.insert(slot, value);
                }
                None => {
                    inner.rows.remove(&slot);
                }
            }
        }
        kept.reverse();
        inner.versions = kept;

        if let Some(committed) = inner.checkpoints.get_mut(&chain_id) {
            *committed = (*committed).min(checkpoint);
        }
        Ok(())
    }

    async fn execute_sql(&self, _sql: &str) -> Result<Value, IndexingStoreError> {
        Err(IndexingStoreError::Sql(
            "in-memory backend does not speak SQL".to_string(),
        ))
    }

    async fn get_checkpoint(
        &self,
        chain_id: ChainId,
    ) -> Result<Option<Checkpoint>, IndexingStoreError> {
        Ok(self.inner.lock().checkpoints.get(&chain_id).copied())
    }
}
