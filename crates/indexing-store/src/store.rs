//! The write-through row cache user callbacks see.

use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use tracery_primitives::{ChainId, Checkpoint};
use tracing::debug;

use crate::{FlushOp, IndexingBackend, IndexingStoreError, RowWrite};

/// Conflict behavior for `insert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Existing row is a constraint violation.
    Error,
    /// Keep the existing row.
    DoNothing,
    /// Replace the existing row.
    DoUpdate,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// `None` marks a buffered delete.
    value: Option<Value>,
    /// Checkpoint of the event that last wrote the row.
    checkpoint: Checkpoint,
    dirty: bool,
    bytes: usize,
}

/// Byte-bounded row cache over the durable backend.
///
/// Owned exclusively by the dispatcher; every operation runs between event
/// callbacks, so no internal locking is needed.
pub struct IndexingStore<B: ?Sized> {
    backend: Arc<B>,
    max_bytes: usize,
    cache: HashMap<(String, String), CacheEntry>,
    cached_bytes: usize,
    /// Checkpoint of the event currently being dispatched; stamps writes.
    current_checkpoint: Checkpoint,
}

impl<B: ?Sized> std::fmt::Debug for IndexingStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingStore")
            .field("rows", &self.cache.len())
            .field("cached_bytes", &self.cached_bytes)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

impl<B: IndexingBackend + ?Sized> IndexingStore<B> {
    pub fn new(backend: Arc<B>, max_bytes: usize) -> Self {
        Self {
            backend,
            max_bytes,
            cache: HashMap::new(),
            cached_bytes: 0,
            current_checkpoint: Checkpoint::ZERO,
        }
    }

    /// Called by the dispatcher at the top of each event.
    pub fn set_current_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.current_checkpoint = checkpoint;
    }

    pub fn is_cache_full(&self) -> bool {
        self.cached_bytes >= self.max_bytes
    }

    pub fn cached_bytes(&self) -> usize {
        self.cached_bytes
    }

    /// Reads a row, consulting the cache before the backend.
    pub async fn find(
        &mut self,
        table: &str,
        key: &str,
    ) -> Result<Option<Value>, IndexingStoreError> {
        let slot = (table.to_string(), key.to_string());
        if let Some(entry) = self.cache.get(&slot) {
            return Ok(entry.value.clone());
        }

        let value = self.backend.find(table, key).await?;
        self.put_entry(slot, value.clone(), false);
        Ok(value)
    }

    pub async fn insert(
        &mut self,
        table: &str,
        key: &str,
        value: Value,
        on_conflict: OnConflict,
    ) -> Result<(), IndexingStoreError> {
        validate_row(table, &value)?;
        let existing = self.find(table, key).await?;

        match (existing, on_conflict) {
            (Some(_), OnConflict::Error) => Err(IndexingStoreError::Constraint(format!(
                "unique violation: '{key}' already exists in '{table}'"
            ))),
            (Some(_), OnConflict::DoNothing) => Ok(()),
            _ => {
                self.put_entry((table.to_string(), key.to_string()), Some(value), true);
                Ok(())
            }
        }
    }

    /// Replaces an existing row; missing rows are an error.
    pub async fn update(
        &mut self,
        table: &str,
        key: &str,
        value: Value,
    ) -> Result<(), IndexingStoreError> {
        validate_row(table, &value)?;
        if self.find(table, key).await?.is_none() {
            return Err(IndexingStoreError::NotFound {
                table: table.to_string(),
                key: key.to_string(),
            });
        }
        self.put_entry((table.to_string(), key.to_string()), Some(value), true);
        Ok(())
    }

    pub async fn upsert(
        &mut self,
        table: &str,
        key: &str,
        value: Value,
    ) -> Result<(), IndexingStoreError> {
        self.insert(table, key, value, OnConflict::DoUpdate).await
    }

    /// Deletes a row, returning whether it existed.
    pub async fn delete(&mut self, table: &str, key: &str) -> Result<bool, IndexingStoreError> {
        let existed = self.find(table, key).await?.is_some();
        if existed {
            self.put_entry((table.to_string(), key.to_string()), None, true);
        }
        Ok(existed)
    }

    /// Raw SQL passthrough. Flush first if the query must observe buffered
    /// writes.
    pub async fn sql(&self, query: &str) -> Result<Value, IndexingStoreError> {
        self.backend.execute_sql(query).await
    }

    /// Drains buffered writes and commits `checkpoints` in one backend
    /// transaction. The cache is cleared only after the flush succeeds.
    pub async fn flush(
        &mut self,
        checkpoints: &[(ChainId, Checkpoint)],
    ) -> Result<(), IndexingStoreError> {
        let mut batch: Vec<FlushOp> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|((table, key), entry)| FlushOp {
                table: table.clone(),
                key: key.clone(),
                write: match &entry.value {
                    Some(value) => RowWrite::Put(value.clone()),
                    None => RowWrite::Delete,
                },
                checkpoint: entry.checkpoint,
            })
            .collect();
        // Deterministic apply order, oldest event first.
        batch.sort_by(|a, b| {
            a.checkpoint
                .cmp(&b.checkpoint)
                .then_with(|| a.table.cmp(&b.table))
                .then_with(|| a.key.cmp(&b.key))
        });

        debug!(rows = batch.len(), "flushing indexing cache");
        self.backend.flush(&batch, checkpoints).await?;

        self.cache.clear();
        self.cached_bytes = 0;
        Ok(())
    }

    /// Drops all buffered state without writing. Used on reorg.
    pub fn discard(&mut self) {
        self.cache.clear();
        self.cached_bytes = 0;
    }

    /// Asks the backend to roll user tables back to `checkpoint`.
    pub async fn revert(
        &mut self,
        chain_id: ChainId,
        checkpoint: Checkpoint,
    ) -> Result<(), IndexingStoreError> {
        self.discard();
        self.backend.revert_to_checkpoint(chain_id, checkpoint).await
    }

    fn put_entry(&mut self, slot: (String, String), value: Option<Value>, dirty: bool) {
        let bytes = slot.0.len()
            + slot.1.len()
            + value
                .as_ref()
                .map(estimate_value_bytes)
                .unwrap_or_default();

        if let Some(old) = self.cache.insert(
            slot,
            CacheEntry {
                value,
                checkpoint: self.current_checkpoint,
                dirty,
                bytes,
            },
        ) {
            self.cached_bytes = self.cached_bytes.saturating_sub(old.bytes);
        }
        self.cached_bytes += bytes;
    }
}

/// Rough in-memory footprint of a JSON value, for the cache bound.
fn estimate_value_bytes(value: &Value) -> usize {
    match value {
        Value::Null => 4,
        Value::Bool(_) => 4,
        Value::Number(_) => 8,
        Value::String(s) => s.len() + 8,
        Value::Array(items) => items.iter().map(estimate_value_bytes).sum::<usize>() + 8,
        Value::Object(map) => {
            map.iter()
                .map(|(k, v)| k.len() + estimate_value_bytes(v))
                .sum::<usize>()
                + 8
        }
    }
}

/// JSON columns hold integers exactly only up to 2^53; anything wider must
/// be stored as a string.
const MAX_SAFE_JSON_INT: u64 = 1 << 53;

fn validate_row(table: &str, value: &Value) -> Result<(), IndexingStoreError> {
    match value {
        Value::Number(number) => {
            let out_of_range = number
                .as_u64()
                .map(|n| n > MAX_SAFE_JSON_INT)
                .unwrap_or(false)
                || number
                    .as_i64()
                    .map(|n| n < -(MAX_SAFE_JSON_INT as i64))
                    .unwrap_or(false);
            if out_of_range {
                return Err(IndexingStoreError::BigIntSerialization {
                    column: table.to_string(),
                    value: number.to_string(),
                });
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(|item| validate_row(table, item)),
        Value::Object(map) => map
            .iter()
            .try_for_each(|(column, item)| match validate_row(column, item) {
                Err(IndexingStoreError::BigIntSerialization { value, .. }) => {
                    Err(IndexingStoreError::BigIntSerialization {
                        column: column.clone(),
                        value,
                    })
                }
                other => other,
            }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::InMemoryIndexingBackend;

    fn checkpoint_at(block_number: u64) -> Checkpoint {
        Checkpoint {
            block_timestamp: block_number * 12,
            chain_id: 1,
            block_number,
            ..Checkpoint::ZERO
        }
    }

    fn make_store() -> IndexingStore<InMemoryIndexingBackend> {
        IndexingStore::new(Arc::new(InMemoryIndexingBackend::new()), 1024 * 1024)
    }

    #[tokio::test]
    async fn test_writes_buffer_until_flush() {
        let mut store = make_store();
        store.set_current_checkpoint(checkpoint_at(1));

        store
            .insert("accounts", "alice", json!({"balance": 10}), OnConflict::Error)
            .await
            .unwrap();

        // Not yet durable.
        assert_eq!(store.backend.row_count(), 0);
        // But visible through the cache.
        assert_eq!(
            store.find("accounts", "alice").await.unwrap(),
            Some(json!({"balance": 10}))
        );

        store.flush(&[(1, checkpoint_at(1))]).await.unwrap();
        assert_eq!(store.backend.row_count(), 1);
        assert_eq!(store.backend.committed_checkpoint(1), Some(checkpoint_at(1)));
    }

    #[tokio::test]
    async fn test_insert_conflict_behaviors() {
        let mut store = make_store();
        store.set_current_checkpoint(checkpoint_at(1));
        store
            .insert("accounts", "alice", json!({"balance": 1}), OnConflict::Error)
            .await
            .unwrap();

        let error = store
            .insert("accounts", "alice", json!({"balance": 2}), OnConflict::Error)
            .await
            .unwrap_err();
        assert!(matches!(error, IndexingStoreError::Constraint(_)));

        store
            .insert("accounts", "alice", json!({"balance": 3}), OnConflict::DoNothing)
            .await
            .unwrap();
        assert_eq!(
            store.find("accounts", "alice").await.unwrap(),
            Some(json!({"balance": 1}))
        );

        store
            .insert("accounts", "alice", json!({"balance": 4}), OnConflict::DoUpdate)
            .await
            .unwrap();
        assert_eq!(
            store.find("accounts", "alice").await.unwrap(),
            Some(json!({"balance": 4}))
        );
    }

    #[tokio::test]
    async fn test_update_missing_row_errors() {
        let mut store = make_store();
        let error = store
            .update("accounts", "ghost", json!({"balance": 1}))
            .await
            .unwrap_err();
        assert!(matches!(error, IndexingStoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_buffers_and_flushes() {
        let mut store = make_store();
        store.set_current_checkpoint(checkpoint_at(1));
        store
            .insert("accounts", "alice", json!({"balance": 1}), OnConflict::Error)
            .await
            .unwrap();
        store.flush(&[(1, checkpoint_at(1))]).await.unwrap();

        store.set_current_checkpoint(checkpoint_at(2));
        assert!(store.delete("accounts", "alice").await.unwrap());
        // Deleted in cache, still present durably.
        assert_eq!(store.find("accounts", "alice").await.unwrap(), None);
        assert_eq!(store.backend.row_count(), 1);

        store.flush(&[(1, checkpoint_at(2))]).await.unwrap();
        assert_eq!(store.backend.row_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_full_threshold() {
        let mut store = IndexingStore::new(Arc::new(InMemoryIndexingBackend::new()), 64);
        assert!(!store.is_cache_full());

        store
            .insert(
                "accounts",
                "alice",
                json!({"bio": "a".repeat(100)}),
                OnConflict::Error,
            )
            .await
            .unwrap();
        assert!(store.is_cache_full());

        store.flush(&[]).await.unwrap();
        assert!(!store.is_cache_full());
    }

    #[tokio::test]
    async fn test_bigint_rejected_with_hint() {
        let mut store = make_store();
        let error = store
            .insert(
                "accounts",
                "alice",
                json!({"balance": 18_446_744_073_709_551_615u64}),
                OnConflict::Error,
            )
            .await
            .unwrap_err();

        let IndexingStoreError::BigIntSerialization { ref column, .. } = error else {
            panic!("expected bigint error, got {error:?}");
        };
        assert_eq!(column, "balance");
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn test_discard_drops_buffered_writes() {
        let mut store = make_store();
        store
            .insert("accounts", "alice", json!({"balance": 1}), OnConflict::Error)
            .await
            .unwrap();
        store.discard();

        assert_eq!(store.find("accounts", "alice").await.unwrap(), None);
        assert_eq!(
            store.cached_bytes(),
            store.cache.values().map(|e| e.bytes).sum::<usize>()
        );
    }
}
