//! Block-pinned, cached contract reads for user callbacks.

use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use alloy_primitives::{Address, Bytes};
use lru::LruCache;
use parking_lot::Mutex;
use tracery_primitives::ChainId;
use tracery_rpc::{CallRequest, EthClient, RpcError};
use tracery_sync_store::{RpcRequestKey, SyncStore, SyncStoreError};

const CALL_CACHE_ENTRIES: usize = 4_096;

/// Read-only client handed to callbacks.
///
/// Every read is pinned to the block of the event being dispatched, so a
/// callback re-run after a crash or retry observes identical chain state.
/// Results are cached in memory and in the sync store's rpc-result cache,
/// keyed by `(chain, block, address, calldata)`; reorg handling prunes the
/// durable side by block number.
pub struct ReadOnlyClient {
    chain_id: ChainId,
    client: Arc<dyn EthClient>,
    store: Arc<dyn SyncStore>,
    pinned_block: AtomicU64,
    call_cache: Mutex<LruCache<RpcRequestKey, Bytes>>,
}

impl ReadOnlyClient {
    pub fn new(chain_id: ChainId, client: Arc<dyn EthClient>, store: Arc<dyn SyncStore>) -> Self {
        Self {
            chain_id,
            client,
            store,
            pinned_block: AtomicU64::new(0),
            call_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CALL_CACHE_ENTRIES).expect("cache size is nonzero"),
            )),
        }
    }

    /// Called by the dispatcher at the top of each event.
    pub fn pin_block(&self, block_number: u64) {
        self.pinned_block.store(block_number, Ordering::Release);
    }

    pub fn pinned_block(&self) -> u64 {
        self.pinned_block.load(Ordering::Acquire)
    }

    /// `eth_call` against the pinned block, cached.
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let key = RpcRequestKey {
            block_number: self.pinned_block(),
            address: to,
            calldata: data.clone(),
        };

        if let Some(result) = self.call_cache.lock().get(&key) {
            return Ok(result.clone());
        }
        match self.store.get_rpc_request_result(self.chain_id, &key).await {
            Ok(Some(result)) => {
                self.call_cache.lock().put(key, result.clone());
                return Ok(result);
            }
            Ok(None) => {}
            Err(error) => return Err(store_to_rpc_error(error)),
        }

        let result = self
            .client
            .call(CallRequest {
                to,
                data,
                block_number: key.block_number,
            })
            .await?;

        self.store
            .insert_rpc_request_result(self.chain_id, key.clone(), result.clone())
            .await
            .map_err(store_to_rpc_error)?;
        self.call_cache.lock().put(key, result.clone());
        Ok(result)
    }
}

fn store_to_rpc_error(error: SyncStoreError) -> RpcError {
    if error.is_retryable() {
        RpcError::Transient(error.to_string())
    } else {
        RpcError::Fatal(error.to_string())
    }
}

impl std::fmt::Debug for ReadOnlyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyClient")
            .field("chain_id", &self.chain_id)
            .field("pinned_block", &self.pinned_block())
            .finish()
    }
}
