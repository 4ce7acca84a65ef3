use thiserror::Error;
use tracery_rpc::RpcError;
use tracery_sync_store::SyncStoreError;

/// Error type for realtime sync.
///
/// Everything RPC- or store-shaped is recoverable: the task logs it and
/// retries on the next head. A reorg that walks past the finality depth is
/// fatal; history below finality is assumed immutable, so the local data can
/// no longer be trusted.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("sync store error: {0}")]
    Store(#[from] SyncStoreError),

    /// No common ancestor found within `finality_block_count` blocks.
    #[error(
        "reorg on chain {chain_id} deeper than finality: no common ancestor above block {floor}"
    )]
    ReorgDeeperThanFinality { chain_id: u64, floor: u64 },

    /// A fetched block does not link to its predecessor.
    #[error("broken parent link at block {number}")]
    BrokenParentLink { number: u64 },

    /// Downstream consumer hung up; the run is over.
    #[error("event channel closed")]
    ChannelClosed,
}

impl RealtimeError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            RealtimeError::ReorgDeeperThanFinality { .. } | RealtimeError::ChannelClosed => false,
            RealtimeError::Rpc(error) => error.is_retryable(),
            RealtimeError::Store(error) => error.is_retryable(),
            RealtimeError::BrokenParentLink { .. } => true,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Detailed message for fatal errors surfaced to the operator.
    pub fn fatal_message(&self) -> String {
        match self {
            RealtimeError::ReorgDeeperThanFinality { chain_id, floor } => format!(
                "FATAL: chain {chain_id} reorged below the configured finality depth.\n\
                 \n\
                 The canonical chain no longer contains any block this indexer\n\
                 has persisted above block {floor}. Indexed data below the\n\
                 finality depth is assumed immutable, so automatic recovery is\n\
                 not possible. Drop the chain's indexed data and resync.",
            ),
            other => format!("FATAL: unexpected non-recoverable error: {other}"),
        }
    }
}

pub(crate) type Result<T> = std::result::Result<T, RealtimeError>;
