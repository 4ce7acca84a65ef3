use thiserror::Error;
use tracery_rpc::RpcError;
use tracery_sync_store::SyncStoreError;

#[derive(Debug, Error)]
pub enum HistoricalError {
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("sync store error: {0}")]
    Store(#[from] SyncStoreError),

    /// The provider rejected a single-block range; nothing smaller exists.
    #[error("range [{from}, {to}] rejected and cannot be split further")]
    RangeUnsplittable { from: u64, to: u64 },

    /// Retries exhausted on a retryable error.
    #[error("retries exhausted: {0}")]
    RetriesExhausted(RpcError),

    #[error("event channel closed")]
    ChannelClosed,
}

impl HistoricalError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            HistoricalError::Rpc(error) => error.is_retryable(),
            HistoricalError::Store(error) => error.is_retryable(),
            HistoricalError::RangeUnsplittable { .. }
            | HistoricalError::RetriesExhausted(_)
            | HistoricalError::ChannelClosed => false,
        }
    }
}

pub(crate) type Result<T> = std::result::Result<T, HistoricalError>;
