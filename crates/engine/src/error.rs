use thiserror::Error;
use tracery_dispatch::{DispatchError, RecoveryError};
use tracery_historical::HistoricalError;
use tracery_rpc::RpcError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("historical sync failed: {0}")]
    Historical(#[from] HistoricalError),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("chain task panicked: {0}")]
    TaskPanicked(String),
}
