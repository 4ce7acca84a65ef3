use std::fmt;

use thiserror::Error;
use tracery_indexing_store::IndexingStoreError;
use tracery_rpc::RpcError;

/// What a user callback can fail with.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("indexing store error: {0}")]
    Store(#[from] IndexingStoreError),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// Uncaught failure in user logic. Never retried.
    #[error("{0}")]
    User(String),
}

impl HandlerError {
    /// Infrastructure failures are retried after backoff; user logic and
    /// schema violations abort the run.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::Store(error) => error.is_retryable(),
            HandlerError::Rpc(error) => error.is_retryable(),
            HandlerError::User(_) => false,
        }
    }
}

/// Structured report for a non-retryable callback failure, formatted for
/// the operator.
#[derive(Debug, Clone)]
pub struct UserErrorReport {
    pub event_name: String,
    pub chain_id: u64,
    pub block_number: u64,
    /// Pretty-printed decoded arguments, when the event carried any.
    pub args_pretty: Option<String>,
    pub source: String,
}

impl fmt::Display for UserErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "callback for '{}' failed at block {} (chain {}):",
            self.event_name, self.block_number, self.chain_id
        )?;
        writeln!(f, "  {}", self.source)?;
        if let Some(args) = &self.args_pretty {
            writeln!(f, "event arguments:")?;
            for line in args.lines() {
                writeln!(f, "  {line}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Retries exhausted on a retryable handler failure.
    #[error("retries exhausted: {0}")]
    RetriesExhausted(HandlerError),

    /// Non-retryable user failure; aborts the run.
    #[error("{0}")]
    User(Box<UserErrorReport>),

    #[error("indexing store error: {0}")]
    Store(#[from] IndexingStoreError),

    /// Cancelled via the kill flag. Not an error for the caller.
    #[error("dispatch cancelled")]
    Cancelled,
}
