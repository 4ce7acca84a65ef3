use thiserror::Error;

/// Sync-store failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncStoreError {
    /// Connection reset, deadlock, timeout; retry with backoff.
    #[error("transient store failure: {0}")]
    Transient(String),

    /// Schema-level violation; retrying the same write cannot succeed.
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization failure: {0}")]
    Serialization(String),

    /// Store invariant violated (corrupt bookkeeping, missing row that must
    /// exist). Fatal.
    #[error("store invariant violated: {0}")]
    InvariantViolated(String),
}

impl SyncStoreError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    pub fn invariant_violated(msg: impl Into<String>) -> Self {
        Self::InvariantViolated(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
