use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexingStoreError {
    /// Connection reset, deadlock, timeout; the dispatcher retries the
    /// event after backoff.
    #[error("transient database failure: {0}")]
    Transient(String),

    /// Unique/not-null/check/foreign-key violation from user writes. Not
    /// retryable.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A numeric value does not fit a JSON column.
    #[error(
        "value {value} in column '{column}' exceeds the JSON-safe integer \
         range; store large integers as strings"
    )]
    BigIntSerialization { column: String, value: String },

    /// Update or delete on a row that does not exist.
    #[error("row '{key}' not found in table '{table}'")]
    NotFound { table: String, key: String },

    /// The backend keeps no version log for reorg rollback; the caller must
    /// re-run events from the last committed checkpoint instead.
    #[error("backend does not support checkpoint revert")]
    RevertUnsupported,

    #[error("sql error: {0}")]
    Sql(String),
}

impl IndexingStoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
