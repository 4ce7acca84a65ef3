use thiserror::Error;

/// RPC failure, classified by how the caller should react.
///
/// - `RangeTooLarge`: split the block range and retry (see
///   [`crate::plan_range_split`]).
/// - `RateLimited`: back off exponentially, then retry.
/// - `Transient`: network/5xx/timeout; back off and retry up to a cap.
/// - `Fatal`: malformed response or auth failure; surface to the driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("block range too large: {message}")]
    RangeTooLarge { message: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient rpc failure: {0}")]
    Transient(String),

    #[error("fatal rpc failure: {0}")]
    Fatal(String),
}

impl RpcError {
    /// Classifies a provider error by JSON-RPC code and message text.
    ///
    /// Message heuristics cover the major hosted providers (Alchemy, Infura,
    /// Quicknode, Thirdweb); anything unrecognized defaults to transient so
    /// the caller retries instead of dying on a new provider string.
    pub fn classify(code: Option<i64>, message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("block range")
            || lower.contains("range too large")
            || lower.contains("log response size exceeded")
            || lower.contains("query returned more than")
            || (lower.contains("exceed") && lower.contains("block"))
            || lower.contains("max range")
            || lower.contains("response size")
        {
            return Self::RangeTooLarge {
                message: message.to_string(),
            };
        }

        if code == Some(429)
            || lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("too many request")
            || lower.contains("throttl")
        {
            return Self::RateLimited(message.to_string());
        }

        if code == Some(-32601)
            || lower.contains("method not found")
            || lower.contains("unauthorized")
            || lower.contains("invalid api key")
            || lower.contains("parse error")
        {
            return Self::Fatal(message.to_string());
        }

        Self::Transient(message.to_string())
    }

    /// Whether retrying the same request (possibly after a split or backoff)
    /// can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::RangeTooLarge { message } => message,
            Self::RateLimited(message) | Self::Transient(message) | Self::Fatal(message) => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_alchemy_range_error() {
        let error = RpcError::classify(
            Some(-32602),
            "Log response size exceeded. this block range should work: [0x64, 0x1388]",
        );
        assert!(matches!(error, RpcError::RangeTooLarge { .. }));
    }

    #[test]
    fn test_classify_rate_limit() {
        assert!(matches!(
            RpcError::classify(Some(429), "too many requests"),
            RpcError::RateLimited(_)
        ));
        assert!(matches!(
            RpcError::classify(None, "daily rate limit reached"),
            RpcError::RateLimited(_)
        ));
    }

    #[test]
    fn test_classify_fatal() {
        assert!(matches!(
            RpcError::classify(None, "invalid api key"),
            RpcError::Fatal(_)
        ));
        assert!(!RpcError::classify(None, "unauthorized").is_retryable());
    }

    #[test]
    fn test_unknown_defaults_to_transient() {
        let error = RpcError::classify(None, "some brand new provider error");
        assert!(matches!(error, RpcError::Transient(_)));
        assert!(error.is_retryable());
    }
}
