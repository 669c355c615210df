//! Error types for the load tester

use thiserror::Error;

/// Main error type for load test operations
#[derive(Error, Debug)]
pub enum LoadTestError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error on {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Nonce error: {0}")]
    Nonce(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LoadTestError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoadTestError::NotFound(_)
                | LoadTestError::Transport { .. }
                | LoadTestError::Timeout { .. }
        )
    }

    /// Shorthand for a transport failure against `endpoint`
    pub fn transport(endpoint: &str, err: impl std::fmt::Display) -> Self {
        LoadTestError::Transport {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type for load test operations
pub type LoadResult<T> = Result<T, LoadTestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LoadTestError::NotFound("receipt".into()).is_retryable());
        assert!(LoadTestError::transport("http://localhost:8545", "refused").is_retryable());
        assert!(!LoadTestError::Encoding("bad hex".into()).is_retryable());
        assert!(!LoadTestError::Cancelled.is_retryable());
    }
}
