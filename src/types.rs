//! Shared error type for the civic core
//!
//! Domain outcomes (`NotFound`, `Forbidden`, `Terminal`, `Validation`,
//! `Conflict`) are surfaced to callers as distinct variants. Infrastructure
//! failures carry the underlying message.

use thiserror::Error;

/// Errors returned by every core operation
#[derive(Debug, Error)]
pub enum CivicError {
    /// Entity missing or soft-deleted
    #[error("Not found: {0}")]
    NotFound(String),

    /// Role or ownership rule violated
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Mutation attempted on a closed issue
    #[error("Terminal state: {0}")]
    Terminal(String),

    /// Malformed input (coordinates, lengths, enums, time windows)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Concurrent-update retries exhausted
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage failure
    #[error("Database error: {0}")]
    Database(String),

    /// Event transport failure
    #[error("NATS error: {0}")]
    Nats(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CivicError {
    /// Whether an idempotent read may be retried after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, CivicError::Database(_))
    }

    /// Stable machine-readable code for the request boundary
    pub fn code(&self) -> &'static str {
        match self {
            CivicError::NotFound(_) => "not_found",
            CivicError::Forbidden(_) => "forbidden",
            CivicError::Terminal(_) => "terminal",
            CivicError::Validation(_) => "validation_error",
            CivicError::Conflict(_) => "conflict",
            CivicError::Database(_) => "database_error",
            CivicError::Nats(_) => "nats_error",
            CivicError::Internal(_) => "internal_error",
        }
    }
}

impl From<mongodb::error::Error> for CivicError {
    fn from(e: mongodb::error::Error) -> Self {
        CivicError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for CivicError {
    fn from(e: serde_json::Error) -> Self {
        CivicError::Internal(format!("Serialization failed: {}", e))
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, CivicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_database_errors_retry() {
        assert!(CivicError::Database("timeout".into()).is_retryable());
        assert!(!CivicError::Terminal("closed".into()).is_retryable());
        assert!(!CivicError::Nats("down".into()).is_retryable());
    }

    #[test]
    fn test_error_message_keeps_reason() {
        let err = CivicError::Terminal("closed issues cannot be reopened".into());
        assert_eq!(err.to_string(), "Terminal state: closed issues cannot be reopened");
        assert_eq!(err.code(), "terminal");
    }
}
