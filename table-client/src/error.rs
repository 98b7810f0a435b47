//! Client error types

use shared::TableKeyError;
use thiserror::Error;

use crate::message::MessageError;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No table matches the identifier
    #[error("Table not found: {0}")]
    NotFound(String),

    /// Backing store unreachable or erroring
    #[error("Backend unavailable: {0}")]
    Transient(String),

    /// Waiter call did not persist
    #[error("Waiter call failed: {0}")]
    WriteFailure(String),

    /// Malformed table identifier
    #[error("Invalid table identifier: {0}")]
    InvalidIdentifier(#[from] TableKeyError),

    /// Invalid response format
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Change feed error
    #[error("Feed error: {0}")]
    Feed(#[from] MessageError),

    /// Local storage error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The session task is gone
    #[error("Session closed")]
    SessionClosed,
}

/// Failure classes a caller can act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Terminal, the user must rescan the QR code
    NotFound,
    /// Network or backend error
    Transient,
    /// Optimistic call must be reverted; retry allowed
    WriteFailure,
    /// Malformed input, no retry
    InvalidIdentifier,
}

impl ClientError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ClientError::NotFound(_) => FailureKind::NotFound,
            ClientError::WriteFailure(_) => FailureKind::WriteFailure,
            ClientError::InvalidIdentifier(_) => FailureKind::InvalidIdentifier,
            ClientError::Http(_)
            | ClientError::Transient(_)
            | ClientError::InvalidResponse(_)
            | ClientError::Serialization(_)
            | ClientError::Feed(_)
            | ClientError::Io(_)
            | ClientError::SessionClosed => FailureKind::Transient,
        }
    }

    /// Whether retrying the same operation can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::Transient | FailureKind::WriteFailure
        )
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            ClientError::NotFound("#4".into()).kind(),
            FailureKind::NotFound
        );
        assert_eq!(
            ClientError::InvalidIdentifier(TableKeyError::Missing).kind(),
            FailureKind::InvalidIdentifier
        );
        assert_eq!(
            ClientError::InvalidResponse("empty".into()).kind(),
            FailureKind::Transient
        );
        assert!(ClientError::WriteFailure("503".into()).is_retryable());
        assert!(!ClientError::NotFound("#4".into()).is_retryable());
    }
}
