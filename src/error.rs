use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the lifecycle engine
#[derive(Error, Debug)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Remote call errors
    #[error("Rate limited by remote: {0}")]
    RateLimited(String),

    #[error("User rejected the operation: {0}")]
    UserRejected(String),

    #[error("Nonce conflict: {0}")]
    NonceConflict(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation reverted: {reason}")]
    Reverted { reason: String },

    // Workflow preconditions
    #[error("Approval required: need {required}, allowance is {available}")]
    ApprovalRequired {
        required: Decimal,
        available: Decimal,
    },

    #[error("An operation of kind {kind} is already pending")]
    DuplicateOperation { kind: String },

    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Retry classification for remote-call failures.
///
/// Classification is structural (per error variant), never string sniffing:
/// the provider boundary is expected to map its own failure modes onto the
/// matching `EngineError` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Remote is throttling; retry with exponential backoff
    RateLimited,
    /// Terminal user decision; never retried
    UserRejected,
    /// Submission raced another write; retry once after a short fixed delay
    NonceConflict,
    /// Connectivity fault before the remote saw the call; retry with backoff
    TransientNetwork,
    /// Remote rejected the operation's preconditions; terminal
    Reverted,
    /// Cause unknown; retrying risks duplicate side effects, so terminal
    Unclassified,
}

impl ErrorClass {
    /// Whether the executor may attempt the call again at all
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorClass::RateLimited | ErrorClass::NonceConflict | ErrorClass::TransientNetwork
        )
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::RateLimited => write!(f, "rate_limited"),
            ErrorClass::UserRejected => write!(f, "user_rejected"),
            ErrorClass::NonceConflict => write!(f, "nonce_conflict"),
            ErrorClass::TransientNetwork => write!(f, "transient_network"),
            ErrorClass::Reverted => write!(f, "reverted"),
            ErrorClass::Unclassified => write!(f, "unclassified"),
        }
    }
}

impl EngineError {
    /// Classify this error for retry purposes
    pub fn classify(&self) -> ErrorClass {
        match self {
            EngineError::RateLimited(_) => ErrorClass::RateLimited,
            EngineError::UserRejected(_) => ErrorClass::UserRejected,
            EngineError::NonceConflict(_) => ErrorClass::NonceConflict,
            EngineError::Network(_) => ErrorClass::TransientNetwork,
            EngineError::Reverted { .. } => ErrorClass::Reverted,
            _ => ErrorClass::Unclassified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_is_structural() {
        assert_eq!(
            EngineError::RateLimited("429".into()).classify(),
            ErrorClass::RateLimited
        );
        assert_eq!(
            EngineError::UserRejected("declined in wallet".into()).classify(),
            ErrorClass::UserRejected
        );
        assert_eq!(
            EngineError::NonceConflict("nonce too low".into()).classify(),
            ErrorClass::NonceConflict
        );
        assert_eq!(
            EngineError::Network("connection reset".into()).classify(),
            ErrorClass::TransientNetwork
        );
        assert_eq!(
            EngineError::Internal("anything else".into()).classify(),
            ErrorClass::Unclassified
        );
    }

    #[test]
    fn test_retryable_classes() {
        assert!(ErrorClass::RateLimited.is_retryable());
        assert!(ErrorClass::NonceConflict.is_retryable());
        assert!(ErrorClass::TransientNetwork.is_retryable());
        assert!(!ErrorClass::UserRejected.is_retryable());
        assert!(!ErrorClass::Reverted.is_retryable());
        assert!(!ErrorClass::Unclassified.is_retryable());
    }
}
