//! Common Error Types for the sBTC bridge client
//!
//! Every component keeps its own error enum; `BridgeError` rolls them up so
//! callers (the CLI, an embedding UI) get one type with a stable error code.

use thiserror::Error;

use crate::btc::esplora::EsploraError;
use crate::btc::script::ScriptError;
use crate::deposit_flow::DepositFlowError;
use crate::deposit_tracker::TrackerError;
use crate::emily::IndexerError;
use crate::http::HttpError;
use crate::stacks::StacksError;
use crate::sync::SyncError;
use crate::wallet::WalletError;

/// Root error type for the bridge client
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    /// Malformed keys, threshold, lock time or recipient
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Explorer(#[from] EsploraError),

    #[error(transparent)]
    Stacks(#[from] StacksError),

    #[error(transparent)]
    Indexer(#[from] IndexerError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Deposit(#[from] DepositFlowError),

    /// Validation errors (CLI input and similar)
    #[error("validation error: {0}")]
    Validation(String),
}

impl BridgeError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Http(e) => e.is_retryable(),
            BridgeError::Explorer(e) => e.is_retryable(),
            BridgeError::Stacks(e) => e.is_retryable(),
            BridgeError::Indexer(e) => e.is_retryable(),
            BridgeError::Sync(_) => true,
            BridgeError::Deposit(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get error code for API responses and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Logging(_) => "LOGGING_ERROR",
            BridgeError::Script(_) => "INVALID_SCRIPT_PARAMETERS",
            BridgeError::Http(e) => e.error_code(),
            BridgeError::Explorer(e) => e.error_code(),
            BridgeError::Stacks(e) => e.error_code(),
            BridgeError::Indexer(e) => e.error_code(),
            BridgeError::Sync(e) => e.error_code(),
            BridgeError::Wallet(e) => e.error_code(),
            BridgeError::Tracker(_) => "TRACKER_ERROR",
            BridgeError::Deposit(e) => e.error_code(),
            BridgeError::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_follow_taxonomy() {
        let err: BridgeError = ScriptError::EmptyReclaimKeys.into();
        assert_eq!(err.error_code(), "INVALID_SCRIPT_PARAMETERS");
        assert!(!err.is_retryable());

        let err: BridgeError = IndexerError::NotFoundYet {
            txid: "ab".repeat(32),
            vout: 0,
        }
        .into();
        assert_eq!(err.error_code(), "NOT_FOUND_YET");
        assert!(err.is_retryable());

        let err: BridgeError = WalletError::UserRejected("denied".to_string()).into();
        assert_eq!(err.error_code(), "WALLET_REJECTED");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_network_errors_are_retryable() {
        let err: BridgeError = HttpError::Exhausted {
            attempts: 3,
            last_error: "connection refused".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), "NETWORK_UNAVAILABLE");
        assert!(err.is_retryable());
        assert!(!BridgeError::validation("bad amount").is_retryable());
    }
}
