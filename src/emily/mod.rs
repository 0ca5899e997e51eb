//! Emily bridge indexer
//!
//! Emily records deposit outpoints and tracks them until the signers mint
//! sBTC. Registration is idempotent per `(txid, vout)`, and a lookup right
//! after broadcast is expected to miss, so "not found yet" is its own error
//! kind rather than a failure.

mod client;

use thiserror::Error;

pub use client::EmilyClient;

use crate::http::HttpError;

#[derive(Debug, Error)]
pub enum IndexerError {
    /// Emily has not observed the outpoint yet
    #[error("deposit {txid}:{vout} not indexed yet")]
    NotFoundYet { txid: String, vout: u32 },

    #[error("indexer rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("indexer unreachable: {0}")]
    NetworkUnavailable(String),

    #[error("invalid indexer response: {0}")]
    InvalidResponse(String),
}

impl IndexerError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexerError::NotFoundYet { .. } | IndexerError::NetworkUnavailable(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            IndexerError::NotFoundYet { .. } => "NOT_FOUND_YET",
            IndexerError::Rejected { .. } => "INDEXER_REJECTED",
            IndexerError::NetworkUnavailable(_) => "NETWORK_UNAVAILABLE",
            IndexerError::InvalidResponse(_) => "INVALID_RESPONSE",
        }
    }
}

impl From<HttpError> for IndexerError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Exhausted { .. } => IndexerError::NetworkUnavailable(err.to_string()),
            HttpError::Status { status, body } => IndexerError::Rejected { status, body },
            HttpError::Decode(msg) => IndexerError::InvalidResponse(msg),
        }
    }
}
