//! Retry-resilient HTTP transport
//!
//! Every network-facing component goes through [`ResilientHttpClient`], so
//! the retry and timeout policy lives in one place and callers only see
//! typed outcomes: a response, a non-retryable status, or an exhausted budget.

mod backoff;
mod client;
mod transport;

use thiserror::Error;

pub use backoff::{Backoff, ExponentialBackoff};
pub use client::{ResilientHttpClient, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT};
#[cfg(test)]
pub use transport::MockHttpTransport;
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
};

#[derive(Debug, Error)]
pub enum HttpError {
    /// Transport failures, timeouts or 5xx on every attempt
    #[error("network unavailable after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// A status that is neither 2xx nor accepted by the caller
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl HttpError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, HttpError::Exhausted { .. })
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            HttpError::Exhausted { .. } => "NETWORK_UNAVAILABLE",
            HttpError::Status { .. } => "HTTP_STATUS",
            HttpError::Decode(_) => "INVALID_RESPONSE",
        }
    }
}
