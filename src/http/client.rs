//! Retrying HTTP client shared by the explorer, Stacks and Emily clients.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::backoff::{Backoff, ExponentialBackoff};
use super::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
use super::HttpError;

/// Default number of attempts for a single logical request
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default per-attempt timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Attempts, delays and per-attempt timeout of a logical request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: ExponentialBackoff,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: ExponentialBackoff::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// One attempt, no retry. Used for requests that must not be repeated.
    pub fn single_attempt(request_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            backoff: ExponentialBackoff::default(),
            request_timeout,
        }
    }
}

enum Attempt {
    Done(HttpResponse),
    Fatal(HttpError),
    Retry(String),
}

/// HTTP client that retries transport failures and 5xx responses
#[derive(Clone)]
pub struct ResilientHttpClient {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for ResilientHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientHttpClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ResilientHttpClient {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Client over the reqwest transport
    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self::new(Arc::new(ReqwestTransport::new()), policy)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `request` under the client's policy.
    ///
    /// Returns the first 2xx response, or the first response whose status is
    /// in `accept`. Transport errors, timeouts and 5xx are retried; any other
    /// status fails at once with [`HttpError::Status`]. When the attempts run
    /// out the error is [`HttpError::Exhausted`].
    pub async fn fetch_with_retry(
        &self,
        request: HttpRequest,
        accept: &[u16],
    ) -> Result<HttpResponse, HttpError> {
        self.fetch_with_policy(request, accept, &self.policy).await
    }

    pub async fn fetch_with_policy(
        &self,
        request: HttpRequest,
        accept: &[u16],
        policy: &RetryPolicy,
    ) -> Result<HttpResponse, HttpError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut delay = policy.backoff.base_delay_ms();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(&request, accept, policy.request_timeout).await {
                Attempt::Done(resp) => {
                    debug!(url = %request.url, status = resp.status, attempt, "request completed");
                    return Ok(resp);
                }
                Attempt::Fatal(err) => return Err(err),
                Attempt::Retry(reason) => {
                    if attempt < max_attempts {
                        warn!(
                            url = %request.url,
                            attempt,
                            delay_ms = delay,
                            "attempt failed with {}, retrying",
                            reason
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        delay = policy.backoff.next_delay_ms(delay);
                    }
                    last_error = reason;
                }
            }
        }

        error!(url = %request.url, attempts = max_attempts, "max attempts exceeded, returning with the last error");
        Err(HttpError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn attempt(&self, request: &HttpRequest, accept: &[u16], timeout: Duration) -> Attempt {
        let result = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        match result {
            Ok(resp) if resp.is_success() || accept.contains(&resp.status) => Attempt::Done(resp),
            Ok(resp) if resp.is_server_error() => {
                Attempt::Retry(format!("status {}: {}", resp.status, resp.body))
            }
            Ok(resp) => Attempt::Fatal(HttpError::Status {
                status: resp.status,
                body: resp.body,
            }),
            Err(err) => Attempt::Retry(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use mockall::Sequence;

    use super::*;
    use crate::http::transport::MockHttpTransport;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: ExponentialBackoff::new(1, 2, 1),
            request_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_retries_server_errors_until_success() {
        let mut mock = MockHttpTransport::new();
        let mut seq = Sequence::new();
        mock.expect_send()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(500, "internal error")));
        mock.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(200, "{\"ok\":true}")));

        let client = ResilientHttpClient::new(Arc::new(mock), fast_policy(5));
        let resp = client
            .fetch_with_retry(HttpRequest::get("http://indexer/chainstate"), &[])
            .await
            .unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_whitelisted_status_returns_immediately() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(404, "not found")));

        let client = ResilientHttpClient::new(Arc::new(mock), fast_policy(3));
        let resp = client
            .fetch_with_retry(HttpRequest::get("http://indexer/deposit"), &[404])
            .await
            .unwrap();
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn test_client_error_fails_fast() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(400, "bad txid")));

        let client = ResilientHttpClient::new(Arc::new(mock), fast_policy(3));
        let err = client
            .fetch_with_retry(HttpRequest::get("http://indexer/deposit"), &[])
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::Status { status: 400, ref body } if body == "bad txid"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_transport_failures_exhaust_budget() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .times(3)
            .returning(|_| Err(TransportError::Failure("connection refused".to_string())));

        let client = ResilientHttpClient::new(Arc::new(mock), fast_policy(3));
        let err = client
            .fetch_with_retry(HttpRequest::get("http://stacks/extended"), &[])
            .await
            .unwrap_err();

        match err {
            HttpError::Exhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    struct SlowTransport {
        calls: AtomicU32,
    }

    #[async_trait]
    impl HttpTransport for SlowTransport {
        async fn send(&self, _request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(HttpResponse::new(200, ""))
        }
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_transport_failure() {
        let transport = Arc::new(SlowTransport {
            calls: AtomicU32::new(0),
        });
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff: ExponentialBackoff::new(1, 1, 1),
            request_timeout: Duration::from_millis(10),
        };
        let client = ResilientHttpClient::new(transport.clone(), policy);

        let err = client
            .fetch_with_retry(HttpRequest::get("http://slow"), &[])
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::Exhausted { attempts: 2, .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }
}
