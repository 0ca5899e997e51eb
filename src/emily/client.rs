use tracing::{debug, info};

use super::IndexerError;
use crate::http::{HttpRequest, ResilientHttpClient};
use crate::types::{ChainState, CreateDepositRequest, EmilyDepositRecord};

const STATUS_NOT_FOUND: u16 = 404;
const STATUS_CONFLICT: u16 = 409;

/// Emily REST client
#[derive(Debug, Clone)]
pub struct EmilyClient {
    http: ResilientHttpClient,
    base_url: String,
}

impl EmilyClient {
    pub fn new(http: ResilientHttpClient, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Register a broadcast deposit (`POST /deposit`).
    ///
    /// A 409 means the outpoint is already registered; the existing record is
    /// returned instead.
    pub async fn submit_deposit(
        &self,
        request: &CreateDepositRequest,
    ) -> Result<EmilyDepositRecord, IndexerError> {
        let url = format!("{}/deposit", self.base_url);
        let resp = self
            .http
            .fetch_with_retry(HttpRequest::post_json(url, request)?, &[STATUS_CONFLICT])
            .await?;

        if resp.status == STATUS_CONFLICT {
            info!(
                txid = %request.bitcoin_txid,
                vout = request.bitcoin_tx_output_index,
                "deposit already registered"
            );
            return self
                .get_deposit(&request.bitcoin_txid, request.bitcoin_tx_output_index)
                .await;
        }

        Ok(resp.json()?)
    }

    /// Current record of `(txid, vout)`
    pub async fn get_deposit(&self, txid: &str, vout: u32) -> Result<EmilyDepositRecord, IndexerError> {
        let url = format!("{}/deposit?bitcoinTxid={}&vout={}", self.base_url, txid, vout);
        let resp = self
            .http
            .fetch_with_retry(HttpRequest::get(url), &[STATUS_NOT_FOUND])
            .await?;

        if resp.status == STATUS_NOT_FOUND {
            debug!(txid, vout, "deposit not indexed yet");
            return Err(IndexerError::NotFoundYet {
                txid: txid.to_string(),
                vout,
            });
        }

        Ok(resp.json()?)
    }

    /// Emily's view of the Stacks chain (`GET /chainstate`)
    pub async fn get_chainstate(&self) -> Result<ChainState, IndexerError> {
        let url = format!("{}/chainstate", self.base_url);
        let resp = self.http.fetch_with_retry(HttpRequest::get(url), &[]).await?;
        Ok(resp.json()?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use mockall::Sequence;

    use super::*;
    use crate::http::{ExponentialBackoff, HttpMethod, HttpResponse, MockHttpTransport, RetryPolicy, TransportError};
    use crate::types::DepositStatus;

    const TXID: &str = "7b6a1c4e5f2d3a8b9c0d1e2f3a4b5c6d7e8f9a0b1c2d3e4f5a6b7c8d9e0f1a2b";

    fn client(mock: MockHttpTransport) -> EmilyClient {
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff: ExponentialBackoff::new(1, 1, 1),
            request_timeout: Duration::from_secs(1),
        };
        EmilyClient::new(
            ResilientHttpClient::new(Arc::new(mock), policy),
            "http://localhost:3031/",
        )
    }

    fn record_json(status: &str) -> String {
        serde_json::json!({
            "bitcoinTxid": TXID,
            "bitcoinTxOutputIndex": 0,
            "recipient": "051aa46ff88886c2ef9762d970b4d2c63678835bd39d",
            "amount": 100000,
            "lastUpdateHeight": 10,
            "lastUpdateBlockHash": "00",
            "status": status,
            "statusMessage": "",
            "parameters": {"maxFee": 80000, "lockTime": 144},
            "reclaimScript": "029000b275",
            "depositScript": "1e00"
        })
        .to_string()
    }

    fn request() -> CreateDepositRequest {
        CreateDepositRequest {
            bitcoin_txid: TXID.to_string(),
            bitcoin_tx_output_index: 0,
            reclaim_script: "029000b275".to_string(),
            deposit_script: "1e00".to_string(),
        }
    }

    #[tokio::test]
    async fn test_submit_deposit() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .withf(|req| {
                req.method == HttpMethod::Post
                    && req.url == "http://localhost:3031/deposit"
                    && req.body.as_deref().map_or(false, |b| b.contains("\"bitcoinTxOutputIndex\":0"))
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::new(201, record_json("pending"))));

        let record = client(mock).submit_deposit(&request()).await.unwrap();
        assert_eq!(record.status, DepositStatus::Pending);
        assert_eq!(record.bitcoin_txid, TXID);
    }

    #[tokio::test]
    async fn test_duplicate_submission_returns_existing_record() {
        let mut mock = MockHttpTransport::new();
        let mut seq = Sequence::new();
        mock.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(409, "already exists")));
        mock.expect_send()
            .withf(|req| req.url == format!("http://localhost:3031/deposit?bitcoinTxid={}&vout=0", TXID))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(200, record_json("accepted"))));

        let record = client(mock).submit_deposit(&request()).await.unwrap();
        assert_eq!(record.status, DepositStatus::Accepted);
    }

    #[tokio::test]
    async fn test_rejection_carries_body() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(400, "deposit script does not match")));

        let err = client(mock).submit_deposit(&request()).await.unwrap_err();
        assert_eq!(err.error_code(), "INDEXER_REJECTED");
        assert!(err.to_string().contains("deposit script does not match"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_network_unavailable() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .times(2)
            .returning(|_| Err(TransportError::Failure("connection reset".to_string())));

        let err = client(mock).submit_deposit(&request()).await.unwrap_err();
        assert!(matches!(err, IndexerError::NetworkUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_deposit_is_not_found_yet() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(404, "")));

        let err = client(mock).get_deposit(TXID, 0).await.unwrap_err();
        assert!(matches!(err, IndexerError::NotFoundYet { vout: 0, .. }));
    }

    #[tokio::test]
    async fn test_chainstate() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .withf(|req| req.url == "http://localhost:3031/chainstate")
            .returning(|_| Ok(HttpResponse::new(200, r#"{"stacksBlockHeight":100,"stacksBlockHash":"0xab"}"#)));

        assert_eq!(client(mock).get_chainstate().await.unwrap().stacks_block_height, 100);
    }
}
