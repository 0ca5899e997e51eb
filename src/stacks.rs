//! Stacks node / API client
//!
//! Two reads are needed by the deposit flow: the current chain tip (for the
//! sync guard) and the signer set's current aggregate key from the
//! `sbtc-registry` contract.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::{HttpError, HttpRequest, ResilientHttpClient};

/// Clarity type prefix of a buffer value
const CLARITY_BUFFER: u8 = 0x02;

#[derive(Debug, Error)]
pub enum StacksError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("read-only call failed: {0}")]
    CallFailed(String),

    #[error("unexpected clarity value: {0}")]
    Decode(String),
}

impl StacksError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StacksError::Http(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            StacksError::Http(e) => e.error_code(),
            StacksError::CallFailed(_) => "CONTRACT_CALL_FAILED",
            StacksError::Decode(_) => "INVALID_RESPONSE",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExtendedStatus {
    chain_tip: ChainTip,
}

#[derive(Debug, Deserialize)]
struct ChainTip {
    block_height: u64,
}

#[derive(Debug, Serialize)]
struct ReadOnlyCall<'a> {
    sender: &'a str,
    arguments: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReadOnlyResult {
    okay: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    cause: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StacksClient {
    http: ResilientHttpClient,
    base_url: String,
}

impl StacksClient {
    pub fn new(http: ResilientHttpClient, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Height of the Stacks chain tip (`GET /extended`)
    pub async fn get_chain_tip_height(&self) -> Result<u64, StacksError> {
        let url = format!("{}/extended", self.base_url);
        let resp = self.http.fetch_with_retry(HttpRequest::get(url), &[]).await?;
        let status: ExtendedStatus = resp.json()?;
        Ok(status.chain_tip.block_height)
    }

    /// Current signer aggregate key, 33-byte compressed
    pub async fn get_current_aggregate_key(&self, deployer: &str) -> Result<Vec<u8>, StacksError> {
        let url = format!(
            "{}/v2/contracts/call-read/{}/sbtc-registry/get-current-aggregate-pubkey",
            self.base_url, deployer
        );
        let call = ReadOnlyCall {
            sender: deployer,
            arguments: Vec::new(),
        };
        let resp = self
            .http
            .fetch_with_retry(HttpRequest::post_json(url, &call)?, &[])
            .await?;

        let result: ReadOnlyResult = resp.json()?;
        if !result.okay {
            return Err(StacksError::CallFailed(result.cause.unwrap_or_default()));
        }
        let value = result
            .result
            .ok_or_else(|| StacksError::Decode("missing result".to_string()))?;

        let key = decode_clarity_buffer(&value)?;
        if key.len() != 33 {
            return Err(StacksError::Decode(format!(
                "aggregate key is {} bytes",
                key.len()
            )));
        }
        Ok(key)
    }
}

/// Decode a hex-serialized Clarity `(buff N)` value
fn decode_clarity_buffer(value: &str) -> Result<Vec<u8>, StacksError> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| StacksError::Decode(e.to_string()))?;

    if bytes.len() < 5 || bytes[0] != CLARITY_BUFFER {
        return Err(StacksError::Decode(format!("not a buffer: {}", value)));
    }
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let data = &bytes[5..];
    if data.len() != len {
        return Err(StacksError::Decode(format!(
            "buffer length {} does not match {} bytes",
            len,
            data.len()
        )));
    }
    Ok(data.to_vec())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http::{HttpResponse, MockHttpTransport, RetryPolicy};

    const DEPLOYER: &str = "SN3R84XZYA63QS28932XQF3G1J8R9PC3W76P9CSQS";
    const KEY: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn client(mock: MockHttpTransport) -> StacksClient {
        StacksClient::new(
            ResilientHttpClient::new(Arc::new(mock), RetryPolicy::default()),
            "http://localhost:3999",
        )
    }

    #[tokio::test]
    async fn test_chain_tip_height() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .withf(|req| req.url == "http://localhost:3999/extended")
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    r#"{"server_version":"x","chain_tip":{"block_height":100,"block_hash":"0xab"}}"#,
                ))
            });

        assert_eq!(client(mock).get_chain_tip_height().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_aggregate_key_lookup() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .withf(|req| {
                req.url.ends_with("/sbtc-registry/get-current-aggregate-pubkey")
                    && req.body.as_deref().map_or(false, |b| b.contains(DEPLOYER))
            })
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    format!(r#"{{"okay":true,"result":"0x0200000021{}"}}"#, KEY),
                ))
            });

        let key = client(mock).get_current_aggregate_key(DEPLOYER).await.unwrap();
        assert_eq!(hex::encode(key), KEY);
    }

    #[tokio::test]
    async fn test_failed_read_only_call() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send().returning(|_| {
            Ok(HttpResponse::new(200, r#"{"okay":false,"cause":"NoSuchContract"}"#))
        });

        let err = client(mock).get_current_aggregate_key(DEPLOYER).await.unwrap_err();
        assert!(matches!(err, StacksError::CallFailed(ref cause) if cause == "NoSuchContract"));
    }

    #[test]
    fn test_buffer_length_mismatch() {
        assert!(decode_clarity_buffer("0x0200000004abcd").is_err());
        assert!(decode_clarity_buffer("0x0100000000").is_err());
        assert_eq!(decode_clarity_buffer("0x0200000002abcd").unwrap(), vec![0xab, 0xcd]);
    }
}
