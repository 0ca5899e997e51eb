//! Wallet providers
//!
//! Every provider turns `{address, amount, network}` into a broadcast txid
//! behind the [`WalletSigner`] trait. [`create_signer`] is the only place that
//! looks at the selected [`WalletProvider`]; the rest of the flow never
//! branches on provider identity.
//!
//! Providers are reached through a [`ProviderBridge`]: a request/response
//! channel to the wallet (browser extension relay, Fordefi API, Asigna
//! coordinator). Wallet requests are never retried, since a retry could
//! prompt the user twice or double-spend.

mod asigna;
mod fordefi;
mod leather;
mod xverse;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{Address, Txid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use asigna::AsignaSigner;
pub use fordefi::FordefiSigner;
pub use leather::LeatherSigner;
pub use xverse::XverseSigner;

use crate::btc::EsploraClient;
use crate::common::config::BridgeNetwork;
use crate::http::{HttpError, HttpRequest, ResilientHttpClient, RetryPolicy};

/// EIP-1193 style "user rejected the request"
pub const RPC_USER_REJECTED: i64 = 4001;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("request rejected in wallet: {0}")]
    UserRejected(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("wallet provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("invalid wallet response: {0}")]
    InvalidResponse(String),
}

impl WalletError {
    pub fn error_code(&self) -> &'static str {
        match self {
            WalletError::UserRejected(_) => "WALLET_REJECTED",
            WalletError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            WalletError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            WalletError::InvalidResponse(_) => "INVALID_RESPONSE",
        }
    }
}

/// Supported wallet providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletProvider {
    Leather,
    Xverse,
    Fordefi,
    Asigna,
}

impl FromStr for WalletProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "leather" => Ok(Self::Leather),
            "xverse" => Ok(Self::Xverse),
            "fordefi" => Ok(Self::Fordefi),
            "asigna" => Ok(Self::Asigna),
            _ => Err(format!("unknown wallet provider: {}", s)),
        }
    }
}

impl fmt::Display for WalletProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Leather => "leather",
            Self::Xverse => "xverse",
            Self::Fordefi => "fordefi",
            Self::Asigna => "asigna",
        };
        write!(f, "{}", s)
    }
}

/// A payment to the deposit address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub recipient: Address,
    pub amount_sats: u64,
    pub network: BridgeNetwork,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn provider(&self) -> WalletProvider;

    /// Pay `request.recipient` and return the broadcast txid
    async fn send(&self, request: &SendRequest) -> Result<Txid, WalletError>;
}

/// Failure reported by the provider channel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderRpcError {
    #[error("provider error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("provider unreachable: {0}")]
    Unavailable(String),
}

/// Request/response channel to a wallet
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderBridge: Send + Sync {
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderRpcError>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 over HTTP, one attempt per request
#[derive(Debug, Clone)]
pub struct HttpProviderBridge {
    http: ResilientHttpClient,
    endpoint: String,
    policy: RetryPolicy,
}

impl HttpProviderBridge {
    /// `approval_timeout` bounds how long the user may take to approve
    pub fn new(http: ResilientHttpClient, endpoint: &str, approval_timeout: Duration) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
            policy: RetryPolicy::single_attempt(approval_timeout),
        }
    }
}

#[async_trait]
impl ProviderBridge for HttpProviderBridge {
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderRpcError> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: uuid::Uuid::new_v4().to_string(),
            method,
            params,
        };
        let request = HttpRequest::post_json(self.endpoint.as_str(), &body)
            .map_err(|e| ProviderRpcError::Unavailable(e.to_string()))?;

        let resp = match self.http.fetch_with_policy(request, &[], &self.policy).await {
            Ok(resp) => resp,
            Err(HttpError::Status { status, body }) => {
                return Err(ProviderRpcError::Unavailable(format!("status {}: {}", status, body)))
            }
            Err(e) => return Err(ProviderRpcError::Unavailable(e.to_string())),
        };

        let rpc: JsonRpcResponse = resp
            .json()
            .map_err(|e| ProviderRpcError::Unavailable(e.to_string()))?;
        match (rpc.result, rpc.error) {
            (_, Some(err)) => Err(ProviderRpcError::Rpc {
                code: err.code,
                message: err.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(ProviderRpcError::Unavailable("empty response".to_string())),
        }
    }
}

/// Everything needed to construct a signer for the selected provider
#[derive(Clone)]
pub struct WalletContext {
    pub provider: WalletProvider,
    pub bridge: Arc<dyn ProviderBridge>,
    /// Required by Asigna to source UTXOs and fee rates
    pub explorer: Option<EsploraClient>,
    /// Asigna multisig vault address
    pub multisig_address: Option<Address>,
}

/// Build the signer for `ctx.provider`
pub fn create_signer(ctx: WalletContext) -> Result<Box<dyn WalletSigner>, WalletError> {
    match ctx.provider {
        WalletProvider::Leather => Ok(Box::new(LeatherSigner::new(ctx.bridge))),
        WalletProvider::Xverse => Ok(Box::new(XverseSigner::new(ctx.bridge))),
        WalletProvider::Fordefi => Ok(Box::new(FordefiSigner::new(ctx.bridge))),
        WalletProvider::Asigna => {
            let explorer = ctx.explorer.ok_or_else(|| {
                WalletError::ProviderUnavailable("asigna requires a block explorer".to_string())
            })?;
            let multisig_address = ctx.multisig_address.ok_or_else(|| {
                WalletError::ProviderUnavailable("asigna requires a multisig address".to_string())
            })?;
            Ok(Box::new(AsignaSigner::new(ctx.bridge, explorer, multisig_address)))
        }
    }
}

/// Map a provider failure, treating `rejection_codes` as user rejection
fn map_rpc_error(err: ProviderRpcError, rejection_codes: &[i64]) -> WalletError {
    match err {
        ProviderRpcError::Rpc { code, message } if rejection_codes.contains(&code) => {
            WalletError::UserRejected(message)
        }
        ProviderRpcError::Rpc { message, .. } if message.to_lowercase().contains("insufficient") => {
            WalletError::InsufficientFunds(message)
        }
        ProviderRpcError::Rpc { code, message } => {
            WalletError::ProviderUnavailable(format!("{} (code {})", message, code))
        }
        ProviderRpcError::Unavailable(msg) => WalletError::ProviderUnavailable(msg),
    }
}

/// Accept either `"<txid>"` or `{"txid": "<txid>"}`
fn parse_txid(value: &serde_json::Value) -> Result<Txid, WalletError> {
    let raw = value
        .as_str()
        .or_else(|| value.get("txid").and_then(|v| v.as_str()))
        .ok_or_else(|| WalletError::InvalidResponse(format!("no txid in {}", value)))?;

    Txid::from_str(raw.trim_matches('"'))
        .map_err(|e| WalletError::InvalidResponse(format!("{}: {}", raw, e)))
}


#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::http::{ExponentialBackoff, HttpResponse, MockHttpTransport, TransportError};

    #[test]
    fn test_error_mapping() {
        let rejected = ProviderRpcError::Rpc {
            code: RPC_USER_REJECTED,
            message: "User rejected".to_string(),
        };
        assert!(matches!(map_rpc_error(rejected, &[RPC_USER_REJECTED]), WalletError::UserRejected(_)));

        let funds = ProviderRpcError::Rpc {
            code: -32603,
            message: "Insufficient balance".to_string(),
        };
        assert!(matches!(map_rpc_error(funds, &[RPC_USER_REJECTED]), WalletError::InsufficientFunds(_)));

        let down = ProviderRpcError::Unavailable("extension not installed".to_string());
        assert_eq!(
            map_rpc_error(down, &[]).error_code(),
            "PROVIDER_UNAVAILABLE"
        );
    }

    #[test]
    fn test_parse_txid_shapes() {
        let txid = test_support::TXID;
        assert_eq!(parse_txid(&serde_json::json!(txid)).unwrap().to_string(), txid);
        assert_eq!(parse_txid(&serde_json::json!({ "txid": txid })).unwrap().to_string(), txid);
        assert!(parse_txid(&serde_json::json!({ "hash": txid })).is_err());
        assert!(parse_txid(&serde_json::json!("zz")).is_err());
    }

    #[test]
    fn test_create_signer_dispatch() {
        let bridge: Arc<dyn ProviderBridge> = Arc::new(MockProviderBridge::new());
        for provider in [WalletProvider::Leather, WalletProvider::Xverse, WalletProvider::Fordefi] {
            let signer = create_signer(WalletContext {
                provider,
                bridge: bridge.clone(),
                explorer: None,
                multisig_address: None,
            })
            .unwrap();
            assert_eq!(signer.provider(), provider);
        }

        let err = create_signer(WalletContext {
            provider: WalletProvider::Asigna,
            bridge,
            explorer: None,
            multisig_address: None,
        })
        .err()
        .unwrap();
        assert_eq!(err.error_code(), "PROVIDER_UNAVAILABLE");
    }

    fn http_bridge(mock: MockHttpTransport) -> HttpProviderBridge {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: ExponentialBackoff::new(1, 1, 1),
            request_timeout: StdDuration::from_secs(1),
        };
        HttpProviderBridge::new(
            ResilientHttpClient::new(Arc::new(mock), policy),
            "http://wallet-relay/rpc",
            StdDuration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_http_bridge_is_single_attempt() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Err(TransportError::Failure("relay down".to_string())));

        let err = http_bridge(mock)
            .request("sendTransfer", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderRpcError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_http_bridge_rpc_error() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .withf(|req| req.body.as_deref().map_or(false, |b| b.contains("\"method\":\"sendTransfer\"")))
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    r#"{"jsonrpc":"2.0","id":"1","error":{"code":4001,"message":"User rejected"}}"#,
                ))
            });

        let err = http_bridge(mock)
            .request("sendTransfer", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderRpcError::Rpc {
                code: 4001,
                message: "User rejected".to_string()
            }
        );
    }
}
