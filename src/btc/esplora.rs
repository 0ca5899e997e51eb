//! Esplora / mempool.space API client
//!
//! Explorer-facing operations of the deposit flow: UTXO scan, transaction
//! lookup, broadcast, RBF query, tip height and fee estimates. All requests
//! go through the shared [`ResilientHttpClient`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::{HttpError, HttpRequest, ResilientHttpClient};

/// Esplora HTTP client
#[derive(Debug, Clone)]
pub struct EsploraClient {
    http: ResilientHttpClient,
    base_url: String,
}

impl EsploraClient {
    pub fn new(http: ResilientHttpClient, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Unspent outputs of `address`
    pub async fn get_address_utxos(&self, address: &str) -> Result<Vec<Utxo>, EsploraError> {
        let url = format!("{}/address/{}/utxo", self.base_url, address);
        let resp = self.http.fetch_with_retry(HttpRequest::get(url), &[]).await?;
        Ok(resp.json()?)
    }

    /// Transaction JSON, `None` if the explorer does not know it
    pub async fn get_transaction(&self, txid: &str) -> Result<Option<EsploraTx>, EsploraError> {
        let url = format!("{}/tx/{}", self.base_url, txid);
        let resp = self.http.fetch_with_retry(HttpRequest::get(url), &[404]).await?;
        if resp.status == 404 {
            return Ok(None);
        }
        Ok(Some(resp.json()?))
    }

    /// Raw transaction hex
    pub async fn get_tx_hex(&self, txid: &str) -> Result<String, EsploraError> {
        let url = format!("{}/tx/{}/hex", self.base_url, txid);
        let resp = self.http.fetch_with_retry(HttpRequest::get(url), &[404]).await?;
        if resp.status == 404 {
            return Err(EsploraError::TxNotFound(txid.to_string()));
        }
        Ok(resp.body.trim().to_string())
    }

    /// Get transaction status
    pub async fn get_tx_status(&self, txid: &str) -> Result<EsploraTxStatus, EsploraError> {
        let url = format!("{}/tx/{}/status", self.base_url, txid);
        let resp = self.http.fetch_with_retry(HttpRequest::get(url), &[404]).await?;
        if resp.status == 404 {
            return Err(EsploraError::TxNotFound(txid.to_string()));
        }
        Ok(resp.json()?)
    }

    /// Replacement info of a mempool transaction
    pub async fn get_tx_rbf(&self, txid: &str) -> Result<RbfInfo, EsploraError> {
        let url = format!("{}/v1/tx/{}/rbf", self.base_url, txid);
        let resp = self.http.fetch_with_retry(HttpRequest::get(url), &[]).await?;
        Ok(resp.json()?)
    }

    /// Get current block height
    pub async fn get_block_height(&self) -> Result<u64, EsploraError> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let resp = self.http.fetch_with_retry(HttpRequest::get(url), &[]).await?;

        resp.body
            .trim()
            .parse()
            .map_err(|_| EsploraError::Parse(format!("block height: {}", resp.body)))
    }

    /// Confirmation depth, 0 while in the mempool
    pub async fn get_confirmations(&self, txid: &str) -> Result<u32, EsploraError> {
        let status = self.get_tx_status(txid).await?;

        let tx_height = match (status.confirmed, status.block_height) {
            (true, Some(height)) => height,
            _ => return Ok(0),
        };

        let current_height = self.get_block_height().await?;
        let confirmations = current_height.saturating_sub(tx_height) + 1;
        Ok(confirmations.min(u32::MAX as u64) as u32)
    }

    /// Fee rate estimates in sat/vB
    pub async fn get_recommended_fees(&self) -> Result<RecommendedFees, EsploraError> {
        let url = format!("{}/v1/fees/recommended", self.base_url);
        let resp = self.http.fetch_with_retry(HttpRequest::get(url), &[]).await?;
        Ok(resp.json()?)
    }

    /// Broadcast a raw transaction, returning its txid
    pub async fn broadcast_tx(&self, tx_hex: &str) -> Result<String, EsploraError> {
        let url = format!("{}/tx", self.base_url);
        match self
            .http
            .fetch_with_retry(HttpRequest::post_text(url, tx_hex), &[])
            .await
        {
            Ok(resp) => Ok(resp.body.trim().to_string()),
            Err(HttpError::Status { body, .. }) => Err(EsploraError::BroadcastFailed(body)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Transaction status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsploraTxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    pub block_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub status: EsploraTxStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsploraVout {
    pub scriptpubkey: String,
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsploraTx {
    pub txid: String,
    pub vout: Vec<EsploraVout>,
    pub status: EsploraTxStatus,
    #[serde(default)]
    pub fee: Option<u64>,
}

impl EsploraTx {
    /// Index of the first output paying `script_pubkey`
    pub fn output_index(&self, script_pubkey: &bitcoin::Script) -> Option<u32> {
        let wanted = hex::encode(script_pubkey.as_bytes());
        self.vout
            .iter()
            .position(|out| out.scriptpubkey.eq_ignore_ascii_case(&wanted))
            .map(|i| i as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RbfInfo {
    #[serde(default)]
    pub replacements: Option<serde_json::Value>,
    #[serde(default)]
    pub replaces: Vec<String>,
}

impl RbfInfo {
    /// Whether the transaction has been replaced
    pub fn is_replaced(&self) -> bool {
        self.replacements.as_ref().map_or(false, |r| !r.is_null())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedFees {
    pub fastest_fee: u64,
    pub half_hour_fee: u64,
    pub hour_fee: u64,
    pub economy_fee: u64,
    pub minimum_fee: u64,
}

/// Esplora error types
#[derive(Debug, Error)]
pub enum EsploraError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("transaction not found: {0}")]
    TxNotFound(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),
}

impl EsploraError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EsploraError::Http(e) => e.is_retryable(),
            EsploraError::TxNotFound(_) => true,
            _ => false,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            EsploraError::Http(e) => e.error_code(),
            EsploraError::TxNotFound(_) => "TX_NOT_FOUND",
            EsploraError::Parse(_) => "INVALID_RESPONSE",
            EsploraError::BroadcastFailed(_) => "BROADCAST_FAILED",
        }
    }
}
