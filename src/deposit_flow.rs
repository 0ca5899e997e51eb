//! End-to-end deposit flow
//!
//! `prepare` validates the request, checks that Emily is in sync and fetches
//! the signer aggregate key, then derives the deposit address. `execute`
//! pays it through the selected wallet and registers the outpoint with
//! Emily. The transaction is always broadcast before registration; when
//! registration fails the txid is reported so [`DepositFlow::register`] can
//! be retried on its own.

use bitcoin::{Address, Script, Txid};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::btc::script::build_reclaim_script;
use crate::btc::{derive_deposit_output, DepositOutput, EsploraClient, EsploraError, ScriptError};
use crate::common::config::{BridgeConfig, BridgeNetwork};
use crate::common::logging::{
    generate_correlation_id, log_deposit_event, log_registration_event, log_wallet_event,
};
use crate::emily::{EmilyClient, IndexerError};
use crate::http::ResilientHttpClient;
use crate::stacks::{StacksClient, StacksError};
use crate::sync::{BridgeSyncChecker, SyncError, SyncStatus};
use crate::types::{
    sats_to_display, CreateDepositRequest, DepositParameters, EmilyDepositRecord, StacksPrincipal,
};
use crate::wallet::{SendRequest, WalletError, WalletSigner};

#[derive(Debug, Error)]
pub enum DepositFlowError {
    #[error("invalid deposit amount: {0}")]
    InvalidAmount(String),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Stacks(#[from] StacksError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Explorer(#[from] EsploraError),

    /// The explorer has not seen the transaction yet
    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    #[error(transparent)]
    Indexer(#[from] IndexerError),

    /// `txid:vout` does not pay the derived deposit script
    #[error("output {txid}:{vout} does not pay the deposit address {address}")]
    OutputMismatch {
        txid: String,
        vout: u32,
        address: String,
    },

    #[error("transaction {txid} has no output paying {script_pubkey}")]
    NoDepositOutput { txid: String, script_pubkey: String },

    /// Funds are on chain but Emily does not know about them yet
    #[error("bridge registration failed, transaction {txid} already sent: {source}")]
    RegistrationFailed {
        txid: String,
        #[source]
        source: Box<DepositFlowError>,
    },
}

impl DepositFlowError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DepositFlowError::Sync(_) => true,
            DepositFlowError::Stacks(e) => e.is_retryable(),
            DepositFlowError::Explorer(e) => e.is_retryable(),
            DepositFlowError::TransactionNotFound(_) => true,
            DepositFlowError::Indexer(e) => e.is_retryable(),
            DepositFlowError::RegistrationFailed { .. } => true,
            _ => false,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            DepositFlowError::InvalidAmount(_) => "INVALID_AMOUNT",
            DepositFlowError::InvalidRecipient(_) => "INVALID_RECIPIENT",
            DepositFlowError::Script(_) => "INVALID_SCRIPT_PARAMETERS",
            DepositFlowError::Explorer(e) => e.error_code(),
            DepositFlowError::TransactionNotFound(_) => "NOT_FOUND_YET",
            DepositFlowError::OutputMismatch { .. } | DepositFlowError::NoDepositOutput { .. } => {
                "DEPOSIT_OUTPUT_MISMATCH"
            }
            DepositFlowError::Indexer(e) => e.error_code(),
            DepositFlowError::Sync(e) => e.error_code(),
            DepositFlowError::Stacks(e) => e.error_code(),
            DepositFlowError::Wallet(e) => e.error_code(),
            DepositFlowError::RegistrationFailed { source, .. } => source.error_code(),
        }
    }
}

/// What the user asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRequest {
    pub recipient: StacksPrincipal,
    pub amount_sats: u64,
    /// Compressed reclaim keys, in script order
    pub reclaim_pubkeys: Vec<Vec<u8>>,
    pub threshold: usize,
}

/// A validated deposit with its derived output, ready to pay
#[derive(Debug, Clone)]
pub struct PreparedDeposit {
    pub correlation_id: String,
    pub amount_sats: u64,
    pub params: DepositParameters,
    pub output: DepositOutput,
    pub sync: SyncStatus,
}

impl PreparedDeposit {
    pub fn address(&self) -> &Address {
        &self.output.address
    }

    pub fn registration_request(&self, txid: &str, vout: u32) -> CreateDepositRequest {
        CreateDepositRequest {
            bitcoin_txid: txid.to_string(),
            bitcoin_tx_output_index: vout,
            reclaim_script: hex::encode(self.output.reclaim_script.as_bytes()),
            deposit_script: hex::encode(self.output.deposit_script.as_bytes()),
        }
    }
}

/// Outcome of a completed deposit
#[derive(Debug, Clone)]
pub struct DepositReceipt {
    pub correlation_id: String,
    pub txid: Txid,
    pub vout: u32,
    pub record: EmilyDepositRecord,
}

#[derive(Debug, Clone)]
pub struct DepositFlow {
    network: BridgeNetwork,
    deployer: String,
    max_fee: u64,
    lock_time: u32,
    sync: BridgeSyncChecker,
    stacks: StacksClient,
    emily: EmilyClient,
    explorer: EsploraClient,
}

impl DepositFlow {
    pub fn new(config: &BridgeConfig, http: ResilientHttpClient) -> Self {
        let stacks = StacksClient::new(http.clone(), &config.stacks_api_url);
        let emily = EmilyClient::new(http.clone(), &config.emily_url);

        Self {
            network: config.network,
            deployer: config.sbtc_contract_deployer.clone(),
            max_fee: config.deposit_max_fee,
            lock_time: config.reclaim_lock_time,
            sync: BridgeSyncChecker::new(stacks.clone(), emily.clone()),
            stacks,
            emily,
            explorer: EsploraClient::new(http, &config.mempool_api_url),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config, ResilientHttpClient::with_policy(config.retry_policy.clone()))
    }

    pub fn emily(&self) -> &EmilyClient {
        &self.emily
    }

    pub fn explorer(&self) -> &EsploraClient {
        &self.explorer
    }

    pub fn sync_checker(&self) -> &BridgeSyncChecker {
        &self.sync
    }

    /// Checks that need no network access
    pub fn validate(&self, request: &DepositRequest) -> Result<(), DepositFlowError> {
        if request.amount_sats <= self.max_fee {
            return Err(DepositFlowError::InvalidAmount(format!(
                "amount {} does not exceed the max fee {}",
                sats_to_display(request.amount_sats),
                sats_to_display(self.max_fee)
            )));
        }
        if request.recipient.is_mainnet() != self.network.is_stacks_mainnet() {
            return Err(DepositFlowError::InvalidRecipient(format!(
                "{} is not a {} address",
                request.recipient, self.network
            )));
        }
        build_reclaim_script(self.lock_time, &request.reclaim_pubkeys, request.threshold)?;
        Ok(())
    }

    /// Validate, check sync and derive the deposit address under the
    /// signer set's current aggregate key
    pub async fn prepare(&self, request: &DepositRequest) -> Result<PreparedDeposit, DepositFlowError> {
        self.prepare_with(request, None).await
    }

    /// Like [`prepare`](Self::prepare) with a pinned aggregate key, for
    /// deposits sent before a signer set rotation
    pub async fn prepare_with_aggregate_key(
        &self,
        request: &DepositRequest,
        aggregate_pubkey: Vec<u8>,
    ) -> Result<PreparedDeposit, DepositFlowError> {
        self.prepare_with(request, Some(aggregate_pubkey)).await
    }

    async fn prepare_with(
        &self,
        request: &DepositRequest,
        aggregate_pubkey: Option<Vec<u8>>,
    ) -> Result<PreparedDeposit, DepositFlowError> {
        self.validate(request)?;

        let correlation_id = generate_correlation_id();
        let (sync, aggregate_pubkey) = match aggregate_pubkey {
            Some(key) => (self.sync.ensure_synced().await?, key),
            None => tokio::try_join!(
                async { self.sync.ensure_synced().await.map_err(DepositFlowError::from) },
                async {
                    self.stacks
                        .get_current_aggregate_key(&self.deployer)
                        .await
                        .map_err(DepositFlowError::from)
                },
            )?,
        };

        let params = DepositParameters {
            aggregate_pubkey,
            recipient: request.recipient.to_clarity_bytes(),
            max_fee: self.max_fee,
            lock_time: self.lock_time,
            reclaim_pubkeys: request.reclaim_pubkeys.clone(),
            threshold: request.threshold,
        };
        let output = derive_deposit_output(&params, self.network.bitcoin_network())?;

        info!(
            correlation_id = %correlation_id,
            address = %output.address,
            amount = %sats_to_display(request.amount_sats),
            "deposit prepared"
        );
        log_deposit_event("deposit_prepared", &correlation_id, None, request.amount_sats, None);

        Ok(PreparedDeposit {
            correlation_id,
            amount_sats: request.amount_sats,
            params,
            output,
            sync,
        })
    }

    /// Pay the deposit address through `signer`, then register with Emily
    pub async fn execute(
        &self,
        signer: &dyn WalletSigner,
        prepared: &PreparedDeposit,
    ) -> Result<DepositReceipt, DepositFlowError> {
        let send = SendRequest {
            recipient: prepared.output.address.clone(),
            amount_sats: prepared.amount_sats,
            network: self.network,
        };

        let provider = signer.provider().to_string();
        let txid = match signer.send(&send).await {
            Ok(txid) => txid,
            Err(e) => {
                log_wallet_event(
                    &provider,
                    &prepared.correlation_id,
                    None,
                    Some((e.error_code(), &e.to_string())),
                );
                return Err(e.into());
            }
        };
        let txid_str = txid.to_string();
        log_wallet_event(&provider, &prepared.correlation_id, Some(&txid_str), None);
        log_deposit_event(
            "deposit_broadcast",
            &prepared.correlation_id,
            Some(&txid_str),
            prepared.amount_sats,
            None,
        );

        let vout = match self
            .resolve_output_index(&txid_str, &prepared.output.script_pubkey())
            .await
        {
            Ok(vout) => vout,
            Err(e) => {
                warn!(
                    correlation_id = %prepared.correlation_id,
                    txid = %txid_str,
                    error = %e,
                    "deposit output unresolved, registration deferred"
                );
                return Err(DepositFlowError::RegistrationFailed {
                    txid: txid_str,
                    source: Box::new(e),
                });
            }
        };
        let record = self.submit(prepared, &txid_str, vout).await?;

        Ok(DepositReceipt {
            correlation_id: prepared.correlation_id.clone(),
            txid,
            vout,
            record,
        })
    }

    /// Index of the output of `txid` paying `script_pubkey`
    pub async fn resolve_output_index(&self, txid: &str, script_pubkey: &Script) -> Result<u32, DepositFlowError> {
        let tx = self
            .explorer
            .get_transaction(txid)
            .await?
            .ok_or_else(|| DepositFlowError::TransactionNotFound(txid.to_string()))?;

        let vout = tx.output_index(script_pubkey).ok_or_else(|| DepositFlowError::NoDepositOutput {
            txid: txid.to_string(),
            script_pubkey: hex::encode(script_pubkey.as_bytes()),
        })?;
        debug!(txid, vout, "deposit output resolved");
        Ok(vout)
    }

    /// Register an already broadcast deposit. Safe to repeat.
    ///
    /// `txid:vout` must pay the prepared deposit address; otherwise Emily
    /// would be handed scripts it can never sweep.
    pub async fn register(
        &self,
        prepared: &PreparedDeposit,
        txid: &str,
        vout: u32,
    ) -> Result<EmilyDepositRecord, DepositFlowError> {
        let found = self
            .resolve_output_index(txid, &prepared.output.script_pubkey())
            .await?;
        if found != vout {
            return Err(DepositFlowError::OutputMismatch {
                txid: txid.to_string(),
                vout,
                address: prepared.output.address.to_string(),
            });
        }

        self.submit(prepared, txid, vout).await
    }

    async fn submit(
        &self,
        prepared: &PreparedDeposit,
        txid: &str,
        vout: u32,
    ) -> Result<EmilyDepositRecord, DepositFlowError> {
        let request = prepared.registration_request(txid, vout);

        match self.emily.submit_deposit(&request).await {
            Ok(record) => {
                log_registration_event(&prepared.correlation_id, txid, vout, None);
                Ok(record)
            }
            Err(source) => {
                log_registration_event(
                    &prepared.correlation_id,
                    txid,
                    vout,
                    Some((source.error_code(), &source.to_string())),
                );
                Err(DepositFlowError::RegistrationFailed {
                    txid: txid.to_string(),
                    source: Box::new(DepositFlowError::Indexer(source)),
                })
            }
        }
    }
}
