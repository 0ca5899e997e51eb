//! Asigna multisig vault
//!
//! Unlike the browser wallets, Asigna does not pick coins itself: the client
//! sources the vault's UTXOs and a fee rate from the explorer, builds a PSBT
//! paying the deposit address, has the cosigners sign it through the
//! coordinator, then extracts and broadcasts the final transaction.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, OutPoint, Psbt, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{
    map_rpc_error, ProviderBridge, SendRequest, WalletError, WalletProvider, WalletSigner,
    RPC_USER_REJECTED,
};
use crate::btc::{EsploraClient, Utxo};

/// Outputs below this are not created
const DUST_LIMIT: u64 = 546;

/// vbytes: version, locktime, counts, segwit marker
const TX_OVERHEAD_VBYTES: u64 = 11;
/// vbytes of a 2-of-3 P2WSH multisig input
const MULTISIG_INPUT_VBYTES: u64 = 105;
/// vbytes of a P2TR or P2WSH output
const OUTPUT_VBYTES: u64 = 43;

pub struct AsignaSigner {
    bridge: Arc<dyn ProviderBridge>,
    explorer: EsploraClient,
    multisig_address: Address,
}

/// Inputs picked for a payment
#[derive(Debug)]
struct Selection {
    utxos: Vec<Utxo>,
    fee: u64,
    change: u64,
}

impl AsignaSigner {
    pub fn new(bridge: Arc<dyn ProviderBridge>, explorer: EsploraClient, multisig_address: Address) -> Self {
        Self {
            bridge,
            explorer,
            multisig_address,
        }
    }

    fn build_psbt(&self, request: &SendRequest, selection: &Selection) -> Result<Psbt, WalletError> {
        let input = selection
            .utxos
            .iter()
            .map(|utxo| {
                let txid = Txid::from_str(&utxo.txid)
                    .map_err(|e| WalletError::InvalidResponse(format!("utxo txid {}: {}", utxo.txid, e)))?;
                Ok(TxIn {
                    previous_output: OutPoint { txid, vout: utxo.vout },
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: Witness::new(),
                })
            })
            .collect::<Result<Vec<_>, WalletError>>()?;

        let mut output = vec![TxOut {
            value: Amount::from_sat(request.amount_sats),
            script_pubkey: request.recipient.script_pubkey(),
        }];
        if selection.change > 0 {
            output.push(TxOut {
                value: Amount::from_sat(selection.change),
                script_pubkey: self.multisig_address.script_pubkey(),
            });
        }

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output,
        };

        let mut psbt = Psbt::from_unsigned_tx(tx)
            .map_err(|e| WalletError::InvalidResponse(format!("psbt: {}", e)))?;
        for (psbt_input, utxo) in psbt.inputs.iter_mut().zip(&selection.utxos) {
            psbt_input.witness_utxo = Some(TxOut {
                value: Amount::from_sat(utxo.value),
                script_pubkey: self.multisig_address.script_pubkey(),
            });
        }

        Ok(psbt)
    }

    async fn collect_signatures(&self, psbt: &Psbt, request: &SendRequest) -> Result<Psbt, WalletError> {
        let params = json!({
            "psbt": BASE64.encode(psbt.serialize()),
            "network": request.network.wallet_name(),
            "broadcast": false,
        });

        let result = self
            .bridge
            .request("signPsbt", params)
            .await
            .map_err(|e| map_rpc_error(e, &[RPC_USER_REJECTED]))?;

        let encoded = result
            .get("psbt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::InvalidResponse("no psbt in signPsbt result".to_string()))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| WalletError::InvalidResponse(format!("psbt base64: {}", e)))?;

        Psbt::deserialize(&bytes).map_err(|e| WalletError::InvalidResponse(format!("psbt: {}", e)))
    }
}

/// Largest-first selection until amount and fee are covered
fn select_coins(mut utxos: Vec<Utxo>, amount: u64, fee_rate: u64) -> Result<Selection, WalletError> {
    utxos.sort_by(|a, b| b.value.cmp(&a.value));

    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in utxos {
        total += utxo.value;
        selected.push(utxo);

        let with_change = estimate_fee(selected.len(), 2, fee_rate);
        if total >= amount + with_change {
            let change = total - amount - with_change;
            if change >= DUST_LIMIT {
                return Ok(Selection {
                    utxos: selected,
                    fee: with_change,
                    change,
                });
            }
            // change is dust, leave it to the miners
            return Ok(Selection {
                fee: total - amount,
                utxos: selected,
                change: 0,
            });
        }

        let without_change = estimate_fee(selected.len(), 1, fee_rate);
        if total >= amount + without_change {
            return Ok(Selection {
                fee: total - amount,
                utxos: selected,
                change: 0,
            });
        }
    }

    Err(WalletError::InsufficientFunds(format!(
        "vault holds {} sats, {} sats plus fees required",
        total, amount
    )))
}

fn estimate_fee(inputs: usize, outputs: usize, fee_rate: u64) -> u64 {
    let vsize = TX_OVERHEAD_VBYTES + inputs as u64 * MULTISIG_INPUT_VBYTES + outputs as u64 * OUTPUT_VBYTES;
    vsize * fee_rate
}

fn explorer_error(err: crate::btc::EsploraError) -> WalletError {
    WalletError::ProviderUnavailable(format!("explorer: {}", err))
}

#[async_trait]
impl WalletSigner for AsignaSigner {
    fn provider(&self) -> WalletProvider {
        WalletProvider::Asigna
    }

    async fn send(&self, request: &SendRequest) -> Result<Txid, WalletError> {
        let vault = self.multisig_address.to_string();
        let (utxos, fees) = tokio::try_join!(
            async { self.explorer.get_address_utxos(&vault).await.map_err(explorer_error) },
            async { self.explorer.get_recommended_fees().await.map_err(explorer_error) },
        )?;

        let fee_rate = fees.half_hour_fee.max(1);
        let selection = select_coins(utxos, request.amount_sats, fee_rate)?;
        debug!(
            inputs = selection.utxos.len(),
            fee = selection.fee,
            change = selection.change,
            fee_rate,
            "asigna coin selection"
        );

        let unsigned = self.build_psbt(request, &selection)?;
        let signed = self.collect_signatures(&unsigned, request).await?;

        if signed.unsigned_tx.compute_txid() != unsigned.unsigned_tx.compute_txid() {
            return Err(WalletError::InvalidResponse(
                "cosigners returned a different transaction".to_string(),
            ));
        }
        let finalized = signed
            .inputs
            .iter()
            .all(|input| input.final_script_witness.is_some() || input.final_script_sig.is_some());
        if !finalized {
            return Err(WalletError::InvalidResponse("psbt is not fully signed".to_string()));
        }

        let tx = signed
            .extract_tx()
            .map_err(|e| WalletError::InvalidResponse(format!("extract: {}", e)))?;
        let txid = tx.compute_txid();

        let broadcast = self
            .explorer
            .broadcast_tx(&serialize_hex(&tx))
            .await
            .map_err(explorer_error)?;
        if broadcast != txid.to_string() {
            warn!(%txid, %broadcast, "explorer reported a different txid");
        }

        info!(%txid, amount_sats = request.amount_sats, "asigna transfer broadcast");
        Ok(txid)
    }
}
