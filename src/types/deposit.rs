//! Deposit Types
//!
//! Protocol parameters of one deposit attempt, the lifecycle status, and the
//! Emily wire records (camelCase JSON).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Inputs to the deposit and reclaim scripts.
///
/// Keys are kept as raw bytes; the script builder validates them, so a
/// malformed key is reported as a script parameter error before any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositParameters {
    /// Signer set aggregate key, 33-byte compressed point
    pub aggregate_pubkey: Vec<u8>,
    /// Clarity-serialized recipient principal
    pub recipient: Vec<u8>,
    /// Max fee the signers may deduct, in sats
    pub max_fee: u64,
    /// Reclaim relative lock time, in blocks
    pub lock_time: u32,
    /// Reclaim keys in script order, 33-byte compressed points
    pub reclaim_pubkeys: Vec<Vec<u8>>,
    /// Number of reclaim signatures required
    pub threshold: usize,
}

impl DepositParameters {
    /// Parameters with a single reclaim key (the depositor's own)
    pub fn single_reclaim(
        aggregate_pubkey: Vec<u8>,
        recipient: Vec<u8>,
        max_fee: u64,
        lock_time: u32,
        reclaim_pubkey: Vec<u8>,
    ) -> Self {
        Self {
            aggregate_pubkey,
            recipient,
            max_fee,
            lock_time,
            reclaim_pubkeys: vec![reclaim_pubkey],
            threshold: 1,
        }
    }
}

/// Status of a deposit as seen by the bridge
///
/// pending → accepted → confirmed, or failed from any non-terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    /// Registered, not yet picked up by the signers
    #[serde(alias = "reprocessing")]
    Pending,
    /// Accepted by the signers for sweeping
    Accepted,
    /// sBTC minted
    Confirmed,
    /// Reclaim-eligible
    Failed,
}

impl Default for DepositStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl DepositStatus {
    /// Position in the lifecycle; transitions never decrease it
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Accepted => 1,
            Self::Confirmed | Self::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DepositStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" | "reprocessing" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown status: {}", s)),
        }
    }
}

/// Protocol parameters echoed back by Emily
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositProtocolParameters {
    pub max_fee: u64,
    pub lock_time: u32,
}

/// Proof that a deposit was honored
///
/// Older Emily deployments send PascalCase keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fulfillment {
    #[serde(alias = "BitcoinTxid")]
    pub bitcoin_txid: String,
    #[serde(alias = "BitcoinTxIndex")]
    pub bitcoin_tx_index: u32,
    #[serde(alias = "StacksTxid")]
    pub stacks_txid: String,
    #[serde(alias = "BitcoinBlockHash")]
    pub bitcoin_block_hash: String,
    #[serde(alias = "BitcoinBlockHeight")]
    pub bitcoin_block_height: u64,
    #[serde(alias = "BtcFee")]
    pub btc_fee: u64,
}

/// Emily's view of one deposit outpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmilyDepositRecord {
    pub bitcoin_txid: String,
    pub bitcoin_tx_output_index: u32,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub last_update_height: u64,
    #[serde(default)]
    pub last_update_block_hash: String,
    pub status: DepositStatus,
    #[serde(default)]
    pub status_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<DepositProtocolParameters>,
    #[serde(default)]
    pub reclaim_script: String,
    #[serde(default)]
    pub deposit_script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment: Option<Fulfillment>,
}

/// Body of `POST /deposit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDepositRequest {
    pub bitcoin_txid: String,
    pub bitcoin_tx_output_index: u32,
    /// Hex
    pub reclaim_script: String,
    /// Hex
    pub deposit_script: String,
}

/// Body of `GET /chainstate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainState {
    #[serde(alias = "settlementBlockHeight")]
    pub stacks_block_height: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacks_block_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_rank_order() {
        assert!(DepositStatus::Pending.rank() < DepositStatus::Accepted.rank());
        assert!(DepositStatus::Accepted.rank() < DepositStatus::Confirmed.rank());
        assert!(DepositStatus::Confirmed.is_terminal());
        assert!(DepositStatus::Failed.is_terminal());
        assert!(!DepositStatus::Accepted.is_terminal());
        assert_eq!("reprocessing".parse::<DepositStatus>().unwrap(), DepositStatus::Pending);
    }

    #[test]
    fn test_confirmed_record_with_pascal_case_fulfillment() {
        let json = r#"{
            "bitcoinTxid": "aa",
            "bitcoinTxOutputIndex": 0,
            "recipient": "051a00",
            "amount": 100000,
            "lastUpdateHeight": 120,
            "lastUpdateBlockHash": "bb",
            "status": "confirmed",
            "statusMessage": "minted",
            "parameters": {"maxFee": 80000, "lockTime": 144},
            "reclaimScript": "cc",
            "depositScript": "dd",
            "fulfillment": {
                "BitcoinTxid": "ee",
                "BitcoinTxIndex": 1,
                "StacksTxid": "ff",
                "BitcoinBlockHash": "11",
                "BitcoinBlockHeight": 200,
                "BtcFee": 1500
            }
        }"#;

        let record: EmilyDepositRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, DepositStatus::Confirmed);
        assert_eq!(record.parameters.unwrap().lock_time, 144);
        let fulfillment = record.fulfillment.unwrap();
        assert_eq!(fulfillment.stacks_txid, "ff");
        assert_eq!(fulfillment.btc_fee, 1500);
    }

    #[test]
    fn test_chainstate_accepts_both_field_names() {
        let a: ChainState = serde_json::from_str(r#"{"stacksBlockHeight": 100}"#).unwrap();
        let b: ChainState = serde_json::from_str(r#"{"settlementBlockHeight": 100}"#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_create_request_wire_names() {
        let req = CreateDepositRequest {
            bitcoin_txid: "aa".to_string(),
            bitcoin_tx_output_index: 1,
            reclaim_script: "bb".to_string(),
            deposit_script: "cc".to_string(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["bitcoinTxOutputIndex"], 1);
        assert_eq!(value["reclaimScript"], "bb");
    }
}
