//! Deposit and Reclaim Scripts
//!
//! Both scripts are pure functions of the deposit parameters: identical
//! inputs give byte-identical scripts, which is what lets Emily and the
//! signer set recompute the deposit address independently.
//!
//! ```text
//! deposit:  <max_fee:8 BE || recipient> OP_DROP <aggregate_xonly> OP_CHECKSIG
//! reclaim:  <lock_time> OP_CSV OP_DROP <k1> OP_CHECKSIG
//!           [<k2> OP_CHECKSIGADD ... <kN> OP_CHECKSIGADD <m> OP_NUMEQUAL]
//! ```

use bitcoin::opcodes::all::{OP_CHECKSIG, OP_CHECKSIGADD, OP_CSV, OP_DROP, OP_NUMEQUAL};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::PublicKey;
use bitcoin::{ScriptBuf, XOnlyPublicKey};
use thiserror::Error;

use crate::types::{DepositParameters, StacksPrincipal};

/// Largest relative lock time expressible in the BIP-68 block field
pub const MAX_LOCK_TIME: u32 = u16::MAX as u32;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("invalid compressed public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("at least one reclaim key is required")]
    EmptyReclaimKeys,

    #[error("threshold {threshold} exceeds the {keys} reclaim keys")]
    ThresholdExceedsKeys { threshold: usize, keys: usize },

    #[error("threshold must be at least 1")]
    ZeroThreshold,

    #[error("lock time {0} exceeds {MAX_LOCK_TIME} blocks")]
    LockTimeOutOfRange(u32),

    #[error("failed to build taproot tree: {0}")]
    TaprootBuild(String),
}

/// Parse a 33-byte compressed secp256k1 point into its x-only form
pub fn parse_compressed_key(bytes: &[u8]) -> Result<XOnlyPublicKey, ScriptError> {
    if bytes.len() != 33 {
        return Err(ScriptError::InvalidPublicKey(format!(
            "expected 33 bytes, got {}",
            bytes.len()
        )));
    }
    let key = PublicKey::from_slice(bytes)
        .map_err(|e| ScriptError::InvalidPublicKey(format!("{}: {}", hex::encode(bytes), e)))?;

    Ok(key.x_only_public_key().0)
}

/// Build the script the signer set spends to mint sBTC
pub fn build_deposit_script(
    aggregate_pubkey: &[u8],
    max_fee: u64,
    recipient: &[u8],
) -> Result<ScriptBuf, ScriptError> {
    let aggregate = parse_compressed_key(aggregate_pubkey)?;
    if recipient.is_empty() {
        return Err(ScriptError::InvalidRecipient("empty".to_string()));
    }
    StacksPrincipal::from_clarity_bytes(recipient)
        .map_err(|e| ScriptError::InvalidRecipient(e.to_string()))?;

    let mut data = Vec::with_capacity(8 + recipient.len());
    data.extend_from_slice(&max_fee.to_be_bytes());
    data.extend_from_slice(recipient);
    let data = PushBytesBuf::try_from(data)
        .map_err(|e| ScriptError::InvalidRecipient(e.to_string()))?;

    Ok(Builder::new()
        .push_slice(data)
        .push_opcode(OP_DROP)
        .push_x_only_key(&aggregate)
        .push_opcode(OP_CHECKSIG)
        .into_script())
}

/// Build the depositor's fallback path, spendable after `lock_time` blocks
/// by `threshold` of the reclaim keys
pub fn build_reclaim_script(
    lock_time: u32,
    reclaim_pubkeys: &[Vec<u8>],
    threshold: usize,
) -> Result<ScriptBuf, ScriptError> {
    if lock_time > MAX_LOCK_TIME {
        return Err(ScriptError::LockTimeOutOfRange(lock_time));
    }
    if reclaim_pubkeys.is_empty() {
        return Err(ScriptError::EmptyReclaimKeys);
    }
    if threshold == 0 {
        return Err(ScriptError::ZeroThreshold);
    }
    if threshold > reclaim_pubkeys.len() {
        return Err(ScriptError::ThresholdExceedsKeys {
            threshold,
            keys: reclaim_pubkeys.len(),
        });
    }

    let keys = reclaim_pubkeys
        .iter()
        .map(|k| parse_compressed_key(k))
        .collect::<Result<Vec<_>, _>>()?;

    let mut builder = Builder::new()
        .push_int(lock_time as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP);

    for (i, key) in keys.iter().enumerate() {
        builder = builder.push_x_only_key(key).push_opcode(if i == 0 {
            OP_CHECKSIG
        } else {
            OP_CHECKSIGADD
        });
    }
    if keys.len() > 1 {
        builder = builder.push_int(threshold as i64).push_opcode(OP_NUMEQUAL);
    }

    Ok(builder.into_script())
}

/// Both scripts of a deposit, validated together
pub fn build_scripts(params: &DepositParameters) -> Result<(ScriptBuf, ScriptBuf), ScriptError> {
    let deposit = build_deposit_script(&params.aggregate_pubkey, params.max_fee, &params.recipient)?;
    let reclaim = build_reclaim_script(params.lock_time, &params.reclaim_pubkeys, params.threshold)?;
    Ok((deposit, reclaim))
}
