//! Deposit Address Derivation
//!
//! The deposit output commits to both scripts as depth-1 tap leaves under
//! the BIP-341 NUMS point, so the output can only be spent through one of
//! the two script paths:
//!
//! - **Deposit leaf**: the signer set sweeps the funds and mints sBTC
//! - **Reclaim leaf**: the depositor recovers the funds after the lock time

use bitcoin::hashes::Hash;
use bitcoin::key::{Secp256k1, TweakedPublicKey};
use bitcoin::taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo};
use bitcoin::{Address, Network, ScriptBuf, XOnlyPublicKey};

use super::script::{build_scripts, ScriptError};
use crate::types::DepositParameters;

/// lift_x(SHA256(uncompressed G)), a point with no known discrete log
pub const NUMS_INTERNAL_KEY: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a, 0x5e,
    0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80, 0x3a, 0xc0,
];

pub fn nums_internal_key() -> Result<XOnlyPublicKey, ScriptError> {
    XOnlyPublicKey::from_slice(&NUMS_INTERNAL_KEY)
        .map_err(|e| ScriptError::TaprootBuild(format!("NUMS key: {}", e)))
}

/// The committed deposit output and what is needed to spend it later
#[derive(Debug, Clone)]
pub struct DepositOutput {
    pub deposit_script: ScriptBuf,
    pub reclaim_script: ScriptBuf,
    pub spend_info: TaprootSpendInfo,
    pub address: Address,
}

impl DepositOutput {
    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }

    pub fn output_key(&self) -> TweakedPublicKey {
        self.spend_info.output_key()
    }

    pub fn merkle_root_hex(&self) -> Option<String> {
        self.spend_info
            .merkle_root()
            .map(|root| hex::encode(root.to_byte_array()))
    }

    pub fn deposit_control_block(&self) -> Option<ControlBlock> {
        self.spend_info
            .control_block(&(self.deposit_script.clone(), LeafVersion::TapScript))
    }

    pub fn reclaim_control_block(&self) -> Option<ControlBlock> {
        self.spend_info
            .control_block(&(self.reclaim_script.clone(), LeafVersion::TapScript))
    }
}

/// Build both scripts and commit them into one P2TR output for `network`
pub fn derive_deposit_output(
    params: &DepositParameters,
    network: Network,
) -> Result<DepositOutput, ScriptError> {
    let (deposit_script, reclaim_script) = build_scripts(params)?;

    let secp = Secp256k1::verification_only();
    let spend_info = TaprootBuilder::new()
        .add_leaf(1, deposit_script.clone())
        .and_then(|b| b.add_leaf(1, reclaim_script.clone()))
        .map_err(|e| ScriptError::TaprootBuild(e.to_string()))?
        .finalize(&secp, nums_internal_key()?)
        .map_err(|_| ScriptError::TaprootBuild("incomplete tap tree".to_string()))?;

    let address = Address::p2tr_tweaked(spend_info.output_key(), network);

    Ok(DepositOutput {
        deposit_script,
        reclaim_script,
        spend_info,
        address,
    })
}

/// The deposit address for `params` on `network`
pub fn derive_deposit_address(
    params: &DepositParameters,
    network: Network,
) -> Result<Address, ScriptError> {
    derive_deposit_output(params, network).map(|output| output.address)
}

#[cfg(test)]
mod tests {
    use sha2::{Digest, Sha256};

    use super::*;

    fn fixture() -> DepositParameters {
        DepositParameters::single_reclaim(
            hex::decode("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798").unwrap(),
            hex::decode("051aa46ff88886c2ef9762d970b4d2c63678835bd39d").unwrap(),
            3000,
            144,
            hex::decode("02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5").unwrap(),
        )
    }

    #[test]
    fn test_nums_key_is_hash_of_generator() {
        let mut uncompressed = vec![0x04];
        uncompressed.extend_from_slice(&bitcoin::secp256k1::constants::GENERATOR_X);
        uncompressed.extend_from_slice(&bitcoin::secp256k1::constants::GENERATOR_Y);
        let digest: [u8; 32] = Sha256::digest(&uncompressed).into();

        assert_eq!(digest, NUMS_INTERNAL_KEY);
        assert!(nums_internal_key().is_ok());
    }

    #[test]
    fn test_commitment_values() {
        let output = derive_deposit_output(&fixture(), Network::Regtest).unwrap();

        assert_eq!(
            output.merkle_root_hex().unwrap(),
            "01cba8de035cb55bda99675fa34b30c5efaad1d9caad848656ea905c37da958d"
        );
        assert_eq!(
            hex::encode(output.output_key().to_inner().serialize()),
            "949a1880c5df8fdcd87aecd149cfc2e729a9b39679584754d056504e03ff2fea"
        );
        assert_eq!(output.spend_info.internal_key(), nums_internal_key().unwrap());
        assert!(output.deposit_control_block().is_some());
        assert!(output.reclaim_control_block().is_some());
    }

    #[test]
    fn test_network_prefixes() {
        let params = fixture();
        let cases = [
            (Network::Bitcoin, "bc1p"),
            (Network::Testnet, "tb1p"),
            (Network::Signet, "tb1p"),
            (Network::Regtest, "bcrt1p"),
        ];
        for (network, prefix) in cases {
            let address = derive_deposit_address(&params, network).unwrap().to_string();
            assert!(address.starts_with(prefix), "{} for {:?}", address, network);
        }
    }

    #[test]
    fn test_script_pubkey_is_segwit_v1() {
        let output = derive_deposit_output(&fixture(), Network::Bitcoin).unwrap();
        let spk = output.script_pubkey();
        assert!(spk.is_p2tr());
        assert_eq!(&spk.as_bytes()[2..], &output.output_key().to_inner().serialize());
    }

    #[test]
    fn test_invalid_parameters_fail_before_commitment() {
        let mut params = fixture();
        params.threshold = 3;
        assert!(matches!(
            derive_deposit_output(&params, Network::Regtest),
            Err(ScriptError::ThresholdExceedsKeys { .. })
        ));
    }
}
