//! Deposit script and address vectors
//!
//! Pins the exact bytes of the deposit and reclaim leaves and the resulting
//! P2TR addresses on every network, and checks the threshold reclaim leaf by
//! running its signature tail against real Schnorr signatures.

use bitcoin::opcodes::all::{OP_CHECKSIG, OP_CHECKSIGADD, OP_CSV, OP_DROP, OP_NUMEQUAL};
use bitcoin::script::Instruction;
use bitcoin::secp256k1::{schnorr, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use bitcoin::{Network, Script};

use sbtc_bridge::{
    build_deposit_script, build_reclaim_script, derive_deposit_address, derive_deposit_output,
    DepositParameters, ScriptError,
};

const AGGREGATE: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
const RECLAIM_A: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";
const RECLAIM_B: &str = "02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9";
const RECLAIM_C: &str = "02e493dbf1c10d80f3581e4904930b1404cc6c13900ee0758474fa94abe8c4cd13";
/// ST2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKQYAC0RQ
const RECIPIENT: &str = "051aa46ff88886c2ef9762d970b4d2c63678835bd39d";

const DEPOSIT_SCRIPT: &str = "1e0000000000000bb8051aa46ff88886c2ef9762d970b4d2c63678835bd39d752079be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798ac";
const RECLAIM_SCRIPT: &str = "029000b27520c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5ac";
const RECLAIM_SCRIPT_2_OF_3: &str = "029000b27520c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5ac20f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9ba20e493dbf1c10d80f3581e4904930b1404cc6c13900ee0758474fa94abe8c4cd13ba529c";

fn key(hex_key: &str) -> Vec<u8> {
    hex::decode(hex_key).unwrap()
}

fn params() -> DepositParameters {
    DepositParameters::single_reclaim(key(AGGREGATE), key(RECIPIENT), 3000, 144, key(RECLAIM_A))
}

#[test]
fn test_deposit_script_vector() {
    let script = build_deposit_script(&key(AGGREGATE), 3000, &key(RECIPIENT)).unwrap();
    assert_eq!(hex::encode(script.as_bytes()), DEPOSIT_SCRIPT);
}

#[test]
fn test_reclaim_script_vectors() {
    let single = build_reclaim_script(144, &[key(RECLAIM_A)], 1).unwrap();
    assert_eq!(hex::encode(single.as_bytes()), RECLAIM_SCRIPT);

    let multi = build_reclaim_script(144, &[key(RECLAIM_A), key(RECLAIM_B), key(RECLAIM_C)], 2).unwrap();
    assert_eq!(hex::encode(multi.as_bytes()), RECLAIM_SCRIPT_2_OF_3);
}

#[test]
fn test_address_vectors() {
    let cases = [
        (Network::Regtest, "bcrt1pjjdp3qx9m78aekr6ang5nn7zuu56nvuk09vyw4xs2egyuqll9l4qvdyfzx"),
        (Network::Testnet, "tb1pjjdp3qx9m78aekr6ang5nn7zuu56nvuk09vyw4xs2egyuqll9l4qp5w0hu"),
        (Network::Signet, "tb1pjjdp3qx9m78aekr6ang5nn7zuu56nvuk09vyw4xs2egyuqll9l4qp5w0hu"),
        (Network::Bitcoin, "bc1pjjdp3qx9m78aekr6ang5nn7zuu56nvuk09vyw4xs2egyuqll9l4qkucqdn"),
    ];
    for (network, expected) in cases {
        assert_eq!(derive_deposit_address(&params(), network).unwrap().to_string(), expected);
    }

    let output = derive_deposit_output(&params(), Network::Regtest).unwrap();
    assert_eq!(
        output.merkle_root_hex().unwrap(),
        "01cba8de035cb55bda99675fa34b30c5efaad1d9caad848656ea905c37da958d"
    );
}

#[test]
fn test_derivation_is_deterministic() {
    let first = derive_deposit_output(&params(), Network::Testnet).unwrap();
    let second = derive_deposit_output(&params(), Network::Testnet).unwrap();
    assert_eq!(first.address, second.address);
    assert_eq!(first.deposit_script, second.deposit_script);
    assert_eq!(first.reclaim_script, second.reclaim_script);

    let mut other = params();
    other.max_fee += 1;
    assert_ne!(
        derive_deposit_address(&other, Network::Testnet).unwrap(),
        first.address
    );
}

#[test]
fn test_invalid_parameters_rejected() {
    let mut bad_key = params();
    bad_key.aggregate_pubkey[0] = 0x05;
    assert!(matches!(
        derive_deposit_address(&bad_key, Network::Regtest),
        Err(ScriptError::InvalidPublicKey(_))
    ));

    assert!(matches!(
        build_reclaim_script(65_536, &[key(RECLAIM_A)], 1),
        Err(ScriptError::LockTimeOutOfRange(65_536))
    ));
    assert!(build_reclaim_script(144, &[], 1).is_err());
    assert!(build_reclaim_script(144, &[key(RECLAIM_A)], 2).is_err());
}

/// Runs the reclaim leaf from its first opcode. `witness` is bottom to top,
/// so the signature for the first key is last. Only the opcodes the reclaim
/// leaf uses are understood.
fn eval_reclaim(script: &Script, witness: Vec<Vec<u8>>, msg: &Message) -> Result<bool, String> {
    let secp = Secp256k1::verification_only();
    let mut stack = witness;

    let verify = |sig: &[u8], key: &[u8]| -> Result<bool, String> {
        if sig.is_empty() {
            return Ok(false);
        }
        let sig = schnorr::Signature::from_slice(sig).map_err(|e| e.to_string())?;
        let key = XOnlyPublicKey::from_slice(key).map_err(|e| e.to_string())?;
        secp.verify_schnorr(&sig, msg, &key)
            .map(|_| true)
            .map_err(|_| "invalid signature".to_string())
    };
    let num = |bytes: &[u8]| -> i64 {
        match bytes {
            [] => 0,
            [n] => *n as i64,
            other => panic!("unexpected number {:?}", other),
        }
    };
    let push_num = |stack: &mut Vec<Vec<u8>>, n: i64| {
        stack.push(if n == 0 { vec![] } else { vec![n as u8] });
    };

    for instruction in script.instructions() {
        match instruction.map_err(|e| e.to_string())? {
            Instruction::PushBytes(bytes) => stack.push(bytes.as_bytes().to_vec()),
            Instruction::Op(op) if op == OP_CSV => {
                stack.last().ok_or("empty stack at CSV")?;
            }
            Instruction::Op(op) if op == OP_DROP => {
                stack.pop().ok_or("empty stack at DROP")?;
            }
            Instruction::Op(op) if op == OP_CHECKSIG => {
                let key = stack.pop().ok_or("missing key")?;
                let sig = stack.pop().ok_or("missing signature")?;
                let valid = verify(&sig, &key)?;
                push_num(&mut stack, valid as i64);
            }
            Instruction::Op(op) if op == OP_CHECKSIGADD => {
                let key = stack.pop().ok_or("missing key")?;
                let n = num(&stack.pop().ok_or("missing counter")?);
                let sig = stack.pop().ok_or("missing signature")?;
                let valid = verify(&sig, &key)?;
                push_num(&mut stack, n + valid as i64);
            }
            Instruction::Op(op) if op == OP_NUMEQUAL => {
                let a = num(&stack.pop().ok_or("missing operand")?);
                let b = num(&stack.pop().ok_or("missing operand")?);
                push_num(&mut stack, (a == b) as i64);
            }
            Instruction::Op(op) if (0x51..=0x60).contains(&op.to_u8()) => {
                push_num(&mut stack, (op.to_u8() - 0x50) as i64);
            }
            Instruction::Op(op) => return Err(format!("unsupported opcode {}", op)),
        }
    }

    Ok(stack.len() == 1 && stack.last().map_or(false, |top| num(top) != 0))
}

#[test]
fn test_threshold_reclaim_needs_two_of_three() {
    let secp = Secp256k1::new();
    // Secret keys 2, 3 and 4 own RECLAIM_A, RECLAIM_B and RECLAIM_C
    let keypairs: Vec<Keypair> = (2u8..=4)
        .map(|n| {
            let mut bytes = [0u8; 32];
            bytes[31] = n;
            Keypair::from_secret_key(&secp, &SecretKey::from_slice(&bytes).unwrap())
        })
        .collect();
    for (pair, expected) in keypairs.iter().zip([RECLAIM_A, RECLAIM_B, RECLAIM_C]) {
        assert_eq!(hex::encode(pair.x_only_public_key().0.serialize()), &expected[2..]);
    }

    let script = build_reclaim_script(144, &[key(RECLAIM_A), key(RECLAIM_B), key(RECLAIM_C)], 2).unwrap();
    let msg = Message::from_digest([7u8; 32]);
    let sign = |i: usize| secp.sign_schnorr_no_aux_rand(&msg, &keypairs[i]).serialize().to_vec();

    // Witness order is C, B, A from bottom to top
    let witness = |signers: [bool; 3]| -> Vec<Vec<u8>> {
        (0..3)
            .rev()
            .map(|i| if signers[i] { sign(i) } else { Vec::new() })
            .collect()
    };

    assert_eq!(eval_reclaim(&script, witness([true, false, false]), &msg), Ok(false));
    assert_eq!(eval_reclaim(&script, witness([false, false, false]), &msg), Ok(false));
    assert_eq!(eval_reclaim(&script, witness([true, true, false]), &msg), Ok(true));
    assert_eq!(eval_reclaim(&script, witness([true, false, true]), &msg), Ok(true));
    assert_eq!(eval_reclaim(&script, witness([false, true, true]), &msg), Ok(true));
    assert_eq!(eval_reclaim(&script, witness([true, true, true]), &msg), Ok(false));

    let wrong_message = Message::from_digest([8u8; 32]);
    assert!(eval_reclaim(&script, witness([true, true, false]), &wrong_message).is_err());
}

#[test]
fn test_single_key_reclaim() {
    let secp = Secp256k1::new();
    let mut bytes = [0u8; 32];
    bytes[31] = 2;
    let keypair = Keypair::from_secret_key(&secp, &SecretKey::from_slice(&bytes).unwrap());

    let script = build_reclaim_script(144, &[key(RECLAIM_A)], 1).unwrap();
    let msg = Message::from_digest([9u8; 32]);
    let sig = secp.sign_schnorr_no_aux_rand(&msg, &keypair).serialize().to_vec();

    assert_eq!(eval_reclaim(&script, vec![sig], &msg), Ok(true));
    assert_eq!(eval_reclaim(&script, vec![Vec::new()], &msg), Ok(false));
}
