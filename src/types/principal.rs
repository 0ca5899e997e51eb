//! Stacks principals
//!
//! Parses `ST…`/`SP…` c32check addresses (optionally with a `.contract-name`
//! suffix) and serializes them in the Clarity wire format committed to by the
//! deposit script.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

const C32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Clarity type prefix of a standard principal
const CLARITY_STANDARD_PRINCIPAL: u8 = 0x05;
/// Clarity type prefix of a contract principal
const CLARITY_CONTRACT_PRINCIPAL: u8 = 0x06;

pub const MAINNET_SINGLESIG_VERSION: u8 = 22;
pub const MAINNET_MULTISIG_VERSION: u8 = 20;
pub const TESTNET_SINGLESIG_VERSION: u8 = 26;
pub const TESTNET_MULTISIG_VERSION: u8 = 21;

const MAX_CONTRACT_NAME_LEN: usize = 128;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PrincipalError {
    #[error("address must start with 'S': {0}")]
    MissingPrefix(String),

    #[error("invalid c32 character '{0}'")]
    InvalidCharacter(char),

    #[error("invalid address length")]
    InvalidLength,

    #[error("address checksum mismatch")]
    BadChecksum,

    #[error("invalid contract name: {0}")]
    InvalidContractName(String),

    #[error("invalid clarity principal encoding: {0}")]
    InvalidEncoding(String),
}

/// A standard or contract principal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StacksPrincipal {
    Standard {
        version: u8,
        hash160: [u8; 20],
    },
    Contract {
        version: u8,
        hash160: [u8; 20],
        name: String,
    },
}

impl StacksPrincipal {
    pub fn version(&self) -> u8 {
        match self {
            StacksPrincipal::Standard { version, .. } | StacksPrincipal::Contract { version, .. } => *version,
        }
    }

    pub fn hash160(&self) -> &[u8; 20] {
        match self {
            StacksPrincipal::Standard { hash160, .. } | StacksPrincipal::Contract { hash160, .. } => hash160,
        }
    }

    pub fn is_mainnet(&self) -> bool {
        matches!(
            self.version(),
            MAINNET_SINGLESIG_VERSION | MAINNET_MULTISIG_VERSION
        )
    }

    /// Clarity serialization (`0x05 version hash160` or
    /// `0x06 version hash160 len name`)
    pub fn to_clarity_bytes(&self) -> Vec<u8> {
        match self {
            StacksPrincipal::Standard { version, hash160 } => {
                let mut out = Vec::with_capacity(22);
                out.push(CLARITY_STANDARD_PRINCIPAL);
                out.push(*version);
                out.extend_from_slice(hash160);
                out
            }
            StacksPrincipal::Contract {
                version,
                hash160,
                name,
            } => {
                let mut out = Vec::with_capacity(23 + name.len());
                out.push(CLARITY_CONTRACT_PRINCIPAL);
                out.push(*version);
                out.extend_from_slice(hash160);
                // name length is bounded by MAX_CONTRACT_NAME_LEN
                out.push(name.len() as u8);
                out.extend_from_slice(name.as_bytes());
                out
            }
        }
    }

    /// Parse a Clarity-serialized principal, rejecting trailing bytes
    pub fn from_clarity_bytes(bytes: &[u8]) -> Result<Self, PrincipalError> {
        let (&prefix, rest) = bytes
            .split_first()
            .ok_or_else(|| PrincipalError::InvalidEncoding("empty".to_string()))?;
        if rest.len() < 21 {
            return Err(PrincipalError::InvalidEncoding(format!(
                "{} bytes is too short",
                bytes.len()
            )));
        }

        let version = rest[0];
        if version >= 32 {
            return Err(PrincipalError::InvalidEncoding(format!("version {}", version)));
        }
        let mut hash160 = [0u8; 20];
        hash160.copy_from_slice(&rest[1..21]);

        match prefix {
            CLARITY_STANDARD_PRINCIPAL if rest.len() == 21 => {
                Ok(StacksPrincipal::Standard { version, hash160 })
            }
            CLARITY_CONTRACT_PRINCIPAL => {
                let (&len, name) = rest[21..]
                    .split_first()
                    .ok_or_else(|| PrincipalError::InvalidEncoding("missing name".to_string()))?;
                if name.len() != len as usize {
                    return Err(PrincipalError::InvalidEncoding(
                        "contract name length mismatch".to_string(),
                    ));
                }
                let name = std::str::from_utf8(name)
                    .map_err(|e| PrincipalError::InvalidContractName(e.to_string()))?;
                validate_contract_name(name)?;
                Ok(StacksPrincipal::Contract {
                    version,
                    hash160,
                    name: name.to_string(),
                })
            }
            CLARITY_STANDARD_PRINCIPAL => Err(PrincipalError::InvalidEncoding(
                "trailing bytes after standard principal".to_string(),
            )),
            other => Err(PrincipalError::InvalidEncoding(format!(
                "type prefix 0x{:02x}",
                other
            ))),
        }
    }

    fn address(&self) -> String {
        let version = self.version();
        let mut payload = self.hash160().to_vec();
        payload.extend_from_slice(&checksum(version, self.hash160()));
        format!(
            "S{}{}",
            C32_ALPHABET[version as usize] as char,
            c32_encode(&payload)
        )
    }
}

impl FromStr for StacksPrincipal {
    type Err = PrincipalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (address, name) = match s.split_once('.') {
            Some((address, name)) => (address, Some(name)),
            None => (s, None),
        };

        let body = address
            .strip_prefix('S')
            .ok_or_else(|| PrincipalError::MissingPrefix(s.to_string()))?;
        let mut chars = body.chars();
        let version_char = chars.next().ok_or(PrincipalError::InvalidLength)?;
        let version = c32_value(version_char)?;

        let decoded = c32_decode(chars.as_str())?;
        if decoded.len() != 24 {
            return Err(PrincipalError::InvalidLength);
        }
        let mut hash160 = [0u8; 20];
        hash160.copy_from_slice(&decoded[..20]);
        if decoded[20..] != checksum(version, &hash160) {
            return Err(PrincipalError::BadChecksum);
        }

        match name {
            None => Ok(StacksPrincipal::Standard { version, hash160 }),
            Some(name) => {
                validate_contract_name(name)?;
                Ok(StacksPrincipal::Contract {
                    version,
                    hash160,
                    name: name.to_string(),
                })
            }
        }
    }
}

impl fmt::Display for StacksPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StacksPrincipal::Standard { .. } => write!(f, "{}", self.address()),
            StacksPrincipal::Contract { name, .. } => write!(f, "{}.{}", self.address(), name),
        }
    }
}

fn validate_contract_name(name: &str) -> Result<(), PrincipalError> {
    let starts_with_letter = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic())
        .unwrap_or(false);
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if name.len() > MAX_CONTRACT_NAME_LEN || !starts_with_letter || !valid_chars {
        return Err(PrincipalError::InvalidContractName(name.to_string()));
    }
    Ok(())
}

fn checksum(version: u8, hash160: &[u8; 20]) -> [u8; 4] {
    let mut data = Vec::with_capacity(21);
    data.push(version);
    data.extend_from_slice(hash160);
    let digest = Sha256::digest(Sha256::digest(&data));

    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

fn c32_value(c: char) -> Result<u8, PrincipalError> {
    let normalized = match c.to_ascii_uppercase() {
        'O' => '0',
        'L' | 'I' => '1',
        other => other,
    };
    C32_ALPHABET
        .iter()
        .position(|&a| a as char == normalized)
        .map(|i| i as u8)
        .ok_or(PrincipalError::InvalidCharacter(c))
}

fn c32_encode(input: &[u8]) -> String {
    let mut result: Vec<u8> = Vec::with_capacity(input.len() * 8 / 5 + 1);
    let mut carry: u8 = 0;
    let mut carry_bits: u8 = 0;

    for &byte in input.iter().rev() {
        let low_bits_to_take = 5 - carry_bits;
        let low_bits = byte & ((1 << low_bits_to_take) - 1);
        result.push(C32_ALPHABET[((low_bits << carry_bits) + carry) as usize]);

        carry_bits += 8 - 5;
        carry = byte >> (8 - carry_bits);
        if carry_bits >= 5 {
            result.push(C32_ALPHABET[(carry & 0x1f) as usize]);
            carry_bits -= 5;
            carry >>= 5;
        }
    }
    if carry_bits > 0 {
        result.push(C32_ALPHABET[carry as usize]);
    }

    while result.last() == Some(&C32_ALPHABET[0]) {
        result.pop();
    }
    for _ in input.iter().take_while(|&&b| b == 0) {
        result.push(C32_ALPHABET[0]);
    }

    result.iter().rev().map(|&b| b as char).collect()
}

fn c32_decode(input: &str) -> Result<Vec<u8>, PrincipalError> {
    let digits = input.chars().map(c32_value).collect::<Result<Vec<u8>, _>>()?;

    let mut result = Vec::with_capacity(digits.len() * 5 / 8 + 1);
    let mut carry: u16 = 0;
    let mut carry_bits: u16 = 0;

    for &digit in digits.iter().rev() {
        carry += (digit as u16) << carry_bits;
        carry_bits += 5;
        if carry_bits >= 8 {
            result.push((carry & 0xff) as u8);
            carry_bits -= 8;
            carry >>= 8;
        }
    }
    if carry_bits > 0 {
        result.push(carry as u8);
    }

    while result.last() == Some(&0) {
        result.pop();
    }
    for _ in digits.iter().take_while(|&&d| d == 0) {
        result.push(0);
    }

    result.reverse();
    Ok(result)
}
