//! Environment-based Configuration for the sBTC bridge client
//!
//! The configuration is loaded once at startup and then passed around as an
//! immutable value; nothing in the core reads the environment on its own.
//!
//! # Environment Variables
//!
//! ## Network Configuration
//! - `WALLET_NETWORK` - "mainnet", "testnet", "testnet4", "signet", "sbtcTestnet",
//!   "devnet" or "sbtcDevenv" (default: "devnet")
//! - `EMILY_URL` - Emily bridge indexer endpoint
//! - `STACKS_API_URL` - Stacks node / API endpoint
//! - `MEMPOOL_API_URL` - Bitcoin explorer (mempool/esplora) API endpoint
//!
//! ## sBTC Protocol
//! - `SBTC_CONTRACT_DEPLOYER` - Deployer of the sBTC contracts
//! - `RECLAIM_LOCK_TIME` - Reclaim relative lock time in blocks (default: 144)
//! - `DEPOSIT_MAX_FEE` - Max fee the signers may take from a deposit, in sats
//!
//! ## Optional Settings
//! - `POLLING_INTERVAL` - Deposit status polling interval in milliseconds
//! - `HTTP_MAX_ATTEMPTS` / `HTTP_BASE_DELAY_MS` / `HTTP_TIMEOUT_SECS` - retry policy
//! - `LOG_LEVEL` - Logging level (debug, info, warn, error)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::{Backoff, ExponentialBackoff, RetryPolicy};

/// Default reclaim lock time: 144 blocks, about one day
pub const DEFAULT_RECLAIM_LOCK_TIME: u32 = 144;

/// Default max fee the signer set may deduct from a deposit
pub const DEFAULT_DEPOSIT_MAX_FEE: u64 = 80_000;

/// Default polling interval for deposit status
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 10_000;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Network the bridge client operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeNetwork {
    Mainnet,
    Testnet,
    Signet,
    Devnet,
}

impl FromStr for BridgeNetwork {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(BridgeNetwork::Mainnet),
            "testnet" | "testnet4" | "sbtctestnet" | "test" => Ok(BridgeNetwork::Testnet),
            "signet" => Ok(BridgeNetwork::Signet),
            "devnet" | "sbtcdevenv" | "regtest" | "dev" => Ok(BridgeNetwork::Devnet),
            _ => Err(ConfigError::InvalidValue(
                "WALLET_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl fmt::Display for BridgeNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wallet_name())
    }
}

impl BridgeNetwork {
    /// Bitcoin network used for address encoding
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            BridgeNetwork::Mainnet => bitcoin::Network::Bitcoin,
            BridgeNetwork::Testnet => bitcoin::Network::Testnet,
            BridgeNetwork::Signet => bitcoin::Network::Signet,
            BridgeNetwork::Devnet => bitcoin::Network::Regtest,
        }
    }

    /// Network name understood by browser wallet providers
    pub fn wallet_name(&self) -> &'static str {
        match self {
            BridgeNetwork::Mainnet => "mainnet",
            BridgeNetwork::Testnet => "testnet",
            BridgeNetwork::Signet => "signet",
            BridgeNetwork::Devnet => "devnet",
        }
    }

    /// Whether Stacks addresses on this network use the mainnet versions
    pub fn is_stacks_mainnet(&self) -> bool {
        matches!(self, BridgeNetwork::Mainnet)
    }

    /// Get default Stacks API for this network
    pub fn default_stacks_api(&self) -> &'static str {
        match self {
            BridgeNetwork::Mainnet => "https://api.hiro.so",
            BridgeNetwork::Testnet | BridgeNetwork::Signet => "https://api.testnet.hiro.so",
            BridgeNetwork::Devnet => "http://localhost:3999",
        }
    }

    /// Get default mempool/esplora API for this network
    pub fn default_mempool_api(&self) -> &'static str {
        match self {
            BridgeNetwork::Mainnet => "https://mempool.space/api",
            BridgeNetwork::Testnet => "https://mempool.space/testnet4/api",
            BridgeNetwork::Signet => "https://mempool.space/signet/api",
            BridgeNetwork::Devnet => "http://localhost:8083/api",
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Network environment
    pub network: BridgeNetwork,

    /// Emily bridge indexer endpoint
    pub emily_url: String,

    /// Stacks API endpoint
    pub stacks_api_url: String,

    /// Bitcoin explorer API endpoint
    pub mempool_api_url: String,

    /// Deployer address of the sBTC contracts
    pub sbtc_contract_deployer: String,

    /// Reclaim relative lock time, in blocks
    pub reclaim_lock_time: u32,

    /// Max fee committed in the deposit script, in sats
    pub deposit_max_fee: u64,

    /// Interval between deposit status polls
    pub polling_interval: Duration,

    /// Retry policy shared by every HTTP client
    pub retry_policy: RetryPolicy,

    /// Log level
    pub log_level: String,
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let network: BridgeNetwork = env::var("WALLET_NETWORK")
            .unwrap_or_else(|_| "devnet".to_string())
            .parse()?;

        let emily_url = get_required_or_devnet_default("EMILY_URL", "http://localhost:3031", network)?;

        let stacks_api_url = env::var("STACKS_API_URL")
            .unwrap_or_else(|_| network.default_stacks_api().to_string());

        let mempool_api_url = env::var("MEMPOOL_API_URL")
            .unwrap_or_else(|_| network.default_mempool_api().to_string());

        let sbtc_contract_deployer = get_required_or_devnet_default(
            "SBTC_CONTRACT_DEPLOYER",
            "SN3R84XZYA63QS28932XQF3G1J8R9PC3W76P9CSQS",
            network,
        )?;

        let reclaim_lock_time = parse_or_default("RECLAIM_LOCK_TIME", DEFAULT_RECLAIM_LOCK_TIME)?;
        let deposit_max_fee = parse_or_default("DEPOSIT_MAX_FEE", DEFAULT_DEPOSIT_MAX_FEE)?;
        let polling_interval = Duration::from_millis(parse_or_default(
            "POLLING_INTERVAL",
            DEFAULT_POLLING_INTERVAL_MS,
        )?);

        let defaults = RetryPolicy::default();
        let retry_policy = RetryPolicy {
            max_attempts: parse_or_default("HTTP_MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff: ExponentialBackoff::new(
                parse_or_default("HTTP_BASE_DELAY_MS", defaults.backoff.base_delay_ms())?,
                15,
                10,
            ),
            request_timeout: Duration::from_secs(parse_or_default(
                "HTTP_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
        };

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let config = Self {
            network,
            emily_url: emily_url.trim_end_matches('/').to_string(),
            stacks_api_url: stacks_api_url.trim_end_matches('/').to_string(),
            mempool_api_url: mempool_api_url.trim_end_matches('/').to_string(),
            sbtc_contract_deployer,
            reclaim_lock_time,
            deposit_max_fee,
            polling_interval,
            retry_policy,
            log_level,
        };
        config.validate()?;

        Ok(config)
    }

    /// Default devnet configuration (local sBTC devenv)
    pub fn devnet() -> Self {
        let network = BridgeNetwork::Devnet;
        Self {
            network,
            emily_url: "http://localhost:3031".to_string(),
            stacks_api_url: network.default_stacks_api().to_string(),
            mempool_api_url: network.default_mempool_api().to_string(),
            sbtc_contract_deployer: "SN3R84XZYA63QS28932XQF3G1J8R9PC3W76P9CSQS".to_string(),
            reclaim_lock_time: DEFAULT_RECLAIM_LOCK_TIME,
            deposit_max_fee: DEFAULT_DEPOSIT_MAX_FEE,
            polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            retry_policy: RetryPolicy::default(),
            log_level: "info".to_string(),
        }
    }

    /// Check value ranges that the environment parser cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reclaim_lock_time == 0 || self.reclaim_lock_time > u16::MAX as u32 {
            return Err(ConfigError::InvalidValue(
                "RECLAIM_LOCK_TIME".to_string(),
                format!("{} is outside 1..=65535 blocks", self.reclaim_lock_time),
            ));
        }

        if self.retry_policy.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "HTTP_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        if self.polling_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "POLLING_INTERVAL".to_string(),
                "must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Human readable summary of the effective settings
    pub fn summary(&self) -> String {
        [
            "=== sBTC Bridge Configuration ===".to_string(),
            format!("Network: {}", self.network),
            format!("Emily: {}", self.emily_url),
            format!("Stacks API: {}", self.stacks_api_url),
            format!("Mempool API: {}", self.mempool_api_url),
            format!("sBTC Deployer: {}", self.sbtc_contract_deployer),
            format!("Reclaim Lock Time: {} blocks", self.reclaim_lock_time),
            format!("Deposit Max Fee: {} sats", self.deposit_max_fee),
            format!("Polling Interval: {:?}", self.polling_interval),
            format!("Log Level: {}", self.log_level),
            "=================================".to_string(),
        ]
        .join("\n")
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("{}", self.summary());
    }
}

/// Get required env var, or use default for devnet only
fn get_required_or_devnet_default(
    var_name: &str,
    devnet_default: &str,
    network: BridgeNetwork,
) -> Result<String, ConfigError> {
    match env::var(var_name) {
        Ok(value) => Ok(value),
        Err(_) => {
            if network == BridgeNetwork::Devnet {
                Ok(devnet_default.to_string())
            } else {
                Err(ConfigError::MissingEnvVar(var_name.to_string()))
            }
        }
    }
}

fn parse_or_default<T: FromStr>(var_name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var_name) {
        Ok(value) => value.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(var_name.to_string(), format!("cannot parse '{}'", value))
        }),
        Err(_) => Ok(default),
    }
}
