//! sBTC bridge client
//!
//! Client side of an sBTC peg-in:
//!
//! 1. **Scripts and address** - deposit and reclaim tap leaves under an
//!    unspendable internal key ([`btc::script`], [`btc::taproot`])
//! 2. **Sync guard** - Emily must have seen the Stacks tip ([`sync`])
//! 3. **Wallets** - Leather, Xverse, Fordefi and Asigna behind one
//!    [`wallet::WalletSigner`] trait
//! 4. **Registration** - the broadcast outpoint is submitted to Emily
//!    ([`emily`], [`deposit_flow`])
//! 5. **Tracking** - the deposit is polled until minted or reclaim-eligible
//!    ([`deposit_tracker`])
//!
//! All outbound HTTP goes through [`http::ResilientHttpClient`].

pub mod btc;
pub mod common;
pub mod deposit_flow;
pub mod deposit_tracker;
pub mod emily;
pub mod http;
pub mod stacks;
pub mod sync;
pub mod types;
pub mod wallet;

// Re-exports: configuration and errors
pub use common::{BridgeConfig, BridgeError, BridgeNetwork, Result};

// Re-exports: scripts and address
pub use btc::{
    build_deposit_script, build_reclaim_script, derive_deposit_address, derive_deposit_output,
    DepositOutput, EsploraClient, ScriptError,
};

// Re-exports: deposit flow
pub use deposit_flow::{DepositFlow, DepositFlowError, DepositReceipt, DepositRequest, PreparedDeposit};

// Re-exports: tracking
pub use deposit_tracker::{
    DepositPoller, DepositSnapshot, DepositStatusMachine, FailureReason, PollerHandle, ReclaimSignal,
    TrackerError,
};

pub use emily::{EmilyClient, IndexerError};
pub use http::{HttpError, ResilientHttpClient, RetryPolicy};
pub use stacks::StacksClient;
pub use sync::{BridgeSyncChecker, SyncError, SyncStatus};
pub use types::{DepositParameters, DepositStatus, EmilyDepositRecord, StacksPrincipal};
pub use wallet::{create_signer, WalletContext, WalletError, WalletProvider, WalletSigner};
