//! Bitcoin layer: deposit scripts, address derivation and the explorer client.

pub mod esplora;
pub mod script;
pub mod taproot;

pub use esplora::{EsploraClient, EsploraError, EsploraTx, RecommendedFees, Utxo};
pub use script::{build_deposit_script, build_reclaim_script, build_scripts, ScriptError};
pub use taproot::{derive_deposit_address, derive_deposit_output, DepositOutput, NUMS_INTERNAL_KEY};
