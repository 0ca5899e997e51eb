//! Shared Types Module
//!
//! Data types shared across the bridge client.

pub mod deposit;
pub mod principal;
pub mod units;

pub use deposit::{
    ChainState, CreateDepositRequest, DepositParameters, DepositProtocolParameters,
    DepositStatus, EmilyDepositRecord, Fulfillment,
};
pub use principal::{PrincipalError, StacksPrincipal};
pub use units::{parse_btc, parse_sats, sats_to_btc_string, sats_to_display, SATS_PER_BTC};
