//! Deposit tracking
//!
//! A registered deposit is followed through Emily until the signers mint
//! sBTC (`Confirmed`) or it becomes reclaim-eligible (`Failed`).
//! [`DepositStatusMachine`] owns the transition rules; [`DepositPoller`]
//! drives it on an interval and publishes snapshots.

mod machine;
mod poller;

use thiserror::Error;

pub use machine::{
    DepositSnapshot, DepositStatusMachine, FailureReason, ReclaimSignal, Transition,
};
pub use poller::{ConfirmationSource, DepositPoller, DepositStatusSource, PollerHandle};

#[cfg(test)]
pub use poller::{MockConfirmationSource, MockDepositStatusSource};

#[derive(Debug, Error)]
pub enum TrackerError {
    /// Emily reported `confirmed` without mint details
    #[error("deposit {txid}:{vout} confirmed without fulfillment")]
    MissingFulfillment { txid: String, vout: u32 },

    #[error("record for {got} does not match tracked deposit {expected}")]
    OutpointMismatch { expected: String, got: String },

    #[error("poller task failed: {0}")]
    TaskFailed(String),
}
