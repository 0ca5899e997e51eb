//! Deposit status machine
//!
//! ```text
//! Pending ──► Accepted ──► Confirmed (fulfillment)
//!    │           │
//!    └───────────┴──────► Failed (reclaim signal)
//! ```
//!
//! Transitions only move forward in rank. A poll may skip `Accepted`; a
//! stale poll reporting an earlier status is ignored. `Failed` is entered
//! either because Emily reports it or through [`DepositStatusMachine::fail`],
//! the input for externally detected reclaim conditions.

use serde::Serialize;
use tracing::warn;

use super::TrackerError;
use crate::common::logging::log_status_transition;
use crate::types::{DepositStatus, EmilyDepositRecord, Fulfillment};

/// Why a deposit became reclaim-eligible
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The reclaim path was spent on Bitcoin
    ReclaimBroadcast { reclaim_txid: String },
    /// The reclaim lock time passed without a mint
    LockTimeElapsed { blocks: u64 },
    /// Emily marked the deposit failed
    IndexerReported { message: String },
    External { message: String },
}

/// Emitted once when a deposit enters `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReclaimSignal {
    pub bitcoin_txid: String,
    pub vout: u32,
    pub reason: FailureReason,
}

/// Read-only view of a tracked deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositSnapshot {
    pub bitcoin_txid: String,
    pub vout: u32,
    pub status: DepositStatus,
    pub fulfillment: Option<Fulfillment>,
    /// Bitcoin confirmation depth, when observed
    pub confirmations: Option<u32>,
    pub status_message: Option<String>,
    pub failure: Option<FailureReason>,
}

/// Result of feeding one observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Advanced { from: DepositStatus, to: DepositStatus },
    Failed(ReclaimSignal),
    Unchanged,
    /// Stale or post-terminal observation
    Ignored { current: DepositStatus, observed: DepositStatus },
}

#[derive(Debug, Clone)]
pub struct DepositStatusMachine {
    snapshot: DepositSnapshot,
}

impl DepositStatusMachine {
    pub fn new(bitcoin_txid: impl Into<String>, vout: u32) -> Self {
        Self {
            snapshot: DepositSnapshot {
                bitcoin_txid: bitcoin_txid.into(),
                vout,
                status: DepositStatus::Pending,
                fulfillment: None,
                confirmations: None,
                status_message: None,
                failure: None,
            },
        }
    }

    pub fn status(&self) -> DepositStatus {
        self.snapshot.status
    }

    pub fn is_terminal(&self) -> bool {
        self.snapshot.status.is_terminal()
    }

    pub fn snapshot(&self) -> &DepositSnapshot {
        &self.snapshot
    }

    /// Merge a record polled from Emily
    pub fn apply_record(&mut self, record: &EmilyDepositRecord) -> Result<Transition, TrackerError> {
        if record.bitcoin_txid != self.snapshot.bitcoin_txid
            || record.bitcoin_tx_output_index != self.snapshot.vout
        {
            return Err(TrackerError::OutpointMismatch {
                expected: format!("{}:{}", self.snapshot.bitcoin_txid, self.snapshot.vout),
                got: format!("{}:{}", record.bitcoin_txid, record.bitcoin_tx_output_index),
            });
        }

        let current = self.snapshot.status;
        let observed = record.status;

        if observed == current {
            if !record.status_message.is_empty() {
                self.snapshot.status_message = Some(record.status_message.clone());
            }
            return Ok(Transition::Unchanged);
        }
        if current.is_terminal() || observed.rank() < current.rank() {
            warn!(
                txid = %self.snapshot.bitcoin_txid,
                vout = self.snapshot.vout,
                %current,
                %observed,
                "ignoring stale deposit status"
            );
            return Ok(Transition::Ignored { current, observed });
        }

        if observed == DepositStatus::Failed {
            let reason = FailureReason::IndexerReported {
                message: record.status_message.clone(),
            };
            return Ok(self
                .fail(reason)
                .map(Transition::Failed)
                .unwrap_or(Transition::Unchanged));
        }

        if observed == DepositStatus::Confirmed {
            let fulfillment = record.fulfillment.clone().ok_or_else(|| {
                TrackerError::MissingFulfillment {
                    txid: record.bitcoin_txid.clone(),
                    vout: record.bitcoin_tx_output_index,
                }
            })?;
            self.snapshot.fulfillment = Some(fulfillment);
        }

        self.snapshot.status = observed;
        if !record.status_message.is_empty() {
            self.snapshot.status_message = Some(record.status_message.clone());
        }
        self.log_transition(current, observed);

        Ok(Transition::Advanced {
            from: current,
            to: observed,
        })
    }

    /// Record Bitcoin confirmation depth; never changes the status
    pub fn observe_confirmations(&mut self, confirmations: u32) {
        self.snapshot.confirmations = Some(confirmations);
    }

    /// Move to `Failed`, returning the reclaim signal on the first call from
    /// a non-terminal state
    pub fn fail(&mut self, reason: FailureReason) -> Option<ReclaimSignal> {
        let current = self.snapshot.status;
        if current.is_terminal() {
            return None;
        }

        self.snapshot.status = DepositStatus::Failed;
        self.snapshot.failure = Some(reason.clone());
        self.log_transition(current, DepositStatus::Failed);

        Some(ReclaimSignal {
            bitcoin_txid: self.snapshot.bitcoin_txid.clone(),
            vout: self.snapshot.vout,
            reason,
        })
    }

    fn log_transition(&self, from: DepositStatus, to: DepositStatus) {
        log_status_transition(
            &self.snapshot.bitcoin_txid,
            self.snapshot.vout,
            &from.to_string(),
            &to.to_string(),
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const TXID: &str = "c3b1f5a2d4e6078f9a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f6071";

    pub fn record(status: DepositStatus) -> EmilyDepositRecord {
        EmilyDepositRecord {
            bitcoin_txid: TXID.to_string(),
            bitcoin_tx_output_index: 0,
            recipient: "051aa46ff88886c2ef9762d970b4d2c63678835bd39d".to_string(),
            amount: 100_000,
            last_update_height: 0,
            last_update_block_hash: String::new(),
            status,
            status_message: String::new(),
            parameters: None,
            reclaim_script: String::new(),
            deposit_script: String::new(),
            fulfillment: (status == DepositStatus::Confirmed).then(|| Fulfillment {
                bitcoin_txid: "ab".repeat(32),
                bitcoin_tx_index: 0,
                stacks_txid: "cd".repeat(32),
                bitcoin_block_hash: "ef".repeat(32),
                bitcoin_block_height: 210,
                btc_fee: 2_500,
            }),
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let mut machine = DepositStatusMachine::new(TXID, 0);
        for status in [DepositStatus::Pending, DepositStatus::Accepted, DepositStatus::Confirmed] {
            machine.apply_record(&record(status)).unwrap();
        }

        assert_eq!(machine.status(), DepositStatus::Confirmed);
        assert_eq!(machine.snapshot().fulfillment.as_ref().unwrap().btc_fee, 2_500);
        assert!(machine.is_terminal());
    }

    #[test]
    fn test_skipped_accepted() {
        let mut machine = DepositStatusMachine::new(TXID, 0);
        assert_eq!(machine.apply_record(&record(DepositStatus::Pending)).unwrap(), Transition::Unchanged);
        assert_eq!(
            machine.apply_record(&record(DepositStatus::Confirmed)).unwrap(),
            Transition::Advanced {
                from: DepositStatus::Pending,
                to: DepositStatus::Confirmed
            }
        );
        assert!(machine.snapshot().fulfillment.is_some());
    }

    #[test]
    fn test_regression_is_ignored() {
        let mut machine = DepositStatusMachine::new(TXID, 0);
        machine.apply_record(&record(DepositStatus::Accepted)).unwrap();

        let transition = machine.apply_record(&record(DepositStatus::Pending)).unwrap();
        assert!(matches!(transition, Transition::Ignored { .. }));
        assert_eq!(machine.status(), DepositStatus::Accepted);
    }

    #[test]
    fn test_confirmed_requires_fulfillment() {
        let mut machine = DepositStatusMachine::new(TXID, 0);
        let mut confirmed = record(DepositStatus::Confirmed);
        confirmed.fulfillment = None;

        let err = machine.apply_record(&confirmed).unwrap_err();
        assert!(matches!(err, TrackerError::MissingFulfillment { vout: 0, .. }));
        assert_eq!(machine.status(), DepositStatus::Pending);
    }

    #[test]
    fn test_other_outpoint_rejected() {
        let mut machine = DepositStatusMachine::new(TXID, 1);
        assert!(matches!(
            machine.apply_record(&record(DepositStatus::Accepted)),
            Err(TrackerError::OutpointMismatch { .. })
        ));
    }

    #[test]
    fn test_fail_emits_reclaim_signal_once() {
        let mut machine = DepositStatusMachine::new(TXID, 0);
        machine.apply_record(&record(DepositStatus::Accepted)).unwrap();

        let signal = machine
            .fail(FailureReason::LockTimeElapsed { blocks: 150 })
            .unwrap();
        assert_eq!(signal.bitcoin_txid, TXID);
        assert_eq!(machine.status(), DepositStatus::Failed);

        assert!(machine.fail(FailureReason::External { message: "again".to_string() }).is_none());
        assert!(matches!(
            machine.apply_record(&record(DepositStatus::Confirmed)).unwrap(),
            Transition::Ignored { .. }
        ));
    }

    #[test]
    fn test_cannot_fail_after_confirmed() {
        let mut machine = DepositStatusMachine::new(TXID, 0);
        machine.apply_record(&record(DepositStatus::Confirmed)).unwrap();
        assert!(machine
            .fail(FailureReason::ReclaimBroadcast { reclaim_txid: "ff".repeat(32) })
            .is_none());
        assert_eq!(machine.status(), DepositStatus::Confirmed);
    }

    #[test]
    fn test_indexer_reported_failure() {
        let mut machine = DepositStatusMachine::new(TXID, 0);
        let mut failed = record(DepositStatus::Failed);
        failed.status_message = "reclaimed".to_string();

        match machine.apply_record(&failed).unwrap() {
            Transition::Failed(signal) => assert_eq!(
                signal.reason,
                FailureReason::IndexerReported { message: "reclaimed".to_string() }
            ),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_confirmations_do_not_drive_status() {
        let mut machine = DepositStatusMachine::new(TXID, 0);
        machine.observe_confirmations(12);
        assert_eq!(machine.snapshot().confirmations, Some(12));
        assert_eq!(machine.status(), DepositStatus::Pending);
    }
}
