use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::machine::{DepositSnapshot, DepositStatusMachine, FailureReason, ReclaimSignal, Transition};
use super::TrackerError;
use crate::btc::{EsploraClient, EsploraError};
use crate::emily::{EmilyClient, IndexerError};
use crate::types::EmilyDepositRecord;

/// Where deposit records come from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DepositStatusSource: Send + Sync {
    async fn fetch_deposit(&self, txid: &str, vout: u32) -> Result<EmilyDepositRecord, IndexerError>;
}

#[async_trait]
impl DepositStatusSource for EmilyClient {
    async fn fetch_deposit(&self, txid: &str, vout: u32) -> Result<EmilyDepositRecord, IndexerError> {
        self.get_deposit(txid, vout).await
    }
}

/// Bitcoin confirmation depth for a transaction
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfirmationSource: Send + Sync {
    async fn confirmations(&self, txid: &str) -> Result<u32, EsploraError>;
}

#[async_trait]
impl ConfirmationSource for EsploraClient {
    async fn confirmations(&self, txid: &str) -> Result<u32, EsploraError> {
        self.get_confirmations(txid).await
    }
}

/// Periodically polls a deposit and feeds the results to its state machine
pub struct DepositPoller {
    source: Arc<dyn DepositStatusSource>,
    confirmations: Option<Arc<dyn ConfirmationSource>>,
    poll_interval: Duration,
}

/// Handle to a running poller. Dropping it stops the poller.
pub struct PollerHandle {
    snapshots: watch::Receiver<DepositSnapshot>,
    reclaim_rx: mpsc::Receiver<ReclaimSignal>,
    failure_tx: mpsc::Sender<FailureReason>,
    cancel: CancellationToken,
    task: JoinHandle<DepositSnapshot>,
    _stop_on_drop: DropGuard,
}

impl DepositPoller {
    pub fn new(source: Arc<dyn DepositStatusSource>, poll_interval: Duration) -> Self {
        Self {
            source,
            confirmations: None,
            poll_interval,
        }
    }

    pub fn with_confirmations(mut self, source: Arc<dyn ConfirmationSource>) -> Self {
        self.confirmations = Some(source);
        self
    }

    /// Start polling on the current runtime. Cancelling `cancel` stops the
    /// task without applying any in-flight result.
    pub fn spawn(self, machine: DepositStatusMachine, cancel: CancellationToken) -> PollerHandle {
        let (snapshot_tx, snapshots) = watch::channel(machine.snapshot().clone());
        let (reclaim_tx, reclaim_rx) = mpsc::channel(4);
        let (failure_tx, failure_rx) = mpsc::channel(4);

        let task = tokio::spawn(self.run(machine, cancel.clone(), snapshot_tx, reclaim_tx, failure_rx));

        PollerHandle {
            snapshots,
            reclaim_rx,
            failure_tx,
            _stop_on_drop: cancel.clone().drop_guard(),
            cancel,
            task,
        }
    }

    async fn run(
        self,
        mut machine: DepositStatusMachine,
        cancel: CancellationToken,
        snapshot_tx: watch::Sender<DepositSnapshot>,
        reclaim_tx: mpsc::Sender<ReclaimSignal>,
        mut failure_rx: mpsc::Receiver<FailureReason>,
    ) -> DepositSnapshot {
        let txid = machine.snapshot().bitcoin_txid.clone();
        let vout = machine.snapshot().vout;
        info!(%txid, vout, interval_ms = self.poll_interval.as_millis() as u64, "deposit poller started");

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !machine.is_terminal() {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(%txid, vout, "deposit poller cancelled");
                    break;
                }

                Some(reason) = failure_rx.recv() => {
                    if let Some(signal) = machine.fail(reason) {
                        snapshot_tx.send_replace(machine.snapshot().clone());
                        emit_reclaim(&reclaim_tx, signal).await;
                    }
                }

                _ = ticker.tick() => {
                    let observation = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            info!(%txid, vout, "deposit poller cancelled mid-poll");
                            break;
                        }
                        observation = self.poll_once(&txid, vout) => observation,
                    };
                    if cancel.is_cancelled() {
                        break;
                    }

                    if let Some(signal) = apply_observation(&mut machine, observation) {
                        emit_reclaim(&reclaim_tx, signal).await;
                    }
                    snapshot_tx.send_replace(machine.snapshot().clone());
                }
            }
        }

        info!(%txid, vout, status = %machine.status(), "deposit poller stopped");
        machine.snapshot().clone()
    }

    async fn poll_once(&self, txid: &str, vout: u32) -> Observation {
        let record = self.source.fetch_deposit(txid, vout);
        let depth = async {
            match &self.confirmations {
                Some(source) => Some(source.confirmations(txid).await),
                None => None,
            }
        };
        let (record, depth) = tokio::join!(record, depth);
        Observation { record, depth }
    }
}

struct Observation {
    record: Result<EmilyDepositRecord, IndexerError>,
    depth: Option<Result<u32, EsploraError>>,
}

fn apply_observation(machine: &mut DepositStatusMachine, observation: Observation) -> Option<ReclaimSignal> {
    let txid = machine.snapshot().bitcoin_txid.clone();

    match observation.depth {
        Some(Ok(depth)) => machine.observe_confirmations(depth),
        Some(Err(e)) => debug!(%txid, error = %e, "confirmation lookup failed"),
        None => {}
    }

    match observation.record {
        Ok(record) => match machine.apply_record(&record) {
            Ok(Transition::Failed(signal)) => Some(signal),
            Ok(_) => None,
            Err(e) => {
                warn!(%txid, error = %e, "rejected deposit record");
                None
            }
        },
        Err(IndexerError::NotFoundYet { .. }) => {
            debug!(%txid, "deposit not indexed yet");
            None
        }
        Err(e) => {
            warn!(%txid, error = %e, code = e.error_code(), "deposit poll failed");
            None
        }
    }
}

async fn emit_reclaim(reclaim_tx: &mpsc::Sender<ReclaimSignal>, signal: ReclaimSignal) {
    warn!(txid = %signal.bitcoin_txid, vout = signal.vout, reason = ?signal.reason, "deposit is reclaim-eligible");
    if reclaim_tx.send(signal).await.is_err() {
        debug!("reclaim receiver dropped");
    }
}

impl PollerHandle {
    /// Latest published snapshot
    pub fn snapshot(&self) -> DepositSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DepositSnapshot> {
        self.snapshots.clone()
    }

    /// Next reclaim signal, `None` once the poller has stopped
    pub async fn next_reclaim(&mut self) -> Option<ReclaimSignal> {
        self.reclaim_rx.recv().await
    }

    /// Report an externally detected reclaim condition
    pub async fn fail(&self, reason: FailureReason) -> Result<(), TrackerError> {
        self.failure_tx
            .send(reason)
            .await
            .map_err(|_| TrackerError::TaskFailed("poller already stopped".to_string()))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the poller to stop and return the final snapshot
    pub async fn join(self) -> Result<DepositSnapshot, TrackerError> {
        let PollerHandle {
            task,
            _stop_on_drop,
            ..
        } = self;
        task.await
            .map_err(|e| TrackerError::TaskFailed(e.to_string()))
    }
}
