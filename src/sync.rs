//! Chain tip guard between the Stacks node and Emily
//!
//! Registering a deposit while Emily lags behind the Stacks tip risks the
//! deposit being rejected or misattributed, so the flow only proceeds when
//! both report the same height. Any failure to learn either height counts
//! as "not in sync".

use thiserror::Error;
use tracing::{debug, warn};

use crate::common::logging::{EventCategory, LogEvent, LogLevel};
use crate::emily::{EmilyClient, IndexerError};
use crate::stacks::{StacksClient, StacksError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("stacks node: {0}")]
    Stacks(#[from] StacksError),

    #[error("emily: {0}")]
    Indexer(#[from] IndexerError),

    #[error("emily is out of sync with the network (stacks {stacks_height}, emily {indexer_height})")]
    Mismatch { stacks_height: u64, indexer_height: u64 },
}

impl SyncError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Stacks(e) => e.error_code(),
            SyncError::Indexer(e) => e.error_code(),
            SyncError::Mismatch { .. } => "SYNC_MISMATCH",
        }
    }
}

/// Heights observed by one sync check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub stacks_height: u64,
    pub indexer_height: u64,
}

impl SyncStatus {
    pub fn in_sync(&self) -> bool {
        self.stacks_height == self.indexer_height
    }
}

#[derive(Debug, Clone)]
pub struct BridgeSyncChecker {
    stacks: StacksClient,
    emily: EmilyClient,
}

impl BridgeSyncChecker {
    pub fn new(stacks: StacksClient, emily: EmilyClient) -> Self {
        Self { stacks, emily }
    }

    /// Fetch both heights concurrently
    pub async fn sync_status(&self) -> Result<SyncStatus, SyncError> {
        let (stacks_height, chainstate) = tokio::try_join!(
            async { self.stacks.get_chain_tip_height().await.map_err(SyncError::from) },
            async { self.emily.get_chainstate().await.map_err(SyncError::from) },
        )?;

        let status = SyncStatus {
            stacks_height,
            indexer_height: chainstate.stacks_block_height,
        };
        debug!(
            stacks_height = status.stacks_height,
            indexer_height = status.indexer_height,
            "chain tips fetched"
        );
        Ok(status)
    }

    /// `true` iff Emily has seen the Stacks tip
    pub async fn check_sync(&self) -> Result<bool, SyncError> {
        Ok(self.sync_status().await?.in_sync())
    }

    /// Like [`check_sync`](Self::check_sync) but turns a mismatch into an error
    pub async fn ensure_synced(&self) -> Result<SyncStatus, SyncError> {
        let status = self.sync_status().await?;
        if status.in_sync() {
            return Ok(status);
        }

        warn!(
            stacks_height = status.stacks_height,
            indexer_height = status.indexer_height,
            "emily is out of sync"
        );
        LogEvent::new(LogLevel::Warn, EventCategory::Sync, "sync_mismatch")
            .with_data(serde_json::json!({
                "stacks_height": status.stacks_height,
                "indexer_height": status.indexer_height,
            }))
            .with_error("SYNC_MISMATCH", "chain tips disagree")
            .emit();

        Err(SyncError::Mismatch {
            stacks_height: status.stacks_height,
            indexer_height: status.indexer_height,
        })
    }
}
