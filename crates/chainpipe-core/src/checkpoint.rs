//! Checkpoint tracking: persists the pipeline's progress for crash recovery.
//!
//! Completed transactions advance an in-memory [`BlockMarker`]. The
//! [`CheckpointTracker`] copies the marker into durable storage on a fixed
//! interval, independent of transaction throughput. On restart the pipeline
//! resumes from the last saved checkpoint instead of from scratch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::PipelineError;
use crate::store::{Filter, FindOptions, PersistentStore, PK_FIELD};

/// Collection holding pipeline status documents.
pub const STATUS_COLLECTION: &str = "status";

/// Well-known key of the checkpoint document.
pub const CHECKPOINT_KEY: &str = "last_block";

/// A persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Highest block known to be fully processed.
    pub block_number: u64,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

/// Trait for storing and loading the checkpoint.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the saved checkpoint (`None` if none exists).
    async fn load(&self) -> Result<Option<Checkpoint>, PipelineError>;

    /// Save (upsert) the checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), PipelineError>;
}

/// Checkpoint kept as a single document in a [`PersistentStore`].
pub struct StoreCheckpoints {
    store: Arc<dyn PersistentStore>,
}

impl StoreCheckpoints {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    fn key_filter() -> Filter {
        Filter::new().eq(PK_FIELD, CHECKPOINT_KEY)
    }
}

#[async_trait]
impl CheckpointStore for StoreCheckpoints {
    async fn load(&self) -> Result<Option<Checkpoint>, PipelineError> {
        let rows = self
            .store
            .find(STATUS_COLLECTION, &Self::key_filter(), &FindOptions::new().limit(1))
            .await?;
        match rows.into_iter().next() {
            None => Ok(None),
            Some(doc) => serde_json::from_value(doc)
                .map(Some)
                .map_err(|e| PipelineError::Storage(format!("can not decode checkpoint; {e}"))),
        }
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), PipelineError> {
        let doc = json!({
            PK_FIELD: CHECKPOINT_KEY,
            "block_number": checkpoint.block_number,
            "updated_at": checkpoint.updated_at,
        });
        self.store
            .upsert(STATUS_COLLECTION, &Self::key_filter(), doc)
            .await
    }
}

// ─── BlockMarker ──────────────────────────────────────────────────────────────

/// In-memory "last processed block" marker.
///
/// Persistence tasks may finish out of order, so the marker only ever moves
/// forward.
#[derive(Debug, Default)]
pub struct BlockMarker(AtomicU64);

impl BlockMarker {
    pub fn new(block: u64) -> Self {
        Self(AtomicU64::new(block))
    }

    /// Move the marker to `block` unless it already points further.
    pub fn advance(&self, block: u64) {
        self.0.fetch_max(block, Ordering::AcqRel);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

// ─── CheckpointTracker ────────────────────────────────────────────────────────

/// Periodically writes the [`BlockMarker`] to a [`CheckpointStore`].
pub struct CheckpointTracker {
    store: Arc<dyn CheckpointStore>,
    marker: Arc<BlockMarker>,
    interval: Duration,
    /// Highest block already written; writes never go below it.
    saved: u64,
}

impl CheckpointTracker {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        marker: Arc<BlockMarker>,
        interval: Duration,
        saved: u64,
    ) -> Self {
        Self {
            store,
            marker,
            interval,
            saved,
        }
    }

    /// Highest block written so far.
    pub fn saved(&self) -> u64 {
        self.saved
    }

    /// Write the marker if it moved past the last saved checkpoint.
    ///
    /// Returns `Ok(true)` when a checkpoint was written.
    pub async fn tick(&mut self) -> Result<bool, PipelineError> {
        let lsb = self.marker.get();
        if lsb <= self.saved {
            debug!(block = lsb, saved = self.saved, "checkpoint unchanged");
            return Ok(false);
        }

        info!(block = lsb, "last seen block");
        self.store
            .save(Checkpoint {
                block_number: lsb,
                updated_at: chrono::Utc::now().timestamp(),
            })
            .await?;
        self.saved = lsb;
        Ok(true)
    }

    /// Tick until `stop` is cancelled, then write one final checkpoint.
    ///
    /// Write failures are logged and retried on the next tick. The tracker is
    /// handed back so the owner can flush again after work drains.
    pub async fn run(mut self, stop: CancellationToken) -> Self {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of a tokio interval completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "could not update last seen block");
                    }
                }
            }
        }

        if let Err(e) = self.tick().await {
            error!(error = %e, "could not write final checkpoint");
        }
        info!(block = self.saved, "checkpoint tracker stopped");
        self
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
