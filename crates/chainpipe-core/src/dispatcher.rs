//! Transaction dispatcher: fans each transaction out to the account and log
//! queues, then commits it once every derived unit is done.

use alloy_primitives::B256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accounts::{derive_touches, AccountWork};
use crate::barrier::{BarrierOutcome, CompletionBarrier};
use crate::checkpoint::BlockMarker;
use crate::error::PipelineError;
use crate::logs::LogWork;
use crate::records::TransactionRecord;
use crate::stats::PipelineStats;
use crate::store::{Document, Filter, ObjectCache, PersistentStore};
use crate::types::{Block, IngestionEvent, Transaction};

/// Running estimate of the number of stored transactions.
#[derive(Debug, Default)]
pub struct TrxCountEstimate(AtomicU64);

impl TrxCountEstimate {
    pub fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Cache key of a committed transaction record.
pub fn trx_cache_key(hash: &B256) -> String {
    hash.to_string()
}

// ─── Committer ────────────────────────────────────────────────────────────────

/// Everything the detached commit step writes to.
#[derive(Clone)]
pub struct Committer {
    store: Arc<dyn PersistentStore>,
    cache: Arc<dyn ObjectCache>,
    marker: Arc<BlockMarker>,
    estimate: Arc<TrxCountEstimate>,
    stats: Arc<PipelineStats>,
}

impl Committer {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        cache: Arc<dyn ObjectCache>,
        marker: Arc<BlockMarker>,
        estimate: Arc<TrxCountEstimate>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            store,
            cache,
            marker,
            estimate,
            stats,
        }
    }

    /// Wait for the barrier, then store, count, cache and mark the block.
    async fn commit(
        self,
        block: Arc<Block>,
        trx: Arc<Transaction>,
        barrier: CompletionBarrier,
        _permit: OwnedSemaphorePermit,
    ) {
        if barrier.wait().await == BarrierOutcome::Abandoned {
            PipelineStats::bump(&self.stats.abandoned);
            warn!(trx = %trx.hash, block = block.number, "transaction processing abandoned");
            return;
        }

        let record = TransactionRecord::new(&block, &trx);
        if let Err(e) = self.store_transaction(&record).await {
            PipelineStats::bump(&self.stats.persist_failures);
            error!(trx = %trx.hash, block = block.number, error = %e, "can not store trx");
            return;
        }
        PipelineStats::bump(&self.stats.persisted);
        self.estimate.increment();

        match serde_json::to_vec(&record) {
            Ok(bytes) => {
                if let Err(e) = self.cache.set(&trx_cache_key(&record.hash), bytes).await {
                    warn!(trx = %trx.hash, error = %e, "can not cache trx");
                }
            }
            Err(e) => warn!(trx = %trx.hash, error = %e, "can not encode trx for cache"),
        }

        self.marker.advance(block.number);
        debug!(trx = %trx.hash, block = block.number, "transaction committed");
    }

    async fn store_transaction(&self, record: &TransactionRecord) -> Result<(), PipelineError> {
        self.store
            .upsert(
                TransactionRecord::COLLECTION,
                &Filter::new().eq("hash", record.hash),
                record.to_document()?,
            )
            .await
    }
}

// ─── TransactionDispatcher ────────────────────────────────────────────────────

/// The orchestrator of the pipeline and the sole producer of both queues.
pub struct TransactionDispatcher {
    accounts: mpsc::Sender<AccountWork>,
    logs: mpsc::Sender<LogWork>,
    committer: Committer,
    events: broadcast::Sender<Arc<Transaction>>,
    persists: Arc<Semaphore>,
    stats: Arc<PipelineStats>,
}

impl TransactionDispatcher {
    pub fn new(
        accounts: mpsc::Sender<AccountWork>,
        logs: mpsc::Sender<LogWork>,
        committer: Committer,
        events: broadcast::Sender<Arc<Transaction>>,
        persists: Arc<Semaphore>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            accounts,
            logs,
            committer,
            events,
            persists,
            stats,
        }
    }

    /// Read the intake queue until `stop` is cancelled or the queue closes.
    ///
    /// Dropping the dispatcher on exit closes both fan-out queues.
    pub async fn run(self, mut intake: mpsc::Receiver<IngestionEvent>, stop: CancellationToken) {
        info!("transaction dispatcher is running");
        loop {
            let event = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                event = intake.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if let Err(e) = self.process(event).await {
                error!(error = %e, "transaction dispatch failed");
            }
        }
        info!("transaction dispatcher is closed");
    }

    /// Fan out one ingestion event and spawn its commit step.
    ///
    /// Returns once every derived unit is queued. The transaction is
    /// broadcast right away without waiting for the commit.
    pub async fn process(&self, event: IngestionEvent) -> Result<(), PipelineError> {
        PipelineStats::bump(&self.stats.received);
        let (block, trx) = match (event.block, event.transaction) {
            (Some(block), Some(trx)) => (Arc::new(block), Arc::new(trx)),
            (block, trx) => {
                PipelineStats::bump(&self.stats.malformed);
                return Err(PipelineError::Malformed(format!(
                    "block present: {}, transaction present: {}",
                    block.is_some(),
                    trx.is_some()
                )));
            }
        };

        // wait for a free commit slot before adding more work
        let permit = Arc::clone(&self.persists)
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))?;

        let barrier = CompletionBarrier::new();
        self.push_accounts(&block, &trx, &barrier).await;
        self.push_logs(&block, &trx, &barrier).await;

        tokio::spawn(
            self.committer
                .clone()
                .commit(Arc::clone(&block), Arc::clone(&trx), barrier, permit),
        );

        if self.events.send(trx).is_err() {
            debug!("no active transaction subscribers");
        }
        Ok(())
    }

    async fn push_accounts(&self, block: &Block, trx: &Transaction, barrier: &CompletionBarrier) {
        for (slot, touch) in derive_touches(block, trx).into_iter().enumerate() {
            let work = AccountWork {
                touch,
                first_seen: (trx.ordinal() << 2) | slot as u64,
                ticket: barrier.ticket(),
            };
            if let Err(mpsc::error::SendError(work)) = self.accounts.send(work).await {
                warn!(address = %work.touch.address, "account queue closed");
            }
        }
    }

    async fn push_logs(&self, block: &Arc<Block>, trx: &Arc<Transaction>, barrier: &CompletionBarrier) {
        for log in &trx.logs {
            let work = LogWork {
                log: log.clone(),
                block: Arc::clone(block),
                transaction: Arc::clone(trx),
                ticket: barrier.ticket(),
            };
            if self.logs.send(work).await.is_err() {
                warn!(trx = %trx.hash, log_index = log.log_index, "log queue closed");
            }
        }
    }
}
