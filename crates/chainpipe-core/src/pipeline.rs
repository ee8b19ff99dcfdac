//! Pipeline assembly: wires the dispatchers, queues and checkpoint tracker.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainpipe_core::handler::TopicRouter;
//! use chainpipe_core::memory::{MemoryCache, MemoryStore};
//! use chainpipe_core::pipeline::PipelineBuilder;
//!
//! # async fn demo() -> Result<(), chainpipe_core::error::PipelineError> {
//! let pipeline = PipelineBuilder::new()
//!     .store(Arc::new(MemoryStore::new()))
//!     .cache(Arc::new(MemoryCache::new()))
//!     .router(TopicRouter::empty())
//!     .start()
//!     .await?;
//!
//! let intake = pipeline.sender();
//! # drop(intake);
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::accounts::AccountDispatcher;
use crate::checkpoint::{BlockMarker, CheckpointStore, CheckpointTracker, StoreCheckpoints};
use crate::config::PipelineConfig;
use crate::dispatcher::{Committer, TransactionDispatcher, TrxCountEstimate};
use crate::error::PipelineError;
use crate::handler::TopicRouter;
use crate::logs::LogDispatcher;
use crate::records::TransactionRecord;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::store::{Document, Filter, ObjectCache, PersistentStore};
use crate::types::{IngestionEvent, Transaction};

/// Fluent builder for a running [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    store: Option<Arc<dyn PersistentStore>>,
    cache: Option<Arc<dyn ObjectCache>>,
    router: Option<TopicRouter>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the chain name handed to log handlers.
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ObjectCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn router(mut self, router: TopicRouter) -> Self {
        self.router = Some(router);
        self
    }

    /// Keep checkpoints somewhere other than the document store.
    pub fn checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Validate the wiring, resume from the stored checkpoint and spawn every
    /// pipeline task.
    pub async fn start(self) -> Result<Pipeline, PipelineError> {
        let store = self.store.ok_or(PipelineError::NotWired("persistent store"))?;
        let cache = self.cache.ok_or(PipelineError::NotWired("object cache"))?;
        let router = self.router.ok_or(PipelineError::NotWired("topic router"))?;
        let checkpoints = self
            .checkpoints
            .unwrap_or_else(|| Arc::new(StoreCheckpoints::new(Arc::clone(&store))));
        let config = self.config;

        let resume = checkpoints.load().await?.map(|cp| cp.block_number);
        let trx_count = store
            .count(TransactionRecord::COLLECTION, &Filter::new())
            .await?;
        info!(
            chain = %config.chain,
            resume_block = ?resume,
            trx_count,
            "starting pipeline"
        );

        let marker = Arc::new(BlockMarker::new(resume.unwrap_or_default()));
        let estimate = Arc::new(TrxCountEstimate::new(trx_count));
        let stats = Arc::new(PipelineStats::default());
        let max_inflight = config.max_inflight_persists.max(1);
        let persists = Arc::new(Semaphore::new(max_inflight));

        let (intake_tx, intake_rx) = mpsc::channel(config.intake_queue_capacity.max(1));
        let (account_tx, account_rx) = mpsc::channel(config.account_queue_capacity.max(1));
        let (log_tx, log_rx) = mpsc::channel(config.log_queue_capacity.max(1));
        let (events, _) = broadcast::channel(config.broadcast_capacity.max(1));

        let dispatch_stop = CancellationToken::new();
        let checkpoint_stop = CancellationToken::new();

        let tracker = CheckpointTracker::new(
            checkpoints,
            Arc::clone(&marker),
            config.checkpoint_interval(),
            resume.unwrap_or_default(),
        );
        let tracker = tokio::spawn(tracker.run(checkpoint_stop.clone()));

        let accounts = AccountDispatcher::new(Arc::clone(&store), Arc::clone(&stats), account_rx);
        let accounts = tokio::spawn(accounts.run());

        let logs = LogDispatcher::new(
            Arc::new(router),
            Arc::clone(&store),
            Arc::clone(&cache),
            config.chain.clone(),
            Arc::clone(&stats),
            log_rx,
        );
        let logs = tokio::spawn(logs.run(dispatch_stop.clone()));

        let committer = Committer::new(
            store,
            cache,
            Arc::clone(&marker),
            Arc::clone(&estimate),
            Arc::clone(&stats),
        );
        let dispatcher = TransactionDispatcher::new(
            account_tx,
            log_tx,
            committer,
            events.clone(),
            Arc::clone(&persists),
            Arc::clone(&stats),
        );
        let dispatcher = tokio::spawn(dispatcher.run(intake_rx, dispatch_stop.clone()));

        Ok(Pipeline {
            intake: intake_tx,
            events,
            stats,
            marker,
            estimate,
            resume,
            persists,
            max_inflight,
            dispatch_stop,
            checkpoint_stop,
            tracker,
            dispatcher,
            logs,
            accounts,
        })
    }
}

/// Handle to a running pipeline.
pub struct Pipeline {
    intake: mpsc::Sender<IngestionEvent>,
    events: broadcast::Sender<Arc<Transaction>>,
    stats: Arc<PipelineStats>,
    marker: Arc<BlockMarker>,
    estimate: Arc<TrxCountEstimate>,
    resume: Option<u64>,
    persists: Arc<Semaphore>,
    max_inflight: usize,
    dispatch_stop: CancellationToken,
    checkpoint_stop: CancellationToken,
    tracker: JoinHandle<CheckpointTracker>,
    dispatcher: JoinHandle<()>,
    logs: JoinHandle<()>,
    accounts: JoinHandle<()>,
}

impl Pipeline {
    /// Intake queue for the chain data source.
    pub fn sender(&self) -> mpsc::Sender<IngestionEvent> {
        self.intake.clone()
    }

    /// Subscribe to transactions as they are dispatched.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Transaction>> {
        self.events.subscribe()
    }

    /// Last checkpointed block found at startup. The data source continues
    /// after it.
    pub fn resume_block(&self) -> Option<u64> {
        self.resume
    }

    /// Highest block whose transaction has been committed.
    pub fn last_processed_block(&self) -> u64 {
        self.marker.get()
    }

    /// Shared transaction count estimate, seeded from the store at startup.
    pub fn trx_count_estimate(&self) -> Arc<TrxCountEstimate> {
        Arc::clone(&self.estimate)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop reading and abandon queued work.
    ///
    /// The checkpoint timer stops first with a final flush. The read loops
    /// are cancelled next, then in-flight commits are awaited and the
    /// checkpoint is flushed once more. Work still queued is not committed
    /// and gets replayed after restart. Returns the final counters.
    pub async fn shutdown(self) -> StatsSnapshot {
        info!("pipeline shutting down");
        self.checkpoint_stop.cancel();
        let tracker = match self.tracker.await {
            Ok(tracker) => Some(tracker),
            Err(e) => {
                error!(error = %e, "checkpoint tracker panicked");
                None
            }
        };

        self.dispatch_stop.cancel();
        drop(self.intake);
        Self::join("transaction dispatcher", self.dispatcher).await;
        Self::join("logs dispatcher", self.logs).await;
        Self::join("account dispatcher", self.accounts).await;

        Self::finish(self.persists, self.max_inflight, tracker).await;
        let stats = self.stats.snapshot();
        info!(?stats, "pipeline stopped");
        stats
    }

    /// Close the intake and process everything already queued before
    /// stopping.
    ///
    /// Every sender obtained from [`Pipeline::sender`] must be dropped first,
    /// otherwise this waits for them. Returns the final counters.
    pub async fn drain(self) -> StatsSnapshot {
        info!("pipeline draining");
        drop(self.intake);
        Self::join("transaction dispatcher", self.dispatcher).await;
        Self::join("logs dispatcher", self.logs).await;
        Self::join("account dispatcher", self.accounts).await;

        self.checkpoint_stop.cancel();
        let tracker = match self.tracker.await {
            Ok(tracker) => Some(tracker),
            Err(e) => {
                error!(error = %e, "checkpoint tracker panicked");
                None
            }
        };
        Self::finish(self.persists, self.max_inflight, tracker).await;
        let stats = self.stats.snapshot();
        info!(?stats, "pipeline drained");
        stats
    }

    async fn join(name: &str, task: JoinHandle<()>) {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "pipeline task panicked");
        }
    }

    /// Wait for every commit in flight, then write the last checkpoint.
    async fn finish(persists: Arc<Semaphore>, max_inflight: usize, tracker: Option<CheckpointTracker>) {
        match persists.acquire_many(max_inflight as u32).await {
            Ok(_all) => {}
            Err(e) => warn!(error = %e, "could not wait for pending commits"),
        }
        if let Some(mut tracker) = tracker {
            if let Err(e) = tracker.tick().await {
                error!(error = %e, "could not write final checkpoint");
            }
        }
    }
}
