//! Log dispatcher: routes queued logs to their handlers.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::barrier::Ticket;
use crate::handler::{HandlerContext, TopicRouter};
use crate::stats::PipelineStats;
use crate::store::{ObjectCache, PersistentStore};
use crate::types::{Block, LogEvent, Transaction};

/// One log travelling through the log queue.
#[derive(Debug)]
pub struct LogWork {
    pub log: LogEvent,
    pub block: Arc<Block>,
    pub transaction: Arc<Transaction>,
    pub ticket: Ticket,
}

/// Reads the log queue, looks each log's signature up in the
/// [`TopicRouter`] and invokes the matching handler.
///
/// Logs with unknown signatures are dropped. Either way the log's ticket is
/// completed exactly once.
pub struct LogDispatcher {
    router: Arc<TopicRouter>,
    store: Arc<dyn PersistentStore>,
    cache: Arc<dyn ObjectCache>,
    chain: String,
    stats: Arc<PipelineStats>,
    queue: mpsc::Receiver<LogWork>,
}

impl LogDispatcher {
    pub fn new(
        router: Arc<TopicRouter>,
        store: Arc<dyn PersistentStore>,
        cache: Arc<dyn ObjectCache>,
        chain: impl Into<String>,
        stats: Arc<PipelineStats>,
        queue: mpsc::Receiver<LogWork>,
    ) -> Self {
        Self {
            router,
            store,
            cache,
            chain: chain.into(),
            stats,
            queue,
        }
    }

    /// Process logs until `stop` is cancelled or the queue closes.
    ///
    /// A log already taken off the queue is always finished before the loop
    /// checks for the stop signal again.
    pub async fn run(mut self, stop: CancellationToken) {
        info!(known_topics = self.router.len(), "logs dispatcher is running");
        loop {
            let work = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                work = self.queue.recv() => match work {
                    Some(work) => work,
                    None => break,
                },
            };
            self.dispatch(work).await;
        }
        info!("logs dispatcher is closed");
    }

    async fn dispatch(&self, work: LogWork) {
        let ctx = HandlerContext {
            block: Arc::clone(&work.block),
            transaction: Arc::clone(&work.transaction),
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            chain: self.chain.clone(),
        };

        match self.router.route(&work.log, &ctx).await {
            Ok(true) => {
                PipelineStats::bump(&self.stats.logs_routed);
                debug!(
                    topic = ?work.log.signature(),
                    trx = %work.transaction.hash,
                    "known topic processed"
                );
            }
            Ok(false) => PipelineStats::bump(&self.stats.logs_dropped),
            Err(e) => {
                PipelineStats::bump(&self.stats.handler_errors);
                error!(
                    trx = %work.transaction.hash,
                    log_index = work.log.log_index,
                    error = %e,
                    "log handler failed"
                );
            }
        }

        // mark the processing as finished
        work.ticket.complete();
    }
}
