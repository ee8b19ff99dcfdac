//! Log handler trait and the topic router.

use alloy_primitives::B256;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::store::{ObjectCache, PersistentStore};
use crate::types::{Block, LogEvent, Transaction};

/// Context passed to log handlers.
///
/// Gives handlers the owning block and transaction plus access to the same
/// store and cache the pipeline writes to.
#[derive(Clone)]
pub struct HandlerContext {
    pub block: Arc<Block>,
    pub transaction: Arc<Transaction>,
    pub store: Arc<dyn PersistentStore>,
    pub cache: Arc<dyn ObjectCache>,
    /// The pipeline's chain label (e.g. `"opera"`).
    pub chain: String,
}

/// Trait for per-event business handlers.
#[async_trait]
pub trait LogHandler: Send + Sync {
    /// Called for each log whose signature routes to this handler.
    async fn handle(&self, log: &LogEvent, ctx: &HandlerContext) -> Result<(), PipelineError>;

    /// Handler name used in logs and errors (e.g. `"erc20_transfer"`).
    fn name(&self) -> &str;
}

/// Immutable lookup table from event signature to handler.
///
/// Built once at startup through [`TopicRouterBuilder`] and shared read-only
/// behind an `Arc`; lookups need no locking.
pub struct TopicRouter {
    routes: HashMap<B256, Arc<dyn LogHandler>>,
}

impl TopicRouter {
    pub fn builder() -> TopicRouterBuilder {
        TopicRouterBuilder::default()
    }

    /// A router that knows no signatures; every log is dropped.
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Find the handler registered for `signature`.
    pub fn get(&self, signature: &B256) -> Option<&Arc<dyn LogHandler>> {
        self.routes.get(signature)
    }

    /// Route a log to its handler.
    ///
    /// Returns `Ok(false)` for logs without topics or with an unknown
    /// signature; that is a normal outcome, not an error.
    pub async fn route(&self, log: &LogEvent, ctx: &HandlerContext) -> Result<bool, PipelineError> {
        let Some(handler) = log.signature().and_then(|sig| self.routes.get(sig)) else {
            return Ok(false);
        };
        handler.handle(log, ctx).await?;
        Ok(true)
    }

    /// Number of known signatures.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Known signatures, in no particular order.
    pub fn signatures(&self) -> impl Iterator<Item = &B256> {
        self.routes.keys()
    }
}

/// Collects signature routes before freezing them into a [`TopicRouter`].
#[derive(Default)]
pub struct TopicRouterBuilder {
    routes: HashMap<B256, Arc<dyn LogHandler>>,
}

impl TopicRouterBuilder {
    /// Register `handler` for `signature`. A later registration for the same
    /// signature replaces the earlier one.
    pub fn route(mut self, signature: B256, handler: Arc<dyn LogHandler>) -> Self {
        if let Some(prev) = self.routes.insert(signature, handler) {
            tracing::warn!(%signature, replaced = prev.name(), "topic route replaced");
        }
        self
    }

    pub fn build(self) -> TopicRouter {
        TopicRouter {
            routes: self.routes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCache, MemoryStore};
    use alloy_primitives::{Address, Bytes};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter(Arc<AtomicU32>, &'static str);

    #[async_trait]
    impl LogHandler for Counter {
        async fn handle(&self, _l: &LogEvent, _c: &HandlerContext) -> Result<(), PipelineError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn name(&self) -> &str {
            self.1
        }
    }

    fn dummy_ctx() -> HandlerContext {
        HandlerContext {
            block: Arc::new(Block {
                number: 1,
                hash: B256::ZERO,
                parent_hash: B256::ZERO,
                timestamp: 0,
            }),
            transaction: Arc::new(Transaction {
                hash: B256::ZERO,
                index: 0,
                from: Address::ZERO,
                to: None,
                contract_address: None,
                value: Default::default(),
                gas_used: 0,
                status: 1,
                logs: vec![],
                block_number: 1,
                block_hash: B256::ZERO,
            }),
            store: Arc::new(MemoryStore::new()),
            cache: Arc::new(MemoryCache::new()),
            chain: "test".into(),
        }
    }

    fn log_with(topics: Vec<B256>) -> LogEvent {
        LogEvent {
            address: Address::ZERO,
            topics,
            data: Bytes::new(),
            log_index: 0,
            block_number: 1,
            transaction_hash: B256::ZERO,
        }
    }

    #[tokio::test]
    async fn routes_known_signature_only() {
        let count = Arc::new(AtomicU32::new(0));
        let known = B256::repeat_byte(0x11);
        let router = TopicRouter::builder()
            .route(known, Arc::new(Counter(count.clone(), "counter")))
            .build();

        let ctx = dummy_ctx();
        assert!(router.route(&log_with(vec![known]), &ctx).await.unwrap());
        assert!(!router.route(&log_with(vec![B256::repeat_byte(0x22)]), &ctx).await.unwrap());
        assert!(!router.route(&log_with(vec![]), &ctx).await.unwrap());

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn empty_router_knows_nothing() {
        let router = TopicRouter::empty();
        assert!(router.is_empty());
        assert!(router.get(&B256::ZERO).is_none());
    }
}
