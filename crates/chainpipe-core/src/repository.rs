//! Read-side queries over the stored collections.

use alloy_primitives::{Address, B256, U256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore, StoreCheckpoints};
use crate::dispatcher::{trx_cache_key, TrxCountEstimate};
use crate::error::PipelineError;
use crate::pagination::{window, Cursor, ListWindow};
use crate::records::{
    AccountRecord, DelegationRecord, RewardClaimRecord, TokenTransactionRecord, TransactionRecord,
    WithdrawRequestRecord,
};
use crate::store::{Document, Filter, FindOptions, ObjectCache, PersistentStore};

/// Query facade combining the document store and the object cache.
///
/// Every list query goes through the keyset pagination engine.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn PersistentStore>,
    cache: Arc<dyn ObjectCache>,
    checkpoints: Arc<dyn CheckpointStore>,
    estimate: Option<Arc<TrxCountEstimate>>,
}

impl Repository {
    pub fn new(store: Arc<dyn PersistentStore>, cache: Arc<dyn ObjectCache>) -> Self {
        Self {
            checkpoints: Arc::new(StoreCheckpoints::new(Arc::clone(&store))),
            store,
            cache,
            estimate: None,
        }
    }

    /// Answer [`Repository::transaction_count_estimate`] from a running
    /// pipeline's estimate instead of counting.
    pub fn with_estimate(mut self, estimate: Arc<TrxCountEstimate>) -> Self {
        self.estimate = Some(estimate);
        self
    }

    /// Look a transaction up by hash, trying the cache first.
    pub async fn transaction(&self, hash: B256) -> Result<Option<TransactionRecord>, PipelineError> {
        let key = trx_cache_key(&hash);
        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => warn!(trx = %hash, error = %e, "can not decode cached trx"),
            },
            Ok(None) => debug!(trx = %hash, "trx cache miss"),
            Err(e) => warn!(trx = %hash, error = %e, "trx cache failed"),
        }

        let docs = self
            .store
            .find(
                TransactionRecord::COLLECTION,
                &Filter::new().eq("hash", hash),
                &FindOptions::new().limit(1),
            )
            .await?;
        let Some(doc) = docs.into_iter().next() else {
            return Ok(None);
        };
        let record = TransactionRecord::from_document(doc)?;

        // keep it around for the next lookup
        if let Ok(bytes) = serde_json::to_vec(&record) {
            if let Err(e) = self.cache.set(&key, bytes).await {
                warn!(trx = %hash, error = %e, "can not cache trx");
            }
        }
        Ok(Some(record))
    }

    pub async fn transactions(
        &self,
        cursor: Option<Cursor>,
        count: i32,
    ) -> Result<ListWindow<TransactionRecord>, PipelineError> {
        window(self.store.as_ref(), Filter::new(), cursor, count).await
    }

    /// Transactions the address sent, received or deployed.
    pub async fn account_transactions(
        &self,
        address: Address,
        cursor: Option<Cursor>,
        count: i32,
    ) -> Result<ListWindow<TransactionRecord>, PipelineError> {
        let filter = Filter::new().contains("participants", address);
        window(self.store.as_ref(), filter, cursor, count).await
    }

    pub async fn accounts(
        &self,
        cursor: Option<Cursor>,
        count: i32,
    ) -> Result<ListWindow<AccountRecord>, PipelineError> {
        window(self.store.as_ref(), Filter::new(), cursor, count).await
    }

    pub async fn delegations(
        &self,
        address: Address,
        cursor: Option<Cursor>,
        count: i32,
    ) -> Result<ListWindow<DelegationRecord>, PipelineError> {
        window(self.store.as_ref(), Filter::new().eq("address", address), cursor, count).await
    }

    pub async fn withdrawals(
        &self,
        address: Address,
        cursor: Option<Cursor>,
        count: i32,
    ) -> Result<ListWindow<WithdrawRequestRecord>, PipelineError> {
        window(self.store.as_ref(), Filter::new().eq("address", address), cursor, count).await
    }

    pub async fn reward_claims(
        &self,
        address: Address,
        cursor: Option<Cursor>,
        count: i32,
    ) -> Result<ListWindow<RewardClaimRecord>, PipelineError> {
        window(self.store.as_ref(), Filter::new().eq("address", address), cursor, count).await
    }

    /// ERC-20 transfers and approvals, optionally narrowed to one token
    /// and/or one participating address.
    pub async fn erc20_transactions(
        &self,
        token: Option<Address>,
        address: Option<Address>,
        cursor: Option<Cursor>,
        count: i32,
    ) -> Result<ListWindow<TokenTransactionRecord>, PipelineError> {
        let mut filter = Filter::new();
        if let Some(token) = token {
            filter = filter.eq("token", token);
        }
        if let Some(address) = address {
            filter = filter.contains("participants", address);
        }
        window(self.store.as_ref(), filter, cursor, count).await
    }

    /// Total amount the address has requested to withdraw.
    pub async fn withdrawals_sum_value(&self, address: Address) -> Result<U256, PipelineError> {
        self.store
            .aggregate_sum(
                WithdrawRequestRecord::COLLECTION,
                &Filter::new().eq("address", address),
                "amount",
            )
            .await
    }

    pub async fn last_checkpoint(&self) -> Result<Option<Checkpoint>, PipelineError> {
        self.checkpoints.load().await
    }

    /// Number of stored transactions; falls back to counting the collection
    /// when no pipeline estimate is attached.
    pub async fn transaction_count_estimate(&self) -> Result<u64, PipelineError> {
        match &self.estimate {
            Some(estimate) => Ok(estimate.get()),
            None => {
                self.store
                    .count(TransactionRecord::COLLECTION, &Filter::new())
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCache, MemoryStore};
    use crate::records::TokenTransactionKind;

    fn trx_record(pk: u64, from: u8, to: u8) -> TransactionRecord {
        TransactionRecord {
            pk,
            hash: B256::with_last_byte(pk as u8),
            block_number: pk >> 14,
            block_hash: B256::ZERO,
            timestamp: 0,
            index: 0,
            from: Address::repeat_byte(from),
            to: Some(Address::repeat_byte(to)),
            contract_address: None,
            value: U256::ZERO,
            gas_used: 0,
            status: 1,
            participants: vec![Address::repeat_byte(from), Address::repeat_byte(to)],
            logs_count: 0,
        }
    }

    async fn seeded() -> (Repository, Arc<MemoryStore>, Arc<MemoryCache>) {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        for (pk, from, to) in [(1u64, 1u8, 2u8), (2, 2, 3), (3, 1, 3), (4, 4, 4)] {
            store
                .insert(TransactionRecord::COLLECTION, trx_record(pk, from, to).to_document().unwrap())
                .await
                .unwrap();
        }
        (Repository::new(store.clone(), cache.clone()), store, cache)
    }

    #[tokio::test]
    async fn transaction_lookup_fills_cache() {
        let (repo, _store, cache) = seeded().await;
        let hash = B256::with_last_byte(2);
        assert!(cache.get(&trx_cache_key(&hash)).await.unwrap().is_none());

        let found = repo.transaction(hash).await.unwrap().unwrap();
        assert_eq!(found.pk, 2);
        assert!(cache.get(&trx_cache_key(&hash)).await.unwrap().is_some());

        assert!(repo.transaction(B256::repeat_byte(0x99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn account_transactions_follow_participants() {
        let (repo, _store, _cache) = seeded().await;
        let page = repo
            .account_transactions(Address::repeat_byte(1), None, 10)
            .await
            .unwrap();
        let keys: Vec<u64> = page.items.iter().map(|t| t.pk).collect();
        assert_eq!(keys, vec![3, 1]);
        assert!(page.is_start && page.is_end);
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn erc20_filters_combine() {
        let store = Arc::new(MemoryStore::new());
        let token_a = Address::repeat_byte(0xa0);
        let token_b = Address::repeat_byte(0xb0);
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);
        for (pk, token, sender, recipient) in [
            (10u64, token_a, alice, bob),
            (11, token_b, alice, bob),
            (12, token_a, bob, bob),
        ] {
            let rec = TokenTransactionRecord {
                pk,
                token,
                kind: TokenTransactionKind::Transfer,
                sender,
                recipient,
                amount: U256::from(pk),
                trx: B256::ZERO,
                block_number: 1,
                timestamp: 0,
                participants: vec![sender, recipient],
            };
            store
                .insert(TokenTransactionRecord::COLLECTION, rec.to_document().unwrap())
                .await
                .unwrap();
        }
        let repo = Repository::new(store, Arc::new(MemoryCache::new()));

        let page = repo.erc20_transactions(Some(token_a), Some(alice), None, 5).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].pk, 10);

        let page = repo.erc20_transactions(None, Some(bob), None, 5).await.unwrap();
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn withdrawals_sum_per_address() {
        let store = Arc::new(MemoryStore::new());
        let alice = Address::repeat_byte(1);
        for (pk, owner, amount) in [(1u64, alice, 100u64), (2, Address::repeat_byte(2), 7), (3, alice, 50)] {
            let rec = WithdrawRequestRecord {
                pk,
                request_id: U256::from(pk),
                address: owner,
                to_validator: U256::from(1),
                amount: U256::from(amount),
                created_time: 0,
                created_trx: B256::ZERO,
                withdrawn_time: None,
                withdrawn_trx: None,
            };
            store
                .insert(WithdrawRequestRecord::COLLECTION, rec.to_document().unwrap())
                .await
                .unwrap();
        }
        let repo = Repository::new(store, Arc::new(MemoryCache::new()));
        assert_eq!(repo.withdrawals_sum_value(alice).await.unwrap(), U256::from(150));
        assert_eq!(repo.withdrawals(alice, None, 10).await.unwrap().items.len(), 2);
    }

    #[tokio::test]
    async fn count_estimate_prefers_pipeline_value() {
        let (repo, _store, _cache) = seeded().await;
        assert_eq!(repo.transaction_count_estimate().await.unwrap(), 4);

        let repo = repo.with_estimate(Arc::new(TrxCountEstimate::new(42)));
        assert_eq!(repo.transaction_count_estimate().await.unwrap(), 42);
        assert!(repo.last_checkpoint().await.unwrap().is_none());
    }
}
