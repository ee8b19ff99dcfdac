//! End-to-end runs of the pipeline with the default topic table.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde_json::Value;

use chainpipe_core::error::PipelineError;
use chainpipe_core::memory::{MemoryCache, MemoryStore};
use chainpipe_core::pipeline::PipelineBuilder;
use chainpipe_core::records::{AccountRecord, TransactionRecord};
use chainpipe_core::repository::Repository;
use chainpipe_core::store::{Document, Filter, FindOptions, PersistentStore};
use chainpipe_core::types::{AccountRole, Block, IngestionEvent, LogEvent, Transaction};
use chainpipe_core::PipelineConfig;
use chainpipe_evm::topics::{event_signature, ERC20_TRANSFER, SFC_DELEGATED};
use chainpipe_evm::{default_router, OPERA_SFC_CONTRACT};

const ALICE: Address = Address::repeat_byte(0xa1);
const BOB: Address = Address::repeat_byte(0xb0);
const TOKEN: Address = Address::repeat_byte(0x70);

fn word(v: u64) -> Vec<u8> {
    U256::from(v).to_be_bytes::<32>().to_vec()
}

fn trx_hash(block: u64) -> B256 {
    B256::from(U256::from(block).to_be_bytes::<32>())
}

fn event(number: u64, to: Option<Address>, contract: Option<Address>, logs: Vec<(Address, Vec<B256>, Vec<u8>)>) -> IngestionEvent {
    let hash = trx_hash(number);
    let block = Block {
        number,
        hash: B256::repeat_byte(number as u8),
        parent_hash: B256::repeat_byte(number.saturating_sub(1) as u8),
        timestamp: 1_700_000_000 + number as i64,
    };
    let logs = logs
        .into_iter()
        .enumerate()
        .map(|(i, (address, topics, data))| LogEvent {
            address,
            topics,
            data: Bytes::from(data),
            log_index: i as u32,
            block_number: number,
            transaction_hash: hash,
        })
        .collect();
    let trx = Transaction {
        hash,
        index: 0,
        from: ALICE,
        to,
        contract_address: contract,
        value: U256::from(1u64),
        gas_used: 21_000,
        status: 1,
        logs,
        block_number: number,
        block_hash: block.hash,
    };
    IngestionEvent::new(block, trx)
}

fn config() -> PipelineConfig {
    PipelineConfig {
        checkpoint_interval_ms: 10,
        ..PipelineConfig::default()
    }
}

/// Store that refuses to write one transaction.
struct RejectingStore {
    inner: MemoryStore,
    reject: B256,
}

#[async_trait]
impl PersistentStore for RejectingStore {
    async fn insert(&self, collection: &str, doc: Value) -> Result<(), PipelineError> {
        self.inner.insert(collection, doc).await
    }

    async fn upsert(&self, collection: &str, filter: &Filter, doc: Value) -> Result<(), PipelineError> {
        if collection == TransactionRecord::COLLECTION && doc["hash"] == Value::String(self.reject.to_string()) {
            return Err(PipelineError::Storage("disk full".into()));
        }
        self.inner.upsert(collection, filter, doc).await
    }

    async fn find(&self, collection: &str, filter: &Filter, options: &FindOptions) -> Result<Vec<Value>, PipelineError> {
        self.inner.find(collection, filter, options).await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, PipelineError> {
        self.inner.count(collection, filter).await
    }

    async fn aggregate_sum(&self, collection: &str, filter: &Filter, field: &str) -> Result<U256, PipelineError> {
        self.inner.aggregate_sum(collection, filter, field).await
    }
}

#[tokio::test]
async fn drains_and_commits_everything() {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let pipeline = PipelineBuilder::new()
        .config(config())
        .store(store.clone())
        .cache(cache.clone())
        .router(default_router(OPERA_SFC_CONTRACT))
        .start()
        .await
        .unwrap();
    let mut subscriber = pipeline.subscribe();
    let intake = pipeline.sender();

    let delegation = (
        OPERA_SFC_CONTRACT,
        vec![
            event_signature(SFC_DELEGATED),
            ALICE.into_word(),
            B256::from(U256::from(4u64).to_be_bytes::<32>()),
        ],
        word(1_000),
    );
    let transfer = (
        TOKEN,
        vec![event_signature(ERC20_TRANSFER), ALICE.into_word(), BOB.into_word()],
        word(5),
    );
    let unknown = (TOKEN, vec![B256::repeat_byte(0xee)], vec![]);

    intake.send(event(1, Some(OPERA_SFC_CONTRACT), None, vec![delegation])).await.unwrap();
    intake.send(event(2, Some(TOKEN), None, vec![transfer, unknown])).await.unwrap();
    intake.send(event(3, None, Some(Address::repeat_byte(0xcc)), vec![])).await.unwrap();
    intake.send(IngestionEvent::default()).await.unwrap();
    drop(intake);

    // broadcast order follows ingestion order
    for expected in 1..=3u64 {
        assert_eq!(subscriber.recv().await.unwrap().block_number, expected);
    }

    let estimate = pipeline.trx_count_estimate();
    let stats = pipeline.drain().await;
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.logs_routed, 2);
    assert_eq!(stats.logs_dropped, 1);
    assert_eq!(stats.abandoned, 0);

    assert_eq!(store.len(TransactionRecord::COLLECTION), 3);
    assert_eq!(store.len("delegations"), 1);
    assert_eq!(store.len("erc20_transactions"), 1);
    assert_eq!(estimate.get(), 3);

    // sender, sfc, token and the deployed contract
    let accounts: Vec<AccountRecord> = store
        .find(AccountRecord::COLLECTION, &Filter::new(), &FindOptions::new())
        .await
        .unwrap()
        .into_iter()
        .map(|d| AccountRecord::from_document(d).unwrap())
        .collect();
    assert_eq!(accounts.len(), 4);
    let alice = accounts.iter().find(|a| a.address == ALICE).unwrap();
    assert_eq!(alice.trx_count, 3);
    assert_eq!(alice.first_block, 1);
    let contract = accounts
        .iter()
        .find(|a| a.address == Address::repeat_byte(0xcc))
        .unwrap();
    assert_eq!(contract.role, AccountRole::Contract);
    assert_eq!(contract.deploy_trx, Some(trx_hash(3)));

    let repo = Repository::new(store.clone(), cache.clone());
    assert_eq!(repo.last_checkpoint().await.unwrap().unwrap().block_number, 3);
    let delegations = repo.delegations(ALICE, None, 10).await.unwrap();
    assert_eq!(delegations.items[0].amount, U256::from(1_000u64));
    let cached = repo.transaction(trx_hash(2)).await.unwrap().unwrap();
    assert_eq!(cached.logs_count, 2);
}

#[tokio::test]
async fn failed_commit_does_not_stop_the_next_transaction() {
    let store = Arc::new(RejectingStore {
        inner: MemoryStore::new(),
        reject: trx_hash(1),
    });
    let pipeline = PipelineBuilder::new()
        .config(config())
        .store(store.clone())
        .cache(Arc::new(MemoryCache::new()))
        .router(default_router(OPERA_SFC_CONTRACT))
        .start()
        .await
        .unwrap();
    let mut subscriber = pipeline.subscribe();
    let intake = pipeline.sender();

    intake.send(event(1, Some(BOB), None, vec![])).await.unwrap();
    intake.send(event(2, Some(BOB), None, vec![])).await.unwrap();
    drop(intake);

    assert_eq!(subscriber.recv().await.unwrap().block_number, 1);
    assert_eq!(subscriber.recv().await.unwrap().block_number, 2);

    let stats = pipeline.drain().await;
    assert_eq!(stats.received, 2);
    assert_eq!(stats.persist_failures, 1);
    assert_eq!(stats.persisted, 1);

    let stored = store
        .inner
        .find(TransactionRecord::COLLECTION, &Filter::new(), &FindOptions::new())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["block_number"], 2);
}

#[tokio::test]
async fn restart_resumes_from_checkpoint() {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());

    let first = PipelineBuilder::new()
        .config(config())
        .store(store.clone())
        .cache(cache.clone())
        .router(default_router(OPERA_SFC_CONTRACT))
        .start()
        .await
        .unwrap();
    assert_eq!(first.resume_block(), None);
    let intake = first.sender();
    for n in 10..15 {
        intake.send(event(n, Some(BOB), None, vec![])).await.unwrap();
    }
    drop(intake);
    first.drain().await;

    let second = PipelineBuilder::new()
        .config(config())
        .store(store.clone())
        .cache(cache)
        .router(default_router(OPERA_SFC_CONTRACT))
        .start()
        .await
        .unwrap();
    assert_eq!(second.resume_block(), Some(14));
    assert_eq!(second.last_processed_block(), 14);
    assert_eq!(second.trx_count_estimate().get(), 5);
    second.shutdown().await;

    // an idle restart never moves the checkpoint backwards
    let repo = Repository::new(store, Arc::new(MemoryCache::new()));
    assert_eq!(repo.last_checkpoint().await.unwrap().unwrap().block_number, 14);
}
