//! `chainpipe replay`: run a JSON-lines event file through the pipeline.

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use chainpipe_core::{IngestionEvent, MemoryStore, ObjectCache, PersistentStore, PipelineBuilder, Repository};
use chainpipe_evm::default_router;
use chainpipe_storage::{SqliteStore, TtlCache, TtlCacheConfig};

use crate::config::AppConfig;

pub async fn run(input: &Path, sqlite: Option<&str>, config: &AppConfig, page: i32) -> Result<()> {
    let store: Arc<dyn PersistentStore> = match sqlite {
        Some(path) => Arc::new(SqliteStore::open(path).await?),
        None => Arc::new(MemoryStore::new()),
    };
    let cache: Arc<dyn ObjectCache> = Arc::new(TtlCache::new(TtlCacheConfig {
        shards: config.cache.shards,
        life_window: Duration::from_secs(config.cache.eviction_secs),
        ..TtlCacheConfig::default()
    }));

    let pipeline = PipelineBuilder::new()
        .config(config.pipeline.clone())
        .store(Arc::clone(&store))
        .cache(Arc::clone(&cache))
        .router(default_router(config.sfc_contract))
        .start()
        .await?;

    // the checkpoint block itself is replayed; commits are idempotent
    let resume_from = pipeline.resume_block().unwrap_or_default();
    let estimate = pipeline.trx_count_estimate();
    let intake = pipeline.sender();

    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("cannot open '{}'", input.display()))?;
    let mut lines = BufReader::new(file).lines();

    let (mut line_no, mut sent, mut skipped, mut invalid) = (0u64, 0u64, 0u64, 0u64);
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: IngestionEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "invalid ingestion event");
                invalid += 1;
                continue;
            }
        };
        if event.block.as_ref().is_some_and(|b| b.number < resume_from) {
            skipped += 1;
            continue;
        }
        intake
            .send(event)
            .await
            .map_err(|_| anyhow!("pipeline intake closed"))?;
        sent += 1;
    }
    drop(intake);

    info!(sent, skipped, invalid, "input exhausted, draining pipeline");
    let stats = pipeline.drain().await;

    let repo = Repository::new(store, cache).with_estimate(estimate);
    let report = json!({
        "input": { "sent": sent, "skipped": skipped, "invalid": invalid },
        "stats": stats,
        "checkpoint": repo.last_checkpoint().await?,
        "transaction_count": repo.transaction_count_estimate().await?,
        "transactions": repo.transactions(None, page).await?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
