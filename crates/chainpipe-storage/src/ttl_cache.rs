//! Sharded in-process object cache with per-entry expiry.
//!
//! Keys are spread over independently locked shards. An entry is served for
//! `life_window` after it was written. Expired entries are swept from a
//! shard on write, at most once per `clean_window`.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

use chainpipe_core::error::PipelineError;
use chainpipe_core::store::ObjectCache;

/// Sizing and expiry settings of a [`TtlCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlCacheConfig {
    /// Number of shards; rounded up to at least one.
    pub shards: usize,
    /// How long an entry is served after it was written.
    pub life_window: Duration,
    /// Minimum time between two sweeps of the same shard.
    pub clean_window: Duration,
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            shards: 1024,
            life_window: Duration::from_secs(600),
            clean_window: Duration::from_secs(300),
        }
    }
}

struct Entry {
    value: Vec<u8>,
    written: Instant,
}

struct Shard {
    entries: HashMap<String, Entry>,
    last_clean: Instant,
}

/// Sharded TTL cache implementing [`ObjectCache`].
pub struct TtlCache {
    shards: Vec<Mutex<Shard>>,
    life_window: Duration,
    clean_window: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TtlCache {
    pub fn new(config: TtlCacheConfig) -> Self {
        let now = Instant::now();
        let shards = (0..config.shards.max(1))
            .map(|_| {
                Mutex::new(Shard {
                    entries: HashMap::new(),
                    last_clean: now,
                })
            })
            .collect();
        Self {
            shards,
            life_window: config.life_window,
            clean_window: config.clean_window,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache with default sizing and the given entry lifetime.
    pub fn with_life_window(life_window: Duration) -> Self {
        Self::new(TtlCacheConfig {
            life_window,
            ..TtlCacheConfig::default()
        })
    }

    fn shard(&self, key: &str) -> Result<MutexGuard<'_, Shard>, PipelineError> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        self.shards[idx]
            .lock()
            .map_err(|_| PipelineError::Cache("cache shard lock poisoned".into()))
    }

    fn sweep(&self, shard: &mut Shard, now: Instant) -> usize {
        let before = shard.entries.len();
        let life = self.life_window;
        shard.entries.retain(|_, e| now.duration_since(e.written) < life);
        shard.last_clean = now;
        before - shard.entries.len()
    }

    /// Remove every expired entry now. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .filter_map(|s| s.lock().ok())
            .map(|mut s| self.sweep(&mut s, now))
            .sum()
    }

    /// Number of entries held, including expired ones not swept yet.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .filter_map(|s| s.lock().ok())
            .map(|s| s.entries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(TtlCacheConfig::default())
    }
}

#[async_trait]
impl ObjectCache for TtlCache {
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), PipelineError> {
        let now = Instant::now();
        let mut shard = self.shard(key)?;
        if now.duration_since(shard.last_clean) >= self.clean_window {
            let dropped = self.sweep(&mut shard, now);
            if dropped > 0 {
                debug!(dropped, "expired cache entries swept");
            }
        }
        shard.entries.insert(key.to_string(), Entry { value, written: now });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        let shard = self.shard(key)?;
        let found = shard
            .entries
            .get(key)
            .filter(|e| e.written.elapsed() < self.life_window)
            .map(|e| e.value.clone());
        drop(shard);

        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(found)
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
