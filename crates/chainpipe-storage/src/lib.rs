//! chainpipe-storage: storage backends for ChainPipe.
//!
//! Backends:
//! - [`sqlite`]: SQLite document store via `sqlx` (single-file persistence)
//! - [`ttl_cache`]: sharded in-process object cache with entry expiry
//!
//! The in-memory store and cache live in `chainpipe_core::memory`.

#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod ttl_cache;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use ttl_cache::{CacheStats, TtlCache, TtlCacheConfig};
