//! chainpipe-core: transaction/log dispatch pipeline and keyset pagination.
//!
//! # Architecture
//!
//! ```text
//! data source → intake queue → TransactionDispatcher
//!                                  ├── account queue → AccountDispatcher
//!                                  ├── log queue     → LogDispatcher → TopicRouter → LogHandler
//!                                  ├── broadcast     (subscribers, not gated on commit)
//!                                  └── commit task   (waits on the CompletionBarrier)
//!                                        └── store + estimate + cache + BlockMarker
//! CheckpointTracker (timer) → BlockMarker → status/last_block
//! Repository → pagination::window → PersistentStore
//! ```

pub mod accounts;
pub mod barrier;
pub mod checkpoint;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod logs;
pub mod memory;
pub mod pagination;
pub mod pipeline;
pub mod records;
pub mod repository;
pub mod stats;
pub mod store;
pub mod types;

pub use barrier::{BarrierOutcome, CompletionBarrier, Ticket};
pub use checkpoint::{BlockMarker, Checkpoint, CheckpointStore, CheckpointTracker};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use handler::{HandlerContext, LogHandler, TopicRouter};
pub use memory::{MemoryCache, MemoryStore};
pub use pagination::{Cursor, ListWindow};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use repository::Repository;
pub use stats::StatsSnapshot;
pub use store::{Document, Filter, FindOptions, ObjectCache, Op, PersistentStore, SortOrder};
pub use types::{AccountRole, AccountTouch, Block, IngestionEvent, LogEvent, Transaction};
