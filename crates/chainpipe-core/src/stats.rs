//! Pipeline counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the pipeline tasks.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub(crate) received: AtomicU64,
    pub(crate) malformed: AtomicU64,
    pub(crate) persisted: AtomicU64,
    pub(crate) persist_failures: AtomicU64,
    pub(crate) abandoned: AtomicU64,
    pub(crate) logs_routed: AtomicU64,
    pub(crate) logs_dropped: AtomicU64,
    pub(crate) handler_errors: AtomicU64,
    pub(crate) touches: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub abandoned: u64,
    pub logs_routed: u64,
    pub logs_dropped: u64,
    pub handler_errors: u64,
    pub touches: u64,
}

impl PipelineStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            logs_routed: self.logs_routed.load(Ordering::Relaxed),
            logs_dropped: self.logs_dropped.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            touches: self.touches.load(Ordering::Relaxed),
        }
    }
}
