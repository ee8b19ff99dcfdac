//! Per-transaction completion barrier.
//!
//! Every unit of work derived from one transaction (an account touch, a log)
//! carries a [`Ticket`] issued by the transaction's [`CompletionBarrier`].
//! The barrier releases once every ticket has been returned. A ticket that is
//! dropped without [`Ticket::complete`] (e.g. a queued item discarded on
//! shutdown) still releases the barrier, but marks it abandoned so the
//! transaction is not persisted.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Result of waiting on a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// Every ticket was completed.
    Complete,
    /// At least one ticket was dropped unprocessed.
    Abandoned,
}

struct Inner {
    pending: AtomicUsize,
    abandoned: AtomicBool,
    notify: Notify,
}

/// Counter of outstanding work for one transaction.
#[derive(Clone)]
pub struct CompletionBarrier {
    inner: Arc<Inner>,
}

impl CompletionBarrier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: AtomicUsize::new(0),
                abandoned: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Register one more unit of work.
    ///
    /// Must be called before the work item is handed to its queue so the
    /// counter can never be observed at zero while work is still in flight.
    pub fn ticket(&self) -> Ticket {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        Ticket {
            inner: Some(Arc::clone(&self.inner)),
        }
    }

    /// Number of tickets not yet returned.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Wait until every issued ticket has been returned.
    pub async fn wait(&self) -> BarrierOutcome {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.pending.load(Ordering::Acquire) == 0 {
                return if self.inner.abandoned.load(Ordering::Acquire) {
                    BarrierOutcome::Abandoned
                } else {
                    BarrierOutcome::Complete
                };
            }
            notified.await;
        }
    }
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionBarrier")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Completion signal for one unit of work. Fires exactly once.
pub struct Ticket {
    inner: Option<Arc<Inner>>,
}

impl Ticket {
    /// Signal that the work item has been handled.
    pub fn complete(mut self) {
        self.release(false);
    }

    fn release(&mut self, abandoned: bool) {
        if let Some(inner) = self.inner.take() {
            if abandoned {
                inner.abandoned.store(true, Ordering::Release);
            }
            if inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                inner.notify.notify_waiters();
            }
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.release(true);
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("live", &self.inner.is_some())
            .finish()
    }
}
