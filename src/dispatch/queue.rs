//! Admission queue
//!
//! Two-stage gate for heavy work:
//! - a **queue slot** bounds how many jobs may wait or run in total and is
//!   taken without waiting (fast rejection when the backlog is full);
//! - an **execution slot** bounds how many admitted jobs run at once and is
//!   awaited until granted or until the caller's context is cancelled.
//!
//! Both slots live in a [`Ticket`] and are released when it drops.

use std::sync::Arc;
use tokio::select;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// User-facing text for a rejected admission
pub const QUEUE_FULL_MESSAGE: &str = "⏳ Too many queued jobs, try again later.";

/// Bounded double-gate semaphore shared by all invocations
#[derive(Debug)]
pub struct AdmissionQueue {
    queue: Arc<Semaphore>,
    exec: Arc<Semaphore>,
    depth: usize,
    parallelism: usize,
}

impl AdmissionQueue {
    /// Create a queue admitting `depth` jobs of which `parallelism` run at once
    #[must_use]
    pub fn new(depth: usize, parallelism: usize) -> Self {
        Self {
            queue: Arc::new(Semaphore::new(depth)),
            exec: Arc::new(Semaphore::new(parallelism)),
            depth,
            parallelism,
        }
    }

    /// Try to get admitted.
    ///
    /// Returns `None` right away if the queue is full, or later if `ctx` is
    /// cancelled while waiting for an execution slot. In the latter case the
    /// queue slot is released before returning.
    pub async fn try_enter(&self, ctx: &CancellationToken) -> Option<Ticket> {
        let Ok(queued) = Arc::clone(&self.queue).try_acquire_owned() else {
            debug!(depth = self.depth, "Admission rejected: queue full");
            return None;
        };

        let running = select! {
            biased;
            () = ctx.cancelled() => {
                debug!("Admission abandoned: context cancelled while waiting");
                return None;
            }
            permit = Arc::clone(&self.exec).acquire_owned() => permit.ok()?,
        };

        Some(Ticket {
            _running: running,
            _queued: queued,
        })
    }

    /// Queue slots currently free
    #[must_use]
    pub fn free_queue_slots(&self) -> usize {
        self.queue.available_permits()
    }

    /// Execution slots currently free
    #[must_use]
    pub fn free_exec_slots(&self) -> usize {
        self.exec.available_permits()
    }

    /// Configured queue depth
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Configured parallelism
    #[must_use]
    pub const fn parallelism(&self) -> usize {
        self.parallelism
    }
}

/// Proof of admission; dropping it releases both slots
#[derive(Debug)]
#[must_use = "dropping the ticket leaves the queue immediately"]
pub struct Ticket {
    _running: OwnedSemaphorePermit,
    _queued: OwnedSemaphorePermit,
}

impl Ticket {
    /// Leave the queue explicitly
    pub fn leave(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn rejects_when_queue_full() {
        let queue = AdmissionQueue::new(1, 1);
        let ctx = CancellationToken::new();

        let first = queue.try_enter(&ctx).await;
        assert!(first.is_some());
        assert!(queue.try_enter(&ctx).await.is_none());

        drop(first);
        assert!(queue.try_enter(&ctx).await.is_some());
    }

    #[tokio::test]
    async fn cancelled_waiter_releases_queue_slot() {
        let queue = Arc::new(AdmissionQueue::new(2, 1));
        let running = queue.try_enter(&CancellationToken::new()).await;
        assert!(running.is_some());

        let ctx = CancellationToken::new();
        let waiter = {
            let queue = Arc::clone(&queue);
            let ctx = ctx.clone();
            tokio::spawn(async move { queue.try_enter(&ctx).await.is_some() })
        };

        tokio::task::yield_now().await;
        ctx.cancel();
        let admitted = timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(admitted, Ok(Ok(false))));
        assert_eq!(queue.free_queue_slots(), 1);
    }

    #[tokio::test]
    async fn waiter_runs_after_leave() {
        let queue = Arc::new(AdmissionQueue::new(2, 1));
        let first = queue.try_enter(&CancellationToken::new()).await;

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.try_enter(&CancellationToken::new()).await.is_some() })
        };

        tokio::task::yield_now().await;
        assert_eq!(queue.free_queue_slots(), 0);
        if let Some(ticket) = first {
            ticket.leave();
        }

        let admitted = timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(admitted, Ok(Ok(true))));
    }

    #[tokio::test]
    async fn never_exceeds_parallelism() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let queue = Arc::new(AdmissionQueue::new(8, 2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut jobs = Vec::new();
        for _ in 0..8 {
            let queue = Arc::clone(&queue);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            jobs.push(tokio::spawn(async move {
                let Some(ticket) = queue.try_enter(&CancellationToken::new()).await else {
                    return;
                };
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                ticket.leave();
            }));
        }
        for job in futures_util::future::join_all(jobs).await {
            assert!(job.is_ok());
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(queue.free_queue_slots(), 8);
        assert_eq!(queue.free_exec_slots(), 2);
    }
}
