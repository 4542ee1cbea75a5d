//! Bounded admission of transfer work.
//!
//! A [`Limiter`] admits at most N units at a time; everything else waits in
//! FIFO order and a freed slot admits the next waiter. Waiting is abandoned
//! as soon as the transfer's cancellation token fires, so nothing new is
//! admitted after cancellation.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Admission slot. The slot is freed on drop.
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
}

/// Concurrency limiter shared by every entry of one transfer.
#[derive(Debug, Clone)]
pub struct Limiter {
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl Limiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Units currently admitted.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Wait for a slot. Returns `None` if `cancel` fires first (or had
    /// already fired).
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<LimiterPermit> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            permit = self.slots.clone().acquire_owned() => permit.ok().map(|permit| LimiterPermit { _permit: permit }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let limiter = Limiter::new(3);
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let work = (0..20).map(|_| {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let _permit = limiter.acquire(&cancel).await.expect("Not cancelled");
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }
        });
        futures::future::join_all(work).await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_acquire() {
        let limiter = Limiter::new(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(limiter.acquire(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_releases_waiters() {
        let limiter = Limiter::new(1);
        let cancel = CancellationToken::new();
        let _held = limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await.is_none() })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        assert!(waiter.await.unwrap());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(Limiter::new(0).capacity(), 1);
    }
}
