//! Bounded permit pool capping concurrently running items.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Permit pool with one permit per concurrently running item.
///
/// Contract: a permit is acquired immediately before an item's
/// Waiting -> Running transition and held until `complete_item` /
/// `cancel_item` drops it. That keeps count(Running) <= max_concurrency at
/// all times, not merely the dequeue rate.
///
/// Resizing swaps the underlying pool and is only legal while no permit is
/// outstanding; the queue enforces that before calling `resize`.
pub struct ConcurrencyGate {
    semaphore: Mutex<Arc<Semaphore>>,
    max: AtomicUsize,
}

impl ConcurrencyGate {
    /// `max_concurrency = 0` is allowed and pauses dequeueing until a resize.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            semaphore: Mutex::new(Arc::new(Semaphore::new(max_concurrency))),
            max: AtomicUsize::new(max_concurrency),
        }
    }

    /// Acquire one permit, suspending while the pool is saturated.
    ///
    /// The permit is owned: dropping it anywhere releases the slot. A
    /// `resize` closes the pool this call may be suspended on; acquisition
    /// then retries against the replacement.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        loop {
            let semaphore = Arc::clone(&self.semaphore.lock());
            if let Ok(permit) = semaphore.acquire_owned().await {
                return permit;
            }
            // Err means the pool was closed by a resize; retry on the
            // current one.
        }
    }

    /// Replace the permit pool. Caller must guarantee no permit is held.
    ///
    /// The old pool is closed so consumers suspended on it wake up and
    /// re-acquire from the new one.
    pub fn resize(&self, max_concurrency: usize) {
        let old = {
            let mut guard = self.semaphore.lock();
            let old =
                std::mem::replace(&mut *guard, Arc::new(Semaphore::new(max_concurrency)));
            self.max.store(max_concurrency, Ordering::SeqCst);
            old
        };
        old.close();
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.lock().available_permits()
    }

    /// Permits currently held (running items plus acquisitions still between
    /// the gate and the Waiting -> Running transition).
    pub fn in_use(&self) -> usize {
        self.max().saturating_sub(self.available())
    }
}
