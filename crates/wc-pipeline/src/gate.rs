//! Admission control for conversions.
//!
//! [`ConcurrencyGate`] is a counting semaphore with a bounded wait queue:
//! up to `capacity` conversions run at once, up to `max_queue` more wait for
//! at most `queue_wait`, and anything beyond that is turned away with
//! [`Error::ServerBusy`] instead of piling up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use wc_core::config::ConversionConfig;
use wc_core::Error;

/// Permission to run one conversion. Capacity returns to the gate when this
/// is dropped.
pub struct ConcurrencySlot {
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for ConcurrencySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencySlot").finish()
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    max_queue: usize,
    queue_wait: Duration,
    queued: Arc<AtomicUsize>,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize, max_queue: usize, queue_wait: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            max_queue,
            queue_wait,
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::new(
            config.max_concurrent,
            config.max_queue_len(),
            config.queue_wait(),
        )
    }

    /// Wait for a slot.
    ///
    /// # Errors
    ///
    /// [`Error::ServerBusy`] when the wait queue is already full or the wait
    /// exceeds the configured bound.
    pub async fn acquire(&self) -> wc_core::Result<ConcurrencySlot> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(ConcurrencySlot { _permit: permit });
        }

        let max_queue = self.max_queue;
        self.queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_queue).then_some(n + 1)
            })
            .map_err(|n| {
                tracing::warn!(queued = n, max_queue, "Conversion queue full, rejecting");
                Error::ServerBusy(format!("{n} conversions already waiting"))
            })?;
        let _ticket = QueueTicket(&self.queued);

        tracing::debug!(queued = self.queued(), "Waiting for a conversion slot");

        match tokio::time::timeout(self.queue_wait, Arc::clone(&self.semaphore).acquire_owned())
            .await
        {
            Ok(Ok(permit)) => Ok(ConcurrencySlot { _permit: permit }),
            Ok(Err(_closed)) => Err(Error::Internal("concurrency gate closed".into())),
            Err(_elapsed) => Err(Error::ServerBusy(format!(
                "no conversion slot within {}s",
                self.queue_wait.as_secs()
            ))),
        }
    }

    /// Conversions currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Requests currently waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_queue(&self) -> usize {
        self.max_queue
    }
}

/// Decrements the wait counter when the waiter leaves the queue, whether it
/// got a slot, timed out, or was cancelled.
struct QueueTicket<'a>(&'a AtomicUsize);

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
