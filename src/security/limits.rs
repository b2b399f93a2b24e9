//! Concurrency admission control.
//!
//! # Responsibilities
//! - Cap operations in flight at `max_concurrent`
//! - Hold up to `max_queue` excess callers in a FIFO wait queue
//! - Reject immediately once the queue is full (backpressure, no unbounded
//!   queuing)
//! - Optionally reject callers that wait longer than `queue_timeout`
//!
//! # Design Decisions
//! - Slots are a fair tokio `Semaphore`; the queue bound is a separate atomic
//!   counter reserved with a CAS loop before waiting
//! - Permits and queue slots are RAII: dropping a permit releases its slot,
//!   and cancelling a queued `acquire` frees its queue position

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::config::ConcurrencyConfig;
use crate::error::{AdmissionReason, GuardError};
use crate::observability::metrics;

/// Bounded-queue concurrency limiter.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    queued: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    max_concurrent: usize,
    max_queue: usize,
    queue_timeout: Option<Duration>,
}

impl ConcurrencyLimiter {
    pub fn new(config: &ConcurrencyConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            queued: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_concurrent: config.max_concurrent,
            max_queue: config.max_queue,
            queue_timeout: config.queue_timeout(),
        }
    }

    /// Take a slot, waiting in the queue if every slot is busy.
    pub async fn acquire<E>(&self) -> Result<Permit, GuardError<E>> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => return Ok(self.admit(permit, false)),
            Err(TryAcquireError::Closed) => return Err(self.reject(AdmissionReason::QueueFull)),
            Err(TryAcquireError::NoPermits) => {}
        }

        let _slot = self.reserve_queue_slot().ok_or_else(|| self.reject(AdmissionReason::QueueFull))?;
        tracing::debug!(queued = self.queued(), "Operation queued for a concurrency slot");

        let wait = self.semaphore.clone().acquire_owned();
        let permit = match self.queue_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, wait).await {
                Ok(result) => result.map_err(|_| self.reject(AdmissionReason::QueueFull))?,
                Err(_) => return Err(self.reject(AdmissionReason::QueueTimeout)),
            },
            None => wait.await.map_err(|_| self.reject(AdmissionReason::QueueFull))?,
        };
        Ok(self.admit(permit, true))
    }

    /// Operations currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Callers currently waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn max_queue(&self) -> usize {
        self.max_queue
    }

    fn reserve_queue_slot(&self) -> Option<QueueSlot<'_>> {
        let mut prev = self.queued.load(Ordering::Relaxed);
        loop {
            if prev >= self.max_queue {
                return None;
            }
            match self
                .queued
                .compare_exchange_weak(prev, prev + 1, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(QueueSlot { queued: &self.queued })
    }

    fn admit(&self, permit: OwnedSemaphorePermit, queued: bool) -> Permit {
        let count = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_inflight(count);
        Permit {
            _permit: permit,
            queued,
            in_flight: self.in_flight.clone(),
        }
    }

    fn reject<E>(&self, reason: AdmissionReason) -> GuardError<E> {
        GuardError::AdmissionRejected {
            reason,
            max_concurrent: self.max_concurrent,
            max_queue: self.max_queue,
        }
    }
}

/// A reserved position in the wait queue, released on drop.
struct QueueSlot<'a> {
    queued: &'a AtomicUsize,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A held concurrency slot. Released exactly once, on [`Permit::release`] or
/// drop, on every exit path.
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
    queued: bool,
    in_flight: Arc<AtomicUsize>,
}

impl Permit {
    /// Whether the caller waited in the queue before being admitted.
    pub fn was_queued(&self) -> bool {
        self.queued
    }

    /// Release the slot now.
    pub fn release(self) {}
}

impl Drop for Permit {
    fn drop(&mut self) {
        let count = self.in_flight.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::record_inflight(count);
    }
}
