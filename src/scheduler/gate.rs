//! Admission control for worker processes.
//!
//! The gate bounds how many workers may run at once. Capacity comes from
//! the processor [`Budget`] and never changes after construction.

use crate::error::PipelineError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Extra slot granted on top of `processors / threads_per_worker`.
///
/// Workers spend part of their life on IO, so one more worker than the
/// budget strictly allows keeps the processors busy. Policy, not rounding.
pub const OVERSUBSCRIPTION_SLOTS: usize = 1;

/// Immutable processor budget for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Total processors the batch may use.
    pub processors: usize,
    /// Threads handed to each worker process.
    pub threads_per_worker: usize,
}

impl Budget {
    pub fn new(processors: usize, threads_per_worker: usize) -> Result<Self, PipelineError> {
        if threads_per_worker == 0 {
            return Err(PipelineError::Configuration(
                "threads per worker must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            processors,
            threads_per_worker,
        })
    }

    /// Number of workers allowed to run at once. Always at least 1.
    pub fn concurrency_slots(&self) -> usize {
        let slots = self.processors / self.threads_per_worker.max(1) + OVERSUBSCRIPTION_SLOTS;
        slots.max(1)
    }
}

#[derive(Debug, Default)]
struct Occupancy {
    occupied: usize,
    peak: usize,
}

/// Bounded admission gate backed by a semaphore.
#[derive(Debug)]
pub struct ConcurrencyGate {
    slots: usize,
    semaphore: Arc<Semaphore>,
    occupancy: Arc<Mutex<Occupancy>>,
}

/// One occupied slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit {
    occupancy: Arc<Mutex<Occupancy>>,
    // Dropped after `Drop::drop` runs, so the count falls before the slot reopens.
    _permit: OwnedSemaphorePermit,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let mut occupancy = self.occupancy.lock();
        occupancy.occupied -= 1;
        trace!("Gate slot released ({} occupied)", occupancy.occupied);
    }
}

impl ConcurrencyGate {
    /// Create a gate with exactly `slots` slots (minimum 1).
    pub fn new(slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            slots,
            semaphore: Arc::new(Semaphore::new(slots)),
            occupancy: Arc::new(Mutex::new(Occupancy::default())),
        }
    }

    pub fn from_budget(budget: &Budget) -> Self {
        Self::new(budget.concurrency_slots())
    }

    /// Wait for a free slot and occupy it.
    ///
    /// Fails only once the gate has been closed.
    pub async fn admit(&self) -> Result<GatePermit, tokio::sync::AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;

        let mut occupancy = self.occupancy.lock();
        occupancy.occupied += 1;
        debug_assert!(occupancy.occupied <= self.slots);
        occupancy.peak = occupancy.peak.max(occupancy.occupied);
        trace!("Gate slot admitted ({} occupied)", occupancy.occupied);
        drop(occupancy);

        Ok(GatePermit {
            occupancy: Arc::clone(&self.occupancy),
            _permit: permit,
        })
    }

    /// Stop admitting. Waiters and later callers get an error; held permits
    /// stay valid until dropped.
    #[cfg(test)]
    pub(crate) fn close(&self) {
        self.semaphore.close();
    }

    /// Free a slot explicitly.
    pub fn release(&self, permit: GatePermit) {
        drop(permit);
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn occupied(&self) -> usize {
        self.occupancy.lock().occupied
    }

    /// Highest occupancy seen since the gate was created.
    pub fn peak(&self) -> usize {
        self.occupancy.lock().peak
    }
}
