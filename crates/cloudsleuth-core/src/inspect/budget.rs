//! Counting semaphore bounding concurrent inspection workers.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Slots {
    active: usize,
    peak: usize,
}

/// Fixed pool of worker slots. [`acquire`](Self::acquire) blocks while all
/// slots are taken; dropping the returned [`SlotGuard`] frees the slot,
/// including when a worker unwinds.
#[derive(Debug)]
pub struct WorkerBudget {
    limit: usize,
    slots: Mutex<Slots>,
    freed: Condvar,
}

impl WorkerBudget {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: limit.max(1),
            slots: Mutex::new(Slots::default()),
            freed: Condvar::new(),
        })
    }

    pub fn acquire(self: &Arc<Self>) -> SlotGuard {
        let mut slots = self.slots.lock();
        while slots.active >= self.limit {
            self.freed.wait(&mut slots);
        }
        slots.active += 1;
        slots.peak = slots.peak.max(slots.active);
        SlotGuard {
            budget: Arc::clone(self),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn active(&self) -> usize {
        self.slots.lock().active
    }

    /// Highest number of slots ever held at once.
    pub fn peak(&self) -> usize {
        self.slots.lock().peak
    }

    fn release(&self) {
        let mut slots = self.slots.lock();
        slots.active = slots.active.saturating_sub(1);
        drop(slots);
        self.freed.notify_one();
    }
}

/// A held worker slot.
#[derive(Debug)]
pub struct SlotGuard {
    budget: Arc<WorkerBudget>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.budget.release();
    }
}
