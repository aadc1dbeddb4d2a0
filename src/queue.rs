//! # Bounded Event-Descriptor Queue
//!
//! A fixed-capacity FIFO of copied event descriptors, tracked by two
//! monotonic counters: `queued` counts descriptors ever enqueued, `proced`
//! counts descriptors ever dequeued. The ring index is the counter modulo
//! the capacity, and fullness is the modular difference of the counters, so
//! behavior stays defined even if a counter ever wraps.
//!
//! ## Concurrency Contract
//!
//! The queue holds no lock of its own. Callers must hold the owning
//! subscription's lock around every operation; the single-consumer property
//! comes from the dedicated dispatcher worker, not from the queue.

use crate::error::{IocError, Result};
use crate::message::EvtDesc;

/// Fixed-capacity FIFO of event descriptors.
#[derive(Debug)]
pub struct EvtDescQueue {
    slots: Box<[Option<EvtDesc>]>,
    queued: u64,
    proced: u64,
}

impl EvtDescQueue {
    /// Create an empty queue holding at most `capacity` descriptors.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be nonzero");
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            queued: 0,
            proced: 0,
        }
    }

    /// Capacity in descriptors.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of descriptors currently queued.
    pub fn len(&self) -> usize {
        self.queued.wrapping_sub(self.proced) as usize
    }

    /// Whether the queue holds no descriptors.
    pub fn is_empty(&self) -> bool {
        self.queued == self.proced
    }

    /// Whether the queue is at capacity.
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Copy `desc` into the last position.
    ///
    /// Fails with [`IocError::TooManyQueued`] when the queue is full; the
    /// descriptor is untouched in that case.
    pub fn enqueue_last(&mut self, desc: &EvtDesc) -> Result<()> {
        if self.is_full() {
            return Err(IocError::TooManyQueued);
        }
        let idx = (self.queued % self.slots.len() as u64) as usize;
        self.slots[idx] = Some(desc.clone());
        self.queued = self.queued.wrapping_add(1);
        Ok(())
    }

    /// Move the first descriptor out, clearing its slot.
    ///
    /// Returns `None` when the queue is empty.
    pub fn dequeue_first(&mut self) -> Option<EvtDesc> {
        if self.is_empty() {
            return None;
        }
        let idx = (self.proced % self.slots.len() as u64) as usize;
        let desc = self.slots[idx].take();
        self.proced = self.proced.wrapping_add(1);
        debug_assert!(desc.is_some(), "occupied slot was empty");
        desc
    }

    /// Drop every queued descriptor.
    pub fn drain(&mut self) {
        while self.dequeue_first().is_some() {}
    }
}
