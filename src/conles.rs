//! # Connectionless Event Subsystem
//!
//! Publish-subscribe over the reserved auto-link, with no accept/connect
//! step. A fixed-size table of subscription slots feeds one dedicated
//! dispatcher worker; posting is either synchronous (callbacks run in the
//! caller's thread before the post returns) or asynchronous (descriptors are
//! copied into per-subscriber bounded queues and the worker drains them).
//!
//! ## Locking
//!
//! One coarse subscription mutex protects the slot table and every per-slot
//! queue. A separate worker mutex + condvar pair drives wakeups, and an idle
//! condvar lets the force-drain barrier wait for the worker's in-flight
//! callback to return. No lock is ever held across a callback invocation:
//! the engine clones what it needs, drops the lock, and calls out. That is
//! what makes re-entrant subscribe/unsubscribe from inside a callback legal.
//!
//! ## Ordering and Backpressure
//!
//! Delivery to a single subscriber is post-order (FIFO per slot); across
//! subscribers there is no ordering guarantee. A post finding *any*
//! subscriber's queue full — interested or not — fails with
//! `TooManyQueued`, so a slow consumer is visible to every caller instead of
//! silently starving. Nothing is ever dropped: enqueue either succeeds or
//! the caller hears about it.

use crate::error::{IocError, Result};
use crate::link::LinkState;
use crate::message::{EvtDesc, EvtId, MsgCommon};
use crate::queue::EvtDescQueue;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// An event-consumer callback.
///
/// The consumer's private data lives in the closure capture; the `Arc`
/// handle itself is the consumer's identity. Subscribing the same handle
/// twice is a conflict, and unsubscribe takes the handle to say who leaves.
pub type EvtCallback = Arc<dyn Fn(&EvtDesc) + Send + Sync>;

/// Arguments of a subscribe call: which events, delivered to whom.
#[derive(Clone)]
pub struct SubEvtArgs {
    /// Event ids of interest; copied into the subscription.
    pub evt_ids: Vec<EvtId>,
    /// The consumer callback; its handle is the consumer identity.
    pub callback: EvtCallback,
}

impl SubEvtArgs {
    /// Subscribe `callback` to the given event ids.
    pub fn new(evt_ids: Vec<EvtId>, callback: EvtCallback) -> Self {
        Self { evt_ids, callback }
    }
}

impl fmt::Debug for SubEvtArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubEvtArgs")
            .field("evt_ids", &self.evt_ids)
            .field("callback", &"...")
            .finish()
    }
}

/// Arguments of an unsubscribe call: the departing consumer's identity.
#[derive(Clone)]
pub struct UnsubEvtArgs {
    /// The callback handle the subscription was installed with.
    pub callback: EvtCallback,
}

impl fmt::Debug for UnsubEvtArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsubEvtArgs").field("callback", &"...").finish()
    }
}

/// One live subscription slot.
struct SubSlot {
    callback: EvtCallback,
    evt_ids: HashSet<EvtId>,
    queue: EvtDescQueue,
}

/// Wakeup flags shared with the dispatcher worker.
struct WorkerFlags {
    pending: bool,
    busy: bool,
    shutdown: bool,
}

/// State shared between the facade side and the worker thread.
struct Shared {
    slots: Mutex<Vec<Option<SubSlot>>>,
    work: Mutex<WorkerFlags>,
    work_cv: Condvar,
    idle_cv: Condvar,
    state: Mutex<LinkState>,
}

/// The connectionless event engine behind the reserved auto-link.
pub(crate) struct ConlesEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    seq: AtomicU64,
    epoch: Instant,
    queue_capacity: usize,
}

impl ConlesEngine {
    /// Create the engine and spawn its dispatcher worker.
    ///
    /// `max_consumers` bounds the subscription table; `queue_capacity`
    /// bounds each subscriber's descriptor queue.
    pub(crate) fn new(max_consumers: usize, queue_capacity: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            slots: Mutex::new((0..max_consumers).map(|_| None).collect()),
            work: Mutex::new(WorkerFlags {
                pending: false,
                busy: false,
                shutdown: false,
            }),
            work_cv: Condvar::new(),
            idle_cv: Condvar::new(),
            state: Mutex::new(LinkState::Ready),
        });

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("ioc-evt-worker".into())
            .spawn(move || worker_loop(worker_shared))
            .map_err(|_| IocError::OutOfMemory)?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            seq: AtomicU64::new(0),
            epoch: Instant::now(),
            queue_capacity,
        })
    }

    /// Stamp a message header with the next process-global sequence id and
    /// the current monotonic timestamp. Shared by every descriptor kind the
    /// runtime accepts.
    pub(crate) fn stamp_common(&self, common: &mut MsgCommon) {
        common.seq_id = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        common.timestamp_ns = self.epoch.elapsed().as_nanos() as u64;
    }

    /// Stamp a descriptor copy, leaving the caller's original untouched.
    pub(crate) fn stamp(&self, desc: &EvtDesc) -> EvtDesc {
        let mut stamped = desc.clone();
        self.stamp_common(&mut stamped.common);
        stamped
    }

    /// Current auto-link main state.
    pub(crate) fn link_state(&self) -> LinkState {
        *self.shared.state.lock()
    }

    /// Run `f` with the auto-link state set to `state`, restoring the prior
    /// value afterwards (re-entrant calls nest).
    fn with_state<R>(&self, state: LinkState, f: impl FnOnce() -> R) -> R {
        let prior = {
            let mut st = self.shared.state.lock();
            std::mem::replace(&mut *st, state)
        };
        let out = f();
        *self.shared.state.lock() = prior;
        out
    }

    /// Install a subscription.
    ///
    /// Rejects a duplicate consumer identity with `ConflictEventConsumer`
    /// (leaving the table untouched) and a full table with
    /// `TooManyEventConsumers`.
    pub(crate) fn subscribe(&self, args: &SubEvtArgs) -> Result<()> {
        if args.evt_ids.is_empty() {
            return Err(IocError::InvalidParam);
        }
        self.with_state(LinkState::BusySubEvt, || {
            let mut slots = self.shared.slots.lock();
            if slots.iter().flatten().any(|s| EvtCallback::ptr_eq(&s.callback, &args.callback)) {
                return Err(IocError::ConflictEventConsumer);
            }
            let free = slots
                .iter_mut()
                .find(|s| s.is_none())
                .ok_or(IocError::TooManyEventConsumers)?;
            *free = Some(SubSlot {
                callback: args.callback.clone(),
                evt_ids: args.evt_ids.iter().copied().collect(),
                queue: EvtDescQueue::new(self.queue_capacity),
            });
            debug!(evt_ids = ?args.evt_ids, "event consumer subscribed");
            Ok(())
        })
    }

    /// Remove a subscription, draining anything still queued for it.
    pub(crate) fn unsubscribe(&self, args: &UnsubEvtArgs) -> Result<()> {
        self.with_state(LinkState::BusyUnsubEvt, || {
            let mut slots = self.shared.slots.lock();
            let slot = slots
                .iter_mut()
                .find(|s| {
                    s.as_ref()
                        .is_some_and(|s| EvtCallback::ptr_eq(&s.callback, &args.callback))
                })
                .ok_or(IocError::NoEventConsumer)?;
            if let Some(sub) = slot.as_mut() {
                let dropped = sub.queue.len();
                if dropped > 0 {
                    warn!(dropped, "unsubscribing consumer with queued events");
                }
                sub.queue.drain();
            }
            *slot = None;
            debug!("event consumer unsubscribed");
            Ok(())
        })
    }

    /// Post an event over the auto-link.
    ///
    /// Synchronous mode delivers every matching callback in the caller's
    /// thread before returning. Asynchronous mode copies the descriptor into
    /// each matching subscriber's queue and wakes the worker. Either way the
    /// post fails up front with `TooManyQueued` if *any* subscriber's queue
    /// is full, and with `NoEventConsumer` if nobody matched.
    pub(crate) fn post(&self, desc: &EvtDesc, sync_mode: bool) -> Result<()> {
        let stamped = self.stamp(desc);

        let sync_callbacks: Vec<EvtCallback> = {
            let mut slots = self.shared.slots.lock();

            if slots.iter().flatten().any(|s| s.queue.is_full()) {
                trace!(evt_id = stamped.evt_id, "post rejected: subscriber queue full");
                return Err(IocError::TooManyQueued);
            }

            let mut matched_any = false;
            let mut callbacks = Vec::new();
            for slot in slots.iter_mut().flatten() {
                if !slot.evt_ids.contains(&stamped.evt_id) {
                    continue;
                }
                matched_any = true;
                if sync_mode {
                    callbacks.push(slot.callback.clone());
                } else {
                    slot.queue.enqueue_last(&stamped)?;
                }
            }
            if !matched_any {
                return Err(IocError::NoEventConsumer);
            }
            callbacks
        };

        if sync_callbacks.is_empty() {
            trace!(evt_id = stamped.evt_id, seq = stamped.common.seq_id, "event queued");
            self.wakeup();
        } else {
            trace!(evt_id = stamped.evt_id, seq = stamped.common.seq_id, "event delivered inline");
            self.with_state(LinkState::BusyCbProcEvt, || {
                for callback in &sync_callbacks {
                    callback(&stamped);
                }
            });
        }
        Ok(())
    }

    /// Non-blocking wakeup of the dispatcher worker.
    pub(crate) fn wakeup(&self) {
        let mut flags = self.shared.work.lock();
        flags.pending = true;
        self.shared.work_cv.notify_one();
    }

    /// Drain every subscriber queue in the caller's thread, then wait for
    /// the worker's in-flight delivery to finish.
    ///
    /// This is the barrier behind `force_proc_evt`: when it returns, every
    /// event posted before the call has had all its matching callbacks
    /// completed.
    pub(crate) fn force_proc(&self) {
        loop {
            let job = {
                let mut slots = self.shared.slots.lock();
                slots.iter_mut().flatten().find_map(|slot| {
                    slot.queue.dequeue_first().map(|d| (slot.callback.clone(), d))
                })
            };
            match job {
                Some((callback, desc)) => {
                    self.with_state(LinkState::BusyCbProcEvt, || callback(&desc));
                }
                None => break,
            }
        }

        let mut flags = self.shared.work.lock();
        while flags.busy {
            self.shared.idle_cv.wait(&mut flags);
        }
    }

    /// Stop and join the dispatcher worker. Idempotent.
    pub(crate) fn shutdown(&self) {
        {
            let mut flags = self.shared.work.lock();
            flags.shutdown = true;
            self.shared.work_cv.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("event dispatcher worker panicked");
            }
        }
    }
}

impl Drop for ConlesEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The dispatcher worker: wait for a wakeup, then sweep the slots, one
/// descriptor per slot per pass, until a full pass finds nothing. The sweep
/// drops the subscription lock around every callback, and re-checks the
/// pending flag before sleeping so work posted mid-sweep is picked up
/// without a wait.
fn worker_loop(shared: Arc<Shared>) {
    debug!("event dispatcher worker started");
    loop {
        {
            let mut flags = shared.work.lock();
            while !flags.pending && !flags.shutdown {
                shared.work_cv.wait(&mut flags);
            }
            if flags.shutdown {
                flags.busy = false;
                shared.idle_cv.notify_all();
                break;
            }
            flags.pending = false;
            flags.busy = true;
        }

        let slot_count = shared.slots.lock().len();
        let mut did_work = true;
        while did_work {
            did_work = false;
            for idx in 0..slot_count {
                let job = {
                    let mut slots = shared.slots.lock();
                    slots[idx]
                        .as_mut()
                        .and_then(|slot| slot.queue.dequeue_first().map(|d| (slot.callback.clone(), d)))
                };
                if let Some((callback, desc)) = job {
                    {
                        *shared.state.lock() = LinkState::BusyCbProcEvt;
                    }
                    callback(&desc);
                    {
                        *shared.state.lock() = LinkState::Ready;
                    }
                    did_work = true;
                }
            }
        }

        {
            let mut flags = shared.work.lock();
            flags.busy = false;
            shared.idle_cv.notify_all();
        }
    }
    debug!("event dispatcher worker stopped");
}
