//! # Scheduling Policy
//!
//! Pluggable per-worker scheduling behind the [`SchedulingPolicy`] trait.
//! The default policy is work stealing:
//!
//! - each worker owns a Chase–Lev deque of migratable fibers (LIFO from the
//!   owner's end, FIFO for thieves), per crossbeam-deque;
//! - non-migratable fibers go to a plain FIFO list private to the worker;
//! - a global injector receives fibers spawned from outside the runtime;
//! - an idle worker steals from one randomly chosen victim per attempt and
//!   otherwise parks on its barrier until notified or a deadline passes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_deque::{Injector, Steal, Stealer, Worker as Deque};
use parking_lot::{Condvar, Mutex};

use crate::fiber::{hook, Fiber};
use crate::log::trace;
use crate::scheduler::Scheduler;
use crate::spinlock::XorShift;

/// Per-worker scheduling decisions.
///
/// `enqueue` and `pick_next` receive the owning scheduler so the policy can
/// detach fibers when publishing them for theft and attach them when taking
/// ownership, keeping the work registry consistent with migration.
pub(crate) trait SchedulingPolicy {
    /// Make a fiber runnable on this worker.
    fn enqueue(&self, sched: &Scheduler, fiber: Arc<Fiber>);

    /// Take the next fiber to run, stealing if the local queues are empty.
    fn pick_next(&self, sched: &Scheduler) -> Option<Arc<Fiber>>;

    /// Whether runnable local work exists.
    fn is_ready(&self) -> bool;

    /// Park the worker until `deadline` or a notification.
    fn suspend_until(&self, deadline: Instant);

    /// Wake the worker if it is parked.
    fn notify(&self);
}

/// Barrier a worker parks on while idle.
pub(crate) struct Parker {
    notified: Mutex<bool>,
    cvar: Condvar,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self {
            notified: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    /// Block until notified or `deadline`; consumes a pending notification.
    pub(crate) fn park_until(&self, deadline: Instant) {
        let mut notified = self.notified.lock();
        while !*notified {
            if self.cvar.wait_until(&mut notified, deadline).timed_out() {
                break;
            }
        }
        *notified = false;
    }

    /// Wake the parked worker, or make its next park return immediately.
    pub(crate) fn unpark(&self) {
        let mut notified = self.notified.lock();
        *notified = true;
        self.cvar.notify_one();
    }
}

/// Work-stealing policy instance owned by one worker.
pub(crate) struct WorkStealing {
    id: usize,
    /// Own deque; LIFO pops, stolen FIFO by other workers.
    deque: Deque<Arc<Fiber>>,
    /// Stealer handles of every worker, indexed by worker id.
    stealers: Arc<Vec<Stealer<Arc<Fiber>>>>,
    /// Global injection queue for externally spawned fibers.
    injector: Arc<Injector<Arc<Fiber>>>,
    /// FIFO list for fibers that must not migrate.
    local: RefCell<VecDeque<Arc<Fiber>>>,
    parker: Arc<Parker>,
    rng: XorShift,
    stealing: bool,
}

impl WorkStealing {
    pub(crate) fn new(
        id: usize,
        deque: Deque<Arc<Fiber>>,
        stealers: Arc<Vec<Stealer<Arc<Fiber>>>>,
        injector: Arc<Injector<Arc<Fiber>>>,
        parker: Arc<Parker>,
        stealing: bool,
    ) -> Self {
        Self {
            id,
            deque,
            stealers,
            injector,
            local: RefCell::new(VecDeque::new()),
            parker,
            rng: XorShift::new(),
            stealing,
        }
    }

    /// Pick a random victim other than ourselves.
    fn victim(&self) -> Option<usize> {
        let n = self.stealers.len();
        if n < 2 {
            return None;
        }
        loop {
            let id = self.rng.below(n as u64) as usize;
            if id != self.id {
                return Some(id);
            }
        }
    }

    fn steal_from(&self, stealer: &Stealer<Arc<Fiber>>) -> Option<Arc<Fiber>> {
        loop {
            match stealer.steal() {
                Steal::Success(f) => return Some(f),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    fn take_injected(&self) -> Option<Arc<Fiber>> {
        loop {
            match self.injector.steal() {
                Steal::Success(f) => return Some(f),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }
}

impl SchedulingPolicy for WorkStealing {
    fn enqueue(&self, sched: &Scheduler, fiber: Arc<Fiber>) {
        fiber.link_hook(hook::READY);
        if self.stealing && fiber.is_migratable() {
            // Publish for theft; ownership is reclaimed on pop or by the
            // stealing worker.
            sched.detach(&fiber);
            self.deque.push(fiber);
        } else {
            self.local.borrow_mut().push_back(fiber);
        }
    }

    fn pick_next(&self, sched: &Scheduler) -> Option<Arc<Fiber>> {
        if let Some(f) = self.deque.pop() {
            f.unlink_hook(hook::READY);
            sched.attach(&f);
            return Some(f);
        }

        if let Some(f) = self.local.borrow_mut().pop_front() {
            f.unlink_hook(hook::READY);
            return Some(f);
        }

        if let Some(f) = self.take_injected() {
            sched.attach(&f);
            return Some(f);
        }

        if self.stealing {
            if let Some(victim) = self.victim() {
                if let Some(f) = self.steal_from(&self.stealers[victim]) {
                    trace!("stole fiber {} from worker {victim}", f.id());
                    f.unlink_hook(hook::READY);
                    sched.attach(&f);
                    return Some(f);
                }
            }
        }

        None
    }

    fn is_ready(&self) -> bool {
        !self.deque.is_empty() || !self.local.borrow().is_empty() || !self.injector.is_empty()
    }

    fn suspend_until(&self, deadline: Instant) {
        self.parker.park_until(deadline);
    }

    fn notify(&self) {
        self.parker.unpark();
    }
}

// ============================================================================
// Tests
// ============================================================================
