//! # Fibers
//!
//! Lightweight, cooperatively-scheduled units of execution.
//!
//! A fiber owns a stack and a saved execution context ([`crate::context`]),
//! plus the bookkeeping the scheduler and the channels hang off it: queue
//! membership, wakeup state, the join wait-queue and the back-pointer to an
//! active alt selection.
//!
//! ## Wakeup protocol
//!
//! A parked fiber must be woken exactly once per park, even when two wake
//! sources race (a rendezvous completing and a sleep deadline firing). Every
//! wake goes through a three-state machine:
//!
//! - `Running → Notified`: dropped. The fiber is (or is about to be) on a
//!   CPU and will re-inspect its wait condition under the relevant lock
//!   before parking again.
//! - `Parked → Notified`: the one transition that enqueues the fiber.
//! - `Notified → Notified`: coalesced.
//!
//! The park transition is made by the worker after the stack switch and
//! before releasing any handed-off lock, so a waker that can see the wait
//! registration always observes `Parked`.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::context::{ExecContext, FiberYielder, Switch};
use crate::scheduler::{self, RuntimeShared};
use crate::spinlock::Spinlock;

/// Unique identifier for a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(pub u64);

impl FiberId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fiber({})", self.0)
    }
}

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

fn next_fiber_id() -> FiberId {
    FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
}

/// What a fiber is to its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberKind {
    /// Placeholder for a worker's native stack; one per worker, never
    /// queued, never migrates.
    Main,
    /// Spawned fiber with its own stack; heap-owned and reference-counted.
    Work,
}

/// Wake state: fiber on a CPU or in a ready queue.
pub(crate) const WAKE_RUNNING: u8 = 0;
/// Wake state: fiber parked, waiting to be scheduled.
pub(crate) const WAKE_PARKED: u8 = 1;
/// Wake state: a wake has been delivered.
pub(crate) const WAKE_NOTIFIED: u8 = 2;

/// Queue-membership bits, maintained for invariant checks.
pub(crate) mod hook {
    /// In a ready deque or local ready list.
    pub const READY: u8 = 1 << 0;
    /// In the owning scheduler's work registry.
    pub const WORK: u8 = 1 << 1;
    /// In a sleep set.
    pub const SLEEP: u8 = 1 << 2;
    /// In the terminated list.
    pub const TERMINATED: u8 = 1 << 3;
}

/// Owner id of a fiber that is detached (stealable or not yet attached).
pub(crate) const NO_WORKER: usize = usize::MAX;

/// A fiber: a cooperatively-scheduled stackful task.
pub struct Fiber {
    id: FiberId,
    kind: FiberKind,
    /// Pinned fibers never enter the stealable deque.
    pinned: bool,
    terminated: AtomicBool,
    /// Worker currently owning this fiber, or [`NO_WORKER`] while detached.
    pub(crate) owner: AtomicUsize,
    /// Wakeup coalescing state; see the module docs.
    pub(crate) wake: AtomicU8,
    /// Queue-membership bits for assertions.
    pub(crate) hooks: AtomicU8,
    /// Deadline under which this fiber is linked in a sleep set.
    pub(crate) sleep_key: Mutex<Option<Instant>>,
    /// Active alt selection, set only while parked inside `Alt::select`.
    pub(crate) alt: AtomicPtr<crate::alt::AltShared>,
    /// Guards `waiters` and the terminate/join handshake.
    pub(crate) splk: Spinlock,
    /// Fibers blocked until this one terminates. Guarded by `splk`.
    waiters: std::cell::UnsafeCell<Vec<Arc<Fiber>>>,
    /// Intrusive link for the remote wakeup queue.
    pub(crate) remote_next: AtomicPtr<Fiber>,
    /// Yielder of the running coroutine, set by the trampoline on first
    /// resume; only dereferenced by the fiber itself while running.
    yielder: AtomicPtr<()>,
    /// The execution context; `None` for `Main` placeholders. Accessed only
    /// by the worker that currently owns the fiber.
    ctx: std::cell::UnsafeCell<Option<ExecContext>>,
    /// Path back to the runtime for cross-thread wakeups. Weak, so fibers
    /// parked in runtime-owned queues cannot form an ownership cycle.
    runtime: Weak<RuntimeShared>,
}

// SAFETY: the UnsafeCell fields are single-owner by protocol. `ctx` is
// touched only by the worker currently running the fiber (ownership is
// transferred through the ready queues, which provide release/acquire
// ordering). `waiters` is only accessed under `splk`.
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

impl Fiber {
    /// Create a spawned fiber running `entry`.
    pub(crate) fn new_work(
        runtime: &Arc<RuntimeShared>,
        stack_size: usize,
        pinned: bool,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> Arc<Fiber> {
        let runtime_weak = Arc::downgrade(runtime);
        Arc::new_cyclic(|weak: &Weak<Fiber>| {
            let me = weak.clone();
            let rt = runtime_weak.clone();
            let ctx = ExecContext::new(stack_size, move |yielder: &FiberYielder| {
                let fiber = me.upgrade().expect("fiber released while starting");
                fiber
                    .yielder
                    .store(yielder as *const FiberYielder as *mut (), Ordering::Release);
                if let Err(payload) = catch_unwind(AssertUnwindSafe(entry)) {
                    // Ordinary panics carry a &str or String payload; anything
                    // else (notably the context library's forced stack unwind
                    // at teardown) must keep unwinding untouched.
                    if !payload.is::<&str>() && !payload.is::<String>() {
                        std::panic::resume_unwind(payload);
                    }
                    if let Some(rt) = rt.upgrade() {
                        rt.record_panic(payload);
                    }
                }
                fiber.finish();
                // Returning ends the context; the worker links the fiber
                // into the terminated list.
            });

            Fiber {
                id: next_fiber_id(),
                kind: FiberKind::Work,
                pinned,
                terminated: AtomicBool::new(false),
                owner: AtomicUsize::new(NO_WORKER),
                wake: AtomicU8::new(WAKE_RUNNING),
                hooks: AtomicU8::new(0),
                sleep_key: Mutex::new(None),
                alt: AtomicPtr::new(std::ptr::null_mut()),
                splk: Spinlock::new(),
                waiters: std::cell::UnsafeCell::new(Vec::new()),
                remote_next: AtomicPtr::new(std::ptr::null_mut()),
                yielder: AtomicPtr::new(std::ptr::null_mut()),
                ctx: std::cell::UnsafeCell::new(Some(ctx)),
                runtime: runtime_weak,
            }
        })
    }

    /// Create the placeholder fiber for a worker's native stack.
    pub(crate) fn new_main(worker: usize) -> Arc<Fiber> {
        Arc::new(Fiber {
            id: next_fiber_id(),
            kind: FiberKind::Main,
            pinned: true,
            terminated: AtomicBool::new(false),
            owner: AtomicUsize::new(worker),
            wake: AtomicU8::new(WAKE_RUNNING),
            hooks: AtomicU8::new(0),
            sleep_key: Mutex::new(None),
            alt: AtomicPtr::new(std::ptr::null_mut()),
            splk: Spinlock::new(),
            waiters: std::cell::UnsafeCell::new(Vec::new()),
            remote_next: AtomicPtr::new(std::ptr::null_mut()),
            yielder: AtomicPtr::new(std::ptr::null_mut()),
            ctx: std::cell::UnsafeCell::new(None),
            runtime: Weak::new(),
        })
    }

    /// This fiber's id.
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// This fiber's kind.
    pub fn kind(&self) -> FiberKind {
        self.kind
    }

    /// Whether this fiber may migrate between workers.
    pub(crate) fn is_migratable(&self) -> bool {
        self.kind == FiberKind::Work && !self.pinned
    }

    /// Whether the fiber's entry has run to completion.
    pub fn has_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Suspend the calling fiber (which must be this one), yielding the
    /// given switch command to the worker.
    ///
    /// Only the running fiber calls this on itself, from within its own
    /// coroutine, which guarantees the yielder pointer is live.
    pub(crate) fn suspend(&self, switch: Switch) {
        let ptr = self.yielder.load(Ordering::Acquire) as *const FiberYielder;
        debug_assert!(!ptr.is_null(), "suspend outside a running fiber");
        unsafe { (*ptr).suspend(switch) };
    }

    /// Switch to this fiber. Returns the yielded command, or `None` when
    /// the fiber has finished. Caller must be the owning worker.
    pub(crate) fn resume(&self) -> Option<Switch> {
        let ctx = unsafe { &mut *self.ctx.get() };
        let ctx = ctx.as_mut().expect("resumed a Main placeholder fiber");
        ctx.resume()
    }

    /// Release the execution context, unwinding the stack if the fiber
    /// never ran to completion (runtime teardown).
    pub(crate) fn release_context(&self) {
        unsafe { *self.ctx.get() = None };
    }

    /// The runtime this fiber belongs to, if it is still alive.
    pub(crate) fn runtime(&self) -> Option<Arc<RuntimeShared>> {
        self.runtime.upgrade()
    }

    /// Publish the terminated flag, then drain and schedule every joiner.
    /// Run by the fiber itself when its entry returns, or by the worker
    /// when a panic escapes the coroutine.
    pub(crate) fn finish(self: &Arc<Self>) {
        debug_assert_eq!(self.kind, FiberKind::Work);
        self.terminated.store(true, Ordering::Release);

        self.splk.acquire();
        let waiters = std::mem::take(unsafe { &mut *self.waiters.get() });
        self.splk.release();

        for waiter in waiters {
            scheduler::schedule(waiter);
        }
    }

    /// Enqueue `waiter` to be woken when this fiber terminates.
    /// Caller must hold `self.splk`.
    pub(crate) fn push_waiter(&self, waiter: Arc<Fiber>) {
        unsafe { (*self.waiters.get()).push(waiter) };
    }

    // ------------------------------------------------------------------
    // Hook bookkeeping
    // ------------------------------------------------------------------

    pub(crate) fn link_hook(&self, bit: u8) {
        let prev = self.hooks.fetch_or(bit, Ordering::AcqRel);
        debug_assert_eq!(prev & bit, 0, "fiber {} double-linked hook {bit:#x}", self.id);
    }

    pub(crate) fn unlink_hook(&self, bit: u8) {
        let prev = self.hooks.fetch_and(!bit, Ordering::AcqRel);
        debug_assert_ne!(prev & bit, 0, "fiber {} not linked in hook {bit:#x}", self.id);
    }

    pub(crate) fn is_linked(&self, bit: u8) -> bool {
        self.hooks.load(Ordering::Acquire) & bit != 0
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("terminated", &self.has_terminated())
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .finish()
    }
}

/// Handle to a spawned fiber.
#[derive(Clone)]
pub struct FiberHandle {
    pub(crate) fiber: Arc<Fiber>,
}

impl FiberHandle {
    /// The spawned fiber's id.
    pub fn id(&self) -> FiberId {
        self.fiber.id()
    }

    /// Whether the fiber has finished.
    pub fn is_finished(&self) -> bool {
        self.fiber.has_terminated()
    }

    /// Block the calling fiber until the target terminates.
    ///
    /// Must be called from within a fiber. Returns immediately if the target
    /// has already finished.
    pub fn join(&self) {
        let current = scheduler::current_fiber();
        assert!(
            !Arc::ptr_eq(&current, &self.fiber),
            "fiber cannot join itself"
        );

        self.fiber.splk.acquire();
        if self.fiber.has_terminated() {
            self.fiber.splk.release();
            return;
        }
        self.fiber.push_waiter(current);
        // The lock rides across the switch; a terminating fiber cannot
        // drain the waiter list until we are fully parked.
        scheduler::park_with_lock(&self.fiber.splk);
    }
}

impl fmt::Debug for FiberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("id", &self.id())
            .field("finished", &self.is_finished())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
