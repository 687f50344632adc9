//! # Scheduler
//!
//! Per-worker fiber scheduler and the runtime that drives a pool of them.
//!
//! Each OS worker thread owns one [`Scheduler`]: the work-stealing policy,
//! the registry of fibers it currently owns, a sleep set ordered by
//! deadline, the terminated list awaiting reaping, and a lock-free remote
//! inbox other workers push wakeups into. The worker's native stack plays
//! the scheduler role: it runs the main loop and is the target every fiber
//! switches back to when it yields or parks.
//!
//! ## Main loop
//!
//! 1. reap the terminated list,
//! 2. drain the remote inbox into the local ready queue,
//! 3. wake expired sleepers (routing through the alt timeout race when the
//!    sleeper is parked inside a selection),
//! 4. pick the next fiber (own deque, local list, injector, then theft) and
//!    resume it,
//! 5. otherwise park until the earliest local deadline (or briefly).
//!
//! ## Suspension
//!
//! A fiber suspends by yielding a [`Switch`] to its worker. The worker marks
//! the fiber parked and only then releases any spinlock the fiber handed
//! off, so a wait registration published under that lock cannot be acted on
//! by other threads until the fiber is fully off its stack. Wakeups funnel
//! through [`schedule`], which the wake-state machine makes exactly-once per
//! park; wakeups for fibers owned by another worker travel through that
//! worker's remote inbox.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_deque::{Injector, Stealer, Worker as Deque};
use parking_lot::Mutex;

use crate::config::RuntimeConfig;
use crate::context::{LockHandoff, ParkData, Switch};
use crate::fiber::{
    hook, Fiber, FiberHandle, FiberId, FiberKind, NO_WORKER, WAKE_NOTIFIED, WAKE_PARKED,
    WAKE_RUNNING,
};
use crate::log::{debug, error, info, trace};
use crate::policy::{Parker, SchedulingPolicy, WorkStealing};
use crate::remote::RemoteQueue;
use crate::spinlock::Spinlock;

thread_local! {
    static SCHEDULER: RefCell<Option<Rc<Scheduler>>> = const { RefCell::new(None) };
}

/// State of one worker reachable from any thread.
pub(crate) struct SchedulerShared {
    pub(crate) inbox: RemoteQueue,
    pub(crate) parker: Arc<Parker>,
}

/// State shared by every worker and every fiber of one runtime.
pub(crate) struct RuntimeShared {
    pub(crate) config: RuntimeConfig,
    pub(crate) schedulers: Vec<Arc<SchedulerShared>>,
    pub(crate) injector: Arc<Injector<Arc<Fiber>>>,
    pub(crate) stealers: Arc<Vec<Stealer<Arc<Fiber>>>>,
    exit: AtomicBool,
    /// Fibers spawned and not yet reaped.
    live: AtomicUsize,
    /// First panic escaping a fiber, re-raised by `Runtime::run`.
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl RuntimeShared {
    pub(crate) fn record_panic(&self, payload: Box<dyn Any + Send>) {
        error!("fiber panicked; propagating from run()");
        let mut slot = self.panic.lock();
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    pub(crate) fn signal_exit(&self) {
        if !self.exit.swap(true, Ordering::AcqRel) {
            for shared in &self.schedulers {
                shared.parker.unpark();
            }
        }
    }

    fn exiting(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }
}

/// Per-worker scheduler. Lives in a thread-local and is only touched by its
/// own worker; cross-thread interaction goes through [`SchedulerShared`].
pub(crate) struct Scheduler {
    pub(crate) id: usize,
    pub(crate) runtime: Arc<RuntimeShared>,
    pub(crate) shared: Arc<SchedulerShared>,
    policy: Box<dyn SchedulingPolicy>,
    /// Every fiber this worker currently owns, by id.
    work: RefCell<HashMap<FiberId, Arc<Fiber>>>,
    /// Parked fibers with a deadline, ordered by (deadline, id).
    sleep: RefCell<BTreeMap<(Instant, FiberId), Arc<Fiber>>>,
    /// Finished fibers awaiting release.
    terminated: RefCell<Vec<Arc<Fiber>>>,
    /// The fiber currently on the CPU, or the main placeholder.
    current: RefCell<Option<Arc<Fiber>>>,
    /// Placeholder identity for the worker's native stack.
    main: Arc<Fiber>,
}

impl Scheduler {
    fn new(
        id: usize,
        runtime: Arc<RuntimeShared>,
        deque: Deque<Arc<Fiber>>,
    ) -> Rc<Scheduler> {
        let shared = runtime.schedulers[id].clone();
        let policy = Box::new(WorkStealing::new(
            id,
            deque,
            runtime.stealers.clone(),
            runtime.injector.clone(),
            shared.parker.clone(),
            runtime.config.work_stealing,
        ));
        Rc::new(Scheduler {
            id,
            runtime,
            shared,
            policy,
            work: RefCell::new(HashMap::new()),
            sleep: RefCell::new(BTreeMap::new()),
            terminated: RefCell::new(Vec::new()),
            current: RefCell::new(None),
            main: Fiber::new_main(id),
        })
    }

    // ------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------

    /// Take ownership of a fiber (spawn commit, steal, injector pickup).
    pub(crate) fn attach(&self, fiber: &Arc<Fiber>) {
        debug_assert_eq!(fiber.kind(), FiberKind::Work);
        debug_assert!(!fiber.is_linked(hook::WORK));
        fiber.owner.store(self.id, Ordering::Release);
        fiber.link_hook(hook::WORK);
        self.work.borrow_mut().insert(fiber.id(), fiber.clone());
    }

    /// Release ownership of a fiber (publishing it for theft).
    pub(crate) fn detach(&self, fiber: &Arc<Fiber>) {
        debug_assert!(fiber.is_linked(hook::WORK));
        fiber.unlink_hook(hook::WORK);
        self.work.borrow_mut().remove(&fiber.id());
        fiber.owner.store(NO_WORKER, Ordering::Release);
    }

    /// Attach and enqueue a freshly spawned fiber.
    fn commit(&self, fiber: Arc<Fiber>) {
        self.attach(&fiber);
        self.policy.enqueue(self, fiber);
    }

    // ------------------------------------------------------------------
    // Ready/sleep bookkeeping
    // ------------------------------------------------------------------

    /// Put a woken fiber this worker owns onto its ready queue.
    fn make_ready_local(&self, fiber: Arc<Fiber>) {
        self.unlink_sleep(&fiber);
        self.policy.enqueue(self, fiber);
    }

    fn unlink_sleep(&self, fiber: &Arc<Fiber>) {
        if let Some(deadline) = fiber.sleep_key.lock().take() {
            self.sleep.borrow_mut().remove(&(deadline, fiber.id()));
            fiber.unlink_hook(hook::SLEEP);
        }
    }

    /// Register the running fiber in the sleep set under `deadline`.
    fn link_sleep(&self, fiber: &Arc<Fiber>, deadline: Instant) {
        debug_assert!(!fiber.is_linked(hook::SLEEP));
        fiber.link_hook(hook::SLEEP);
        *fiber.sleep_key.lock() = Some(deadline);
        self.sleep
            .borrow_mut()
            .insert((deadline, fiber.id()), fiber.clone());
    }

    fn earliest_sleep(&self) -> Option<Instant> {
        self.sleep.borrow().keys().next().map(|(tp, _)| *tp)
    }

    /// Wake every sleeper whose deadline has passed. A sleeper parked in an
    /// alt selection is woken only if the timeout wins the selection race.
    fn wakeup_sleepers(&self) {
        let now = Instant::now();
        loop {
            let fiber = {
                let mut sleep = self.sleep.borrow_mut();
                match sleep.keys().next().copied() {
                    Some(key) if key.0 <= now => sleep.remove(&key).expect("sleep entry vanished"),
                    _ => break,
                }
            };
            fiber.sleep_key.lock().take();
            fiber.unlink_hook(hook::SLEEP);

            let alt = fiber.alt.load(Ordering::Acquire);
            if alt.is_null() {
                schedule(fiber);
            } else {
                // The alt pointer stays valid while the fiber is parked in
                // select(); claim the timeout before waking.
                if unsafe { (*alt).try_timeout() } {
                    schedule(fiber);
                }
            }
        }
    }

    fn drain_remote(&self) {
        for fiber in self.shared.inbox.drain() {
            trace!("remote wakeup for fiber {}", fiber.id());
            self.make_ready_local(fiber);
        }
    }

    fn reap_terminated(&self) {
        let finished = std::mem::take(&mut *self.terminated.borrow_mut());
        for fiber in finished {
            trace!("reaping fiber {}", fiber.id());
            fiber.unlink_hook(hook::TERMINATED);
            fiber.unlink_hook(hook::WORK);
            self.work.borrow_mut().remove(&fiber.id());
            fiber.release_context();
            self.runtime.live.fetch_sub(1, Ordering::AcqRel);
        }
    }

    // ------------------------------------------------------------------
    // Running
    // ------------------------------------------------------------------

    /// Switch to `fiber` and resolve whatever it hands back. Returns the
    /// fiber itself if it yielded and should be requeued by the caller.
    fn run_fiber(&self, fiber: Arc<Fiber>) -> Option<Arc<Fiber>> {
        debug_assert!(!fiber.is_linked(hook::READY));
        debug_assert!(!fiber.is_linked(hook::SLEEP));
        fiber.wake.store(WAKE_RUNNING, Ordering::Release);

        *self.current.borrow_mut() = Some(fiber.clone());
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| fiber.resume()));
        *self.current.borrow_mut() = None;

        let switch = match outcome {
            Ok(switch) => switch,
            Err(payload) => {
                // A panic with a non-standard payload escaped the coroutine.
                // Record it and retire the fiber as terminated.
                self.runtime.record_panic(payload);
                fiber.finish();
                None
            }
        };

        match switch {
            Some(Switch::Yield) => return Some(fiber),
            Some(Switch::Park(data)) => {
                // Park before releasing the handed-off lock: any waker that
                // can observe the wait registration must see Parked.
                fiber.wake.store(WAKE_PARKED, Ordering::Release);
                if let Some(LockHandoff(lock)) = data.unlock {
                    unsafe { (*lock).release() };
                }
            }
            None => {
                fiber.link_hook(hook::TERMINATED);
                self.terminated.borrow_mut().push(fiber);
            }
        }
        None
    }

    /// The worker main loop; runs on the worker's native stack.
    fn run_loop(self: &Rc<Self>) {
        debug!("worker {} started", self.id);
        loop {
            self.reap_terminated();
            self.drain_remote();
            self.wakeup_sleepers();

            if let Some(fiber) = self.policy.pick_next(self) {
                if let Some(yielder) = self.run_fiber(fiber) {
                    // Pick the successor before requeueing: the LIFO deque
                    // would otherwise hand the yielder straight back.
                    let next = self.policy.pick_next(self);
                    self.policy.enqueue(self, yielder);
                    if let Some(next) = next {
                        if let Some(second) = self.run_fiber(next) {
                            self.policy.enqueue(self, second);
                        }
                    }
                }
                continue;
            }

            if self.runtime.live.load(Ordering::Acquire) == 0 {
                self.runtime.signal_exit();
            }
            if self.runtime.exiting() {
                break;
            }

            let deadline = self
                .earliest_sleep()
                .unwrap_or_else(|| Instant::now() + Duration::from_millis(1));
            self.policy.suspend_until(deadline);
        }
        self.reap_terminated();
        debug!("worker {} stopped", self.id);
    }
}

// ============================================================================
// Free functions used from fiber context
// ============================================================================

fn with_scheduler<R>(f: impl FnOnce(&Rc<Scheduler>) -> R) -> R {
    SCHEDULER.with(|cell| {
        let borrow = cell.borrow();
        let sched = borrow
            .as_ref()
            .expect("not running inside a weft runtime worker");
        f(sched)
    })
}

/// The fiber currently running on this thread.
///
/// Panics when called from outside a worker (there is no fiber to return).
pub(crate) fn current_fiber() -> Arc<Fiber> {
    with_scheduler(|sched| {
        sched
            .current
            .borrow()
            .clone()
            .unwrap_or_else(|| sched.main.clone())
    })
}

/// Worker id of the calling thread, if it is a runtime worker.
pub(crate) fn current_worker_id() -> Option<usize> {
    SCHEDULER.with(|cell| cell.borrow().as_ref().map(|s| s.id))
}

/// Wake a parked fiber. Safe against racing wake sources: only the
/// `Parked → Notified` transition enqueues, everything else coalesces.
pub(crate) fn schedule(fiber: Arc<Fiber>) {
    if fiber.wake.swap(WAKE_NOTIFIED, Ordering::AcqRel) != WAKE_PARKED {
        return;
    }
    let owner = fiber.owner.load(Ordering::Acquire);
    debug_assert_ne!(owner, NO_WORKER, "parked fiber has no owner");

    let local = SCHEDULER.with(|cell| match cell.borrow().as_ref() {
        Some(sched) if sched.id == owner => {
            sched.make_ready_local(fiber.clone());
            true
        }
        _ => false,
    });
    if local {
        return;
    }

    let runtime = fiber
        .runtime()
        .expect("woke a fiber of a dropped runtime");
    let target = &runtime.schedulers[owner];
    target.inbox.push(fiber);
    target.parker.unpark();
}

/// Park the running fiber, releasing `lock` on the scheduler's side of the
/// switch. On return another party has scheduled the fiber again.
pub(crate) fn park_with_lock(lock: &Spinlock) {
    let fiber = current_fiber();
    assert_eq!(
        fiber.kind(),
        FiberKind::Work,
        "blocking operation outside a fiber"
    );
    fiber.suspend(Switch::Park(ParkData {
        unlock: Some(LockHandoff(lock as *const Spinlock)),
    }));
}

/// Park the running fiber with nothing to release.
pub(crate) fn park() {
    let fiber = current_fiber();
    assert_eq!(
        fiber.kind(),
        FiberKind::Work,
        "blocking operation outside a fiber"
    );
    fiber.suspend(Switch::Park(ParkData { unlock: None }));
}

/// Link the running fiber into the sleep set under `deadline`.
/// Must be followed by a park before the worker loop runs again.
pub(crate) fn link_current_sleep(deadline: Instant) {
    with_scheduler(|sched| {
        let fiber = current_fiber();
        sched.link_sleep(&fiber, deadline);
    })
}

/// Yield the running fiber, letting other ready fibers run first.
/// A no-op when no other runnable work exists on this worker.
pub fn yield_now() {
    enum Caller {
        FiberWithWork,
        FiberIdle,
        NotAFiber,
    }
    let caller = SCHEDULER.with(|cell| match cell.borrow().as_ref() {
        Some(sched) if sched.current.borrow().is_some() => {
            if sched.policy.is_ready() || !sched.shared.inbox.is_empty() {
                Caller::FiberWithWork
            } else {
                Caller::FiberIdle
            }
        }
        Some(_) => Caller::NotAFiber,
        None => Caller::NotAFiber,
    });
    match caller {
        Caller::FiberWithWork => current_fiber().suspend(Switch::Yield),
        Caller::FiberIdle => {}
        Caller::NotAFiber => std::thread::yield_now(),
    }
}

/// Put the running fiber to sleep until `deadline`.
/// Returns `true` if the deadline passed (it always has, on return).
pub fn sleep_until(deadline: Instant) -> bool {
    if Instant::now() >= deadline {
        return true;
    }
    link_current_sleep(deadline);
    park();
    Instant::now() >= deadline
}

/// Put the running fiber to sleep for `duration`.
pub fn sleep_for(duration: Duration) {
    sleep_until(Instant::now() + duration);
}

/// Spawn a fiber onto the current runtime from inside another fiber.
///
/// The new fiber is committed to the calling worker's scheduler and may
/// migrate from there. Panics outside a runtime worker.
pub fn spawn<F>(entry: F) -> FiberHandle
where
    F: FnOnce() + Send + 'static,
{
    with_scheduler(|sched| {
        let fiber = Fiber::new_work(
            &sched.runtime,
            sched.runtime.config.stack_size,
            false,
            Box::new(entry),
        );
        sched.runtime.live.fetch_add(1, Ordering::AcqRel);
        sched.commit(fiber.clone());
        FiberHandle { fiber }
    })
}

/// Ask the current runtime to stop once its workers notice, abandoning any
/// fibers that are still parked. Callable from inside a fiber.
pub fn shutdown() {
    with_scheduler(|sched| sched.runtime.signal_exit());
}

// ============================================================================
// Runtime
// ============================================================================

/// A pool of worker threads multiplexing fibers.
///
/// Workers are started by [`Runtime::run`], which drives worker 0 on the
/// calling thread and returns once every fiber has terminated (or
/// [`shutdown`] was requested). A panic escaping any fiber is re-raised
/// from `run` on the calling thread.
pub struct Runtime {
    shared: Arc<RuntimeShared>,
    /// Deques handed to workers when `run` starts them.
    deques: Vec<Deque<Arc<Fiber>>>,
    ran: bool,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Runtime {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with an explicit configuration.
    pub fn with_config(config: RuntimeConfig) -> Runtime {
        crate::log::set_max_level(config.log_level);

        let mut deques = Vec::with_capacity(config.num_workers);
        let mut stealers = Vec::with_capacity(config.num_workers);
        let mut schedulers = Vec::with_capacity(config.num_workers);
        for _ in 0..config.num_workers {
            let deque = Deque::new_lifo();
            stealers.push(deque.stealer());
            deques.push(deque);
            schedulers.push(Arc::new(SchedulerShared {
                inbox: RemoteQueue::new(),
                parker: Arc::new(Parker::new()),
            }));
        }

        let shared = Arc::new(RuntimeShared {
            config,
            schedulers,
            injector: Arc::new(Injector::new()),
            stealers: Arc::new(stealers),
            exit: AtomicBool::new(false),
            live: AtomicUsize::new(0),
            panic: Mutex::new(None),
        });
        info!(
            "runtime: {} workers, {} KiB stacks, stealing {}",
            shared.config.num_workers,
            shared.config.stack_size / 1024,
            if shared.config.work_stealing { "on" } else { "off" }
        );

        Runtime {
            shared,
            deques,
            ran: false,
        }
    }

    /// Spawn a fiber before or between runs. The fiber starts executing
    /// once [`Runtime::run`] is driving the workers.
    pub fn spawn<F>(&self, entry: F) -> FiberHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_inner(entry, false)
    }

    /// Spawn a fiber that will never migrate off the worker that first
    /// picks it up.
    pub fn spawn_pinned<F>(&self, entry: F) -> FiberHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_inner(entry, true)
    }

    fn spawn_inner<F>(&self, entry: F, pinned: bool) -> FiberHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let fiber = Fiber::new_work(
            &self.shared,
            self.shared.config.stack_size,
            pinned,
            Box::new(entry),
        );
        self.shared.live.fetch_add(1, Ordering::AcqRel);
        self.shared.injector.push(fiber.clone());
        self.shared.schedulers[0].parker.unpark();
        FiberHandle { fiber }
    }

    /// Run every spawned fiber to completion.
    ///
    /// Spawns `num_workers - 1` OS threads and drives the remaining worker
    /// on the calling thread. Returns when the global live-fiber count
    /// reaches zero. Re-raises the first fiber panic, if any.
    pub fn run(&mut self) {
        assert!(!self.ran, "Runtime::run may only be called once");
        self.ran = true;

        let num_workers = self.shared.config.num_workers;
        let mut deques: Vec<_> = self.deques.drain(..).collect();

        let mut threads = Vec::with_capacity(num_workers.saturating_sub(1));
        for id in (1..num_workers).rev() {
            let deque = deques.pop().expect("deque per worker");
            let shared = self.shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("weft-worker-{id}"))
                .spawn(move || worker_main(id, shared, deque))
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }

        let deque = deques.pop().expect("deque for worker 0");
        worker_main(0, self.shared.clone(), deque);

        for handle in threads {
            let _ = handle.join();
        }

        if let Some(payload) = self.shared.panic.lock().take() {
            std::panic::resume_unwind(payload);
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

fn worker_main(id: usize, shared: Arc<RuntimeShared>, deque: Deque<Arc<Fiber>>) {
    let sched = Scheduler::new(id, shared, deque);
    SCHEDULER.with(|cell| *cell.borrow_mut() = Some(sched.clone()));
    sched.run_loop();
    SCHEDULER.with(|cell| *cell.borrow_mut() = None);
    // Dropping the scheduler releases any fibers abandoned by shutdown();
    // their stacks are unwound by the context drop.
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn test_run_empty() {
        let mut rt = Runtime::with_config(
            RuntimeConfig::builder().num_workers(1).build().unwrap(),
        );
        rt.run();
    }

    #[test]
    fn test_spawn_and_run() {
        let counter = Arc::new(AtomicI32::new(0));
        let mut rt = Runtime::with_config(
            RuntimeConfig::builder().num_workers(2).build().unwrap(),
        );
        for _ in 0..10 {
            let counter = counter.clone();
            rt.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        rt.run();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_nested_spawn_and_join() {
        let counter = Arc::new(AtomicI32::new(0));
        let mut rt = Runtime::with_config(
            RuntimeConfig::builder().num_workers(2).build().unwrap(),
        );
        {
            let counter = counter.clone();
            rt.spawn(move || {
                let inner = counter.clone();
                let handle = spawn(move || {
                    inner.fetch_add(1, Ordering::SeqCst);
                });
                handle.join();
                assert!(handle.is_finished());
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        rt.run();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_yield_interleaves() {
        let mut rt = Runtime::with_config(
            RuntimeConfig::builder().num_workers(1).build().unwrap(),
        );
        let trace: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..2u32 {
            let trace = trace.clone();
            rt.spawn(move || {
                for _ in 0..3 {
                    trace.lock().push(tag);
                    yield_now();
                }
            });
        }
        rt.run();
        let trace = trace.lock();
        assert_eq!(trace.len(), 6);
        // Both fibers made progress before either finished.
        assert!(trace[..4].contains(&0) && trace[..4].contains(&1));
    }

    #[test]
    fn test_sleep_for_duration() {
        let mut rt = Runtime::with_config(
            RuntimeConfig::builder().num_workers(1).build().unwrap(),
        );
        let elapsed = Arc::new(Mutex::new(Duration::ZERO));
        {
            let elapsed = elapsed.clone();
            rt.spawn(move || {
                let start = Instant::now();
                sleep_for(Duration::from_millis(20));
                *elapsed.lock() = start.elapsed();
            });
        }
        rt.run();
        assert!(*elapsed.lock() >= Duration::from_millis(20));
    }

    #[test]
    fn test_fiber_panic_propagates() {
        let mut rt = Runtime::with_config(
            RuntimeConfig::builder().num_workers(1).build().unwrap(),
        );
        rt.spawn(|| panic!("boom"));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| rt.run()));
        assert!(result.is_err());
    }

    #[test]
    fn test_work_stealing_spreads_load() {
        let counter = Arc::new(AtomicI32::new(0));
        let mut rt = Runtime::with_config(
            RuntimeConfig::builder().num_workers(4).build().unwrap(),
        );
        for _ in 0..100 {
            let counter = counter.clone();
            rt.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        rt.run();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_spawn_pinned_completes() {
        let counter = Arc::new(AtomicI32::new(0));
        let mut rt = Runtime::with_config(
            RuntimeConfig::builder().num_workers(4).build().unwrap(),
        );
        for _ in 0..8 {
            let counter = counter.clone();
            rt.spawn_pinned(move || {
                for _ in 0..4 {
                    yield_now();
                }
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        rt.run();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_shutdown_abandons_parked() {
        let mut rt = Runtime::with_config(
            RuntimeConfig::builder().num_workers(1).build().unwrap(),
        );
        rt.spawn(|| {
            // Sleeps far in the future; shutdown must not wait for it.
            crate::scheduler::shutdown();
            sleep_for(Duration::from_secs(3600));
        });
        let start = Instant::now();
        rt.run();
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
