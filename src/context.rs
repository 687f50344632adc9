//! # Execution Context
//!
//! Wrapper around the stack-switching primitive. A fiber's saved machine
//! state and stack are provided by [`corosensei`]; this module adapts them to
//! the scheduler's switch protocol.
//!
//! ## Switch protocol
//!
//! A worker resumes a fiber's coroutine; the fiber runs until it either
//! finishes (the coroutine returns) or suspends by yielding a [`Switch`]
//! value back to the worker. The `Switch` carries the data the worker must
//! resolve *after* the stack switch has completed: typically a spinlock the
//! fiber held while publishing a wait registration. Releasing the lock on the
//! worker's side of the switch closes the lost-wakeup window, since no other
//! thread can observe the registration until the fiber is fully parked.

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

use crate::spinlock::Spinlock;

/// What a suspending fiber hands back to its worker.
pub(crate) enum Switch {
    /// Cooperative yield: requeue the fiber behind other ready work.
    Yield,
    /// Park the fiber until another party schedules it.
    Park(ParkData),
}

/// Data resolved by the worker after the switch completes.
pub(crate) struct ParkData {
    /// Spinlock to release once the fiber is parked. The pointee is kept
    /// alive by the parked fiber (it sits in a channel, a fiber, or the
    /// parked fiber's own stack frame) and is not touched after release.
    pub unlock: Option<LockHandoff>,
}

/// Raw pointer to a spinlock crossing the switch boundary.
pub(crate) struct LockHandoff(pub *const Spinlock);

// SAFETY: the pointer is dereferenced once, by the worker that received it,
// while the owning object is pinned by the parked fiber.
unsafe impl Send for LockHandoff {}

pub(crate) type FiberCoroutine = Coroutine<(), Switch, (), &'static mut DefaultStack>;
pub(crate) type FiberYielder = Yielder<(), Switch>;

/// A saved execution state plus the stack backing it.
///
/// Drop order matters: the coroutine must be dropped before the stack it
/// runs on, which the field order here guarantees.
pub(crate) struct ExecContext {
    coroutine: FiberCoroutine,
    #[allow(dead_code)] // owns the stack memory the coroutine runs on
    stack: Box<DefaultStack>,
}

impl ExecContext {
    /// Build a context running `body` on a fresh stack of `stack_size` bytes.
    ///
    /// `body` receives the yielder it must use for every suspension.
    pub(crate) fn new<F>(stack_size: usize, body: F) -> Self
    where
        F: FnOnce(&FiberYielder) + 'static,
    {
        let mut stack = Box::new(DefaultStack::new(stack_size).unwrap_or_else(|_| {
            DefaultStack::new(1024 * 1024).expect("fiber stack allocation failed")
        }));

        // Extend the stack borrow to 'static for the coroutine type.
        // SAFETY: the Box is stored alongside the coroutine and outlives it;
        // the heap allocation does not move when the Box is moved.
        let stack_ref = unsafe {
            std::mem::transmute::<&mut DefaultStack, &'static mut DefaultStack>(stack.as_mut())
        };

        let coroutine = Coroutine::with_stack(stack_ref, move |yielder, ()| {
            body(yielder);
        });

        Self { coroutine, stack }
    }

    /// Switch to this context. Returns the `Switch` the fiber yielded, or
    /// `None` when the fiber's entry has returned and the context is spent.
    pub(crate) fn resume(&mut self) -> Option<Switch> {
        match self.coroutine.resume(()) {
            CoroutineResult::Yield(sw) => Some(sw),
            CoroutineResult::Return(()) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_until_done() {
        let mut ctx = ExecContext::new(64 * 1024, |yielder| {
            yielder.suspend(Switch::Yield);
            yielder.suspend(Switch::Yield);
        });

        assert!(matches!(ctx.resume(), Some(Switch::Yield)));
        assert!(matches!(ctx.resume(), Some(Switch::Yield)));
        assert!(ctx.resume().is_none());
    }

    #[test]
    fn test_park_data_crosses_switch() {
        let lock = Box::leak(Box::new(Spinlock::new()));
        lock.acquire();
        let ptr = lock as *const Spinlock;

        let mut ctx = ExecContext::new(64 * 1024, move |yielder| {
            yielder.suspend(Switch::Park(ParkData {
                unlock: Some(LockHandoff(ptr)),
            }));
        });

        match ctx.resume() {
            Some(Switch::Park(data)) => {
                let handoff = data.unlock.unwrap();
                unsafe { (*handoff.0).release() };
            }
            _ => panic!("expected park"),
        }
        assert!(lock.try_acquire());
        lock.release();
    }
}
