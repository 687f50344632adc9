//! # Adaptive Spinlock
//!
//! Test-and-set lock with exponential backoff, used for the short critical
//! sections of the runtime: channel rendezvous slots, fiber wait queues and
//! alt selection state.
//!
//! ## Design
//!
//! The lock adapts its spin budget to the recent contention level: the number
//! of spins a successful acquisition needed is folded into a running estimate,
//! and the next acquisition spins up to roughly twice that before starting to
//! yield the OS thread. Collisions on the final exchange back off for a
//! randomized number of relaxed spins drawn from a per-lock xorshift state,
//! which keeps colliding threads from re-colliding in lockstep.
//!
//! The lock deliberately has no poisoning and no fairness guarantee; critical
//! sections in this crate are a handful of loads and stores.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Upper bound on busy-spins per acquisition round before yielding.
const MAX_TESTS: usize = 100;

/// Small xorshift64* generator behind an atomic word.
///
/// Racy read-modify-write is acceptable here: a lost update only perturbs
/// the sequence, and the consumers (backoff jitter, steal victim selection,
/// alt tie-breaking) want cheap noise, not statistical quality.
pub(crate) struct XorShift {
    state: AtomicU64,
}

impl XorShift {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU64::new(seed()),
        }
    }

    pub(crate) fn next(&self) -> u64 {
        let mut x = self.state.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state.store(x, Ordering::Relaxed);
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Uniform-enough draw in `0..bound`. `bound` must be non-zero.
    pub(crate) fn below(&self, bound: u64) -> u64 {
        self.next() % bound
    }
}

/// Derive a non-zero seed without dragging in an RNG dependency.
fn seed() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    let s = RandomState::new().build_hasher().finish();
    s | 1
}

/// Adaptive test-and-set spinlock.
///
/// `acquire`/`release` are exposed without a guard because the scheduler
/// hand-off protocol releases locks on behalf of a fiber after a context
/// switch; see [`crate::scheduler`]. [`Spinlock::lock`] provides a guard for
/// plain scoped use.
pub struct Spinlock {
    locked: AtomicBool,
    prev_tests: AtomicUsize,
    rng: XorShift,
}

impl Default for Spinlock {
    fn default() -> Self {
        Self::new()
    }
}

impl Spinlock {
    /// Create an unlocked spinlock.
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            prev_tests: AtomicUsize::new(0),
            rng: XorShift::new(),
        }
    }

    /// Acquire the lock, spinning adaptively.
    pub fn acquire(&self) {
        let mut collisions = 0u32;
        loop {
            let mut tests = 0usize;
            let prev = self.prev_tests.load(Ordering::Relaxed);
            let max_tests = MAX_TESTS.min(2 * prev + 10);

            while self.locked.load(Ordering::Relaxed) {
                tests += 1;
                if tests < max_tests {
                    std::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }

            if self.locked.swap(true, Ordering::Acquire) {
                // Collided with another acquirer; back off a randomized
                // number of relaxed spins before retrying.
                let cap = 1u64 << collisions.min(16);
                let z = self.rng.below(cap + 1);
                collisions += 1;
                for _ in 0..z {
                    std::hint::spin_loop();
                }
            } else {
                // Fold this acquisition's spin count into the estimate.
                let folded = prev + tests.saturating_sub(prev) / 8;
                self.prev_tests.store(folded, Ordering::Relaxed);
                return;
            }
        }
    }

    /// Try to acquire without spinning.
    pub fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release the lock. Caller must hold it.
    pub fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Acquire and return a scoped guard.
    pub fn lock(&self) -> SpinlockGuard<'_> {
        self.acquire();
        SpinlockGuard { lock: self }
    }
}

/// Guard returned by [`Spinlock::lock`]; releases on drop.
pub struct SpinlockGuard<'a> {
    lock: &'a Spinlock,
}

impl Drop for SpinlockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

// ============================================================================
// Tests
// ============================================================================
