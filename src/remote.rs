//! # Remote Wakeup Queue
//!
//! Lock-free multi-producer, single-consumer inbox used to deliver wakeups
//! across schedulers. Any thread may push; only the owning worker pops.
//!
//! The queue is intrusive: the link lives in the fiber itself
//! (`Fiber::remote_next`), so a push is a single CAS on the head with no
//! allocation. Pops drain the whole stack at once. The consumer re-enqueues
//! the fibers locally, so LIFO order inside one drain is acceptable; only
//! causal cross-scheduler delivery is promised, not ordering.
//!
//! A fiber is pushed at most once per park (guaranteed by the wake state
//! machine in [`crate::fiber`]), which is what makes the single intrusive
//! link sound.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::fiber::Fiber;

/// Intrusive Treiber stack of fibers awaiting wakeup on another scheduler.
pub(crate) struct RemoteQueue {
    head: AtomicPtr<Fiber>,
}

impl RemoteQueue {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Push a fiber; called from any thread. The Arc's reference is moved
    /// into the queue and recovered by `drain`.
    pub(crate) fn push(&self, fiber: Arc<Fiber>) {
        let node = Arc::into_raw(fiber) as *mut Fiber;
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).remote_next.store(head, Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Take every queued fiber. Only the owning worker calls this.
    pub(crate) fn drain(&self) -> Vec<Arc<Fiber>> {
        let mut node = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        let mut out = Vec::new();
        while !node.is_null() {
            let next = unsafe { (*node).remote_next.swap(ptr::null_mut(), Ordering::Relaxed) };
            out.push(unsafe { Arc::from_raw(node) });
            node = next;
        }
        out
    }

    /// Whether the queue currently looks empty (advisory).
    pub(crate) fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl Drop for RemoteQueue {
    fn drop(&mut self) {
        // Recover outstanding references so fibers are not leaked.
        let _ = self.drain();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_drain() {
        let q = RemoteQueue::new();
        assert!(q.is_empty());

        let a = Fiber::new_main(0);
        let b = Fiber::new_main(0);
        q.push(a.clone());
        q.push(b.clone());
        assert!(!q.is_empty());

        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert!(q.is_empty());
        // LIFO: last pushed comes out first.
        assert_eq!(drained[0].id(), b.id());
        assert_eq!(drained[1].id(), a.id());
    }

    #[test]
    fn test_concurrent_push() {
        let q = Arc::new(RemoteQueue::new());
        let fibers: Vec<_> = (0..64).map(|_| Fiber::new_main(0)).collect();
        let mut expected: Vec<_> = fibers.iter().map(|f| f.id()).collect();

        let handles: Vec<_> = fibers
            .chunks(16)
            .map(|chunk| {
                let q = q.clone();
                let chunk: Vec<_> = chunk.to_vec();
                std::thread::spawn(move || {
                    for f in chunk {
                        q.push(f);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut got: Vec<_> = q.drain().iter().map(|f| f.id()).collect();
        got.sort();
        expected.sort();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_drop_recovers_refs() {
        let f = Fiber::new_main(0);
        {
            let q = RemoteQueue::new();
            q.push(f.clone());
            // q dropped with a queued fiber
        }
        assert_eq!(Arc::strong_count(&f), 1);
    }
}
