//! # Rendezvous Channels
//!
//! Typed, unbuffered, point-to-point channels. A send and a receive meet at
//! a single rendezvous slot: whichever side arrives first parks inside the
//! slot, and the partner completes the transfer and wakes it. Both sides
//! observe completion before either resumes.
//!
//! ## The slot
//!
//! The slot holds at most one waiting end per direction, guarded by the
//! channel spinlock. An end is either a parked plain caller or an offer
//! posted by an alt selection ([`crate::alt`]). Item payloads move directly
//! between the two fibers' storage: the parked side publishes a pointer to
//! an `Option<T>` in its own frame, and the completing side moves the value
//! under the slot lock; the transfer happens entirely inside one critical
//! section or not at all.
//!
//! Parking hands the slot lock to the scheduler, which releases it only
//! after the switch completes; a partner can therefore never observe a
//! half-parked waiter.
//!
//! ## Closing
//!
//! Either handle closes the channel (first close wins; drop closes too).
//! Close wakes a parked plain waiter with `Closed` and rescinds alt offers
//! by claiming their selection with a closed mark, retrying while the
//! owning alt is still in its checking phase.

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alt::{claim_peer, AltShared, Claim, PeerState, ALT_WAITING};
use crate::fiber::Fiber;
use crate::scheduler;
use crate::spinlock::Spinlock;

/// Identity of a channel, shared by its two handles.
pub type ChanId = usize;

/// Error from a send operation; returns the unsent item.
pub enum SendError<T> {
    /// The channel is closed.
    Closed(T),
    /// The deadline passed before a receiver arrived.
    Timeout(T),
}

impl<T> SendError<T> {
    /// Recover the item that was not sent.
    pub fn into_inner(self) -> T {
        match self {
            SendError::Closed(item) | SendError::Timeout(item) => item,
        }
    }

    /// Whether the channel was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, SendError::Closed(_))
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed(_) => write!(f, "SendError::Closed(..)"),
            SendError::Timeout(_) => write!(f, "SendError::Timeout(..)"),
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed(_) => write!(f, "sending on a closed channel"),
            SendError::Timeout(_) => write!(f, "send timed out waiting for a receiver"),
        }
    }
}

impl<T> std::error::Error for SendError<T> {}

/// Error from a receive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// The channel is closed.
    Closed,
    /// The deadline passed before a sender arrived.
    Timeout,
}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecvError::Closed => write!(f, "receiving from a closed channel"),
            RecvError::Timeout => write!(f, "receive timed out waiting for a sender"),
        }
    }
}

impl std::error::Error for RecvError {}

/// A parked plain caller.
pub(crate) struct PlainEnd<T> {
    fiber: Arc<Fiber>,
    /// Sender side: `Some(item)` to be taken. Receiver side: `None` to be
    /// filled. Points into the parked fiber's frame; valid while this end
    /// sits in the slot.
    item: *mut Option<T>,
}

/// An offer posted by an alt selection.
pub(crate) struct AltEnd<T> {
    /// Selection state shared with the offering fiber. Valid while the
    /// offer sits in the slot: the owning alt cannot finish `select`
    /// without removing its offers under the slot lock.
    alt: *const AltShared,
    choice: usize,
    fiber: Arc<Fiber>,
    item: *mut Option<T>,
}

/// One waiting end of the rendezvous.
pub(crate) enum End<T> {
    Plain(PlainEnd<T>),
    Alt(AltEnd<T>),
}

/// The rendezvous slot: at most one waiting end per direction.
struct Slot<T> {
    tx: Option<End<T>>,
    rx: Option<End<T>>,
}

/// Result of posting an alt offer.
pub(crate) enum Enter {
    /// Offer installed; the slot may complete it later.
    Installed,
    /// The channel cannot take the offer (closed, or the direction is
    /// already occupied); the choice is dead for this selection.
    Dead,
}

/// Result of an alt completion attempt against this channel.
pub(crate) enum Attempt {
    /// Rendezvous performed; our own selection is committed.
    Done,
    /// Another party already won our selection; stop completing.
    Superseded,
    /// The peer is an alt still in its checking phase; try again shortly.
    TryLater,
    /// No committable peer (none waiting, withdrawn, or channel closed).
    Failed,
}

/// Shared channel object behind the two handles.
pub(crate) struct Chan<T> {
    closed: AtomicBool,
    splk: Spinlock,
    slot: UnsafeCell<Slot<T>>,
}

// SAFETY: the slot is only accessed under `splk`; item pointers inside ends
// are moved between threads but only dereferenced under the same lock while
// the owning fiber is parked.
unsafe impl<T: Send> Send for Chan<T> {}
unsafe impl<T: Send> Sync for Chan<T> {}

enum SendStatus {
    Done,
    Closed,
    TimedOut,
}

enum RecvStatus {
    Done,
    Closed,
    TimedOut,
}

/// Pause between contended retries: spin first, then let other fibers run.
fn contention_pause(round: u32) {
    if round < 8 {
        std::hint::spin_loop();
    } else {
        scheduler::yield_now();
    }
}

impl<T: Send> Chan<T> {
    fn new() -> Arc<Self> {
        Arc::new(Chan {
            closed: AtomicBool::new(false),
            splk: Spinlock::new(),
            slot: UnsafeCell::new(Slot { tx: None, rx: None }),
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Slot access; caller must hold `splk`.
    #[allow(clippy::mut_from_ref)]
    unsafe fn slot(&self) -> &mut Slot<T> {
        &mut *self.slot.get()
    }

    // ------------------------------------------------------------------
    // Plain operations
    // ------------------------------------------------------------------

    fn send_inner(&self, storage: &mut Option<T>, deadline: Option<Instant>) -> SendStatus {
        let mut round = 0u32;
        loop {
            self.splk.acquire();
            if self.is_closed() {
                self.splk.release();
                return SendStatus::Closed;
            }
            let slot = unsafe { self.slot() };

            match slot.rx.take() {
                Some(End::Plain(rx)) => {
                    // Blocking receiver parked: move the item and wake it.
                    unsafe { *rx.item = storage.take() };
                    self.splk.release();
                    scheduler::schedule(rx.fiber);
                    return SendStatus::Done;
                }
                Some(End::Alt(rx)) => match unsafe { claim_peer(rx.alt, rx.choice, false) } {
                    Claim::Won => {
                        unsafe { *rx.item = storage.take() };
                        self.splk.release();
                        scheduler::schedule(rx.fiber);
                        return SendStatus::Done;
                    }
                    Claim::Busy => {
                        // The offering alt is still scanning; leave the
                        // offer in place and retry.
                        slot.rx = Some(End::Alt(rx));
                        self.splk.release();
                        round += 1;
                        contention_pause(round);
                        continue;
                    }
                    Claim::Dead => {
                        // Stale offer from a selection that already
                        // committed elsewhere; discard and re-inspect.
                        self.splk.release();
                        continue;
                    }
                },
                None => {
                    if let Some(tp) = deadline {
                        if Instant::now() >= tp {
                            self.splk.release();
                            return SendStatus::TimedOut;
                        }
                    }
                    assert!(
                        slot.tx.is_none(),
                        "two concurrent senders on one rendezvous channel"
                    );
                    slot.tx = Some(End::Plain(PlainEnd {
                        fiber: scheduler::current_fiber(),
                        item: storage as *mut Option<T>,
                    }));
                    if let Some(tp) = deadline {
                        scheduler::link_current_sleep(tp);
                    }
                    scheduler::park_with_lock(&self.splk);
                    return self.sender_woke(storage);
                }
            }
        }
    }

    /// Resolve a sender wakeup: completed, closed out, or timed out.
    fn sender_woke(&self, storage: &mut Option<T>) -> SendStatus {
        self.splk.acquire();
        if storage.is_none() {
            self.splk.release();
            return SendStatus::Done;
        }
        // Item untouched: rescind our offer if it is still posted.
        let slot = unsafe { self.slot() };
        if let Some(End::Plain(p)) = &slot.tx {
            if std::ptr::eq(p.item, storage) {
                slot.tx = None;
            }
        }
        self.splk.release();
        if self.is_closed() {
            SendStatus::Closed
        } else {
            SendStatus::TimedOut
        }
    }

    fn recv_inner(&self, storage: &mut Option<T>, deadline: Option<Instant>) -> RecvStatus {
        let mut round = 0u32;
        loop {
            self.splk.acquire();
            if self.is_closed() {
                self.splk.release();
                return RecvStatus::Closed;
            }
            let slot = unsafe { self.slot() };

            match slot.tx.take() {
                Some(End::Plain(tx)) => {
                    *storage = unsafe { (*tx.item).take() };
                    debug_assert!(storage.is_some(), "parked sender without an item");
                    self.splk.release();
                    scheduler::schedule(tx.fiber);
                    return RecvStatus::Done;
                }
                Some(End::Alt(tx)) => match unsafe { claim_peer(tx.alt, tx.choice, false) } {
                    Claim::Won => {
                        *storage = unsafe { (*tx.item).take() };
                        debug_assert!(storage.is_some(), "alt send offer without an item");
                        self.splk.release();
                        scheduler::schedule(tx.fiber);
                        return RecvStatus::Done;
                    }
                    Claim::Busy => {
                        slot.tx = Some(End::Alt(tx));
                        self.splk.release();
                        round += 1;
                        contention_pause(round);
                        continue;
                    }
                    Claim::Dead => {
                        self.splk.release();
                        continue;
                    }
                },
                None => {
                    if let Some(tp) = deadline {
                        if Instant::now() >= tp {
                            self.splk.release();
                            return RecvStatus::TimedOut;
                        }
                    }
                    assert!(
                        slot.rx.is_none(),
                        "two concurrent receivers on one rendezvous channel"
                    );
                    slot.rx = Some(End::Plain(PlainEnd {
                        fiber: scheduler::current_fiber(),
                        item: storage as *mut Option<T>,
                    }));
                    if let Some(tp) = deadline {
                        scheduler::link_current_sleep(tp);
                    }
                    scheduler::park_with_lock(&self.splk);
                    return self.receiver_woke(storage);
                }
            }
        }
    }

    fn receiver_woke(&self, storage: &mut Option<T>) -> RecvStatus {
        self.splk.acquire();
        if storage.is_some() {
            self.splk.release();
            return RecvStatus::Done;
        }
        let slot = unsafe { self.slot() };
        if let Some(End::Plain(p)) = &slot.rx {
            if std::ptr::eq(p.item, storage) {
                slot.rx = None;
            }
        }
        self.splk.release();
        if self.is_closed() {
            RecvStatus::Closed
        } else {
            RecvStatus::TimedOut
        }
    }

    // ------------------------------------------------------------------
    // Close
    // ------------------------------------------------------------------

    pub(crate) fn close(&self) {
        let mut round = 0u32;
        loop {
            self.splk.acquire();
            self.closed.store(true, Ordering::Release);
            let slot = unsafe { self.slot() };

            let mut wake = Vec::new();
            let mut busy = false;

            match slot.tx.take() {
                Some(End::Plain(p)) => wake.push(p.fiber),
                Some(End::Alt(a)) => match unsafe { claim_peer(a.alt, a.choice, true) } {
                    Claim::Won => wake.push(a.fiber),
                    Claim::Busy => {
                        // Owner alt still scanning; repost and retry.
                        busy = true;
                        slot.tx = Some(End::Alt(a));
                    }
                    Claim::Dead => {}
                },
                None => {}
            }
            match slot.rx.take() {
                Some(End::Plain(p)) => wake.push(p.fiber),
                Some(End::Alt(a)) => match unsafe { claim_peer(a.alt, a.choice, true) } {
                    Claim::Won => wake.push(a.fiber),
                    Claim::Busy => {
                        busy = true;
                        slot.rx = Some(End::Alt(a));
                    }
                    Claim::Dead => {}
                },
                None => {}
            }

            self.splk.release();
            for fiber in wake {
                scheduler::schedule(fiber);
            }
            if !busy {
                return;
            }
            round += 1;
            contention_pause(round);
        }
    }

    // ------------------------------------------------------------------
    // Alt-mode protocol
    // ------------------------------------------------------------------
    /// Post a send offer from an alt selection.
    pub(crate) fn alt_send_enter(
        &self,
        alt: *const AltShared,
        choice: usize,
        fiber: Arc<Fiber>,
        item: *mut Option<T>,
    ) -> Enter {
        self.splk.acquire();
        if self.is_closed() {
            self.splk.release();
            return Enter::Dead;
        }
        let slot = unsafe { self.slot() };
        if slot.tx.is_some() {
            // A sender is already waiting or offering; an additional send
            // offer can never rendezvous ahead of it.
            self.splk.release();
            return Enter::Dead;
        }
        slot.tx = Some(End::Alt(AltEnd {
            alt,
            choice,
            fiber,
            item,
        }));
        self.splk.release();
        Enter::Installed
    }

    /// Post a receive offer from an alt selection.
    pub(crate) fn alt_recv_enter(
        &self,
        alt: *const AltShared,
        choice: usize,
        fiber: Arc<Fiber>,
        item: *mut Option<T>,
    ) -> Enter {
        self.splk.acquire();
        if self.is_closed() {
            self.splk.release();
            return Enter::Dead;
        }
        let slot = unsafe { self.slot() };
        if slot.rx.is_some() {
            self.splk.release();
            return Enter::Dead;
        }
        slot.rx = Some(End::Alt(AltEnd {
            alt,
            choice,
            fiber,
            item,
        }));
        self.splk.release();
        Enter::Installed
    }

    /// Withdraw a previously posted send offer. Idempotent.
    pub(crate) fn alt_send_leave(&self, alt: *const AltShared, choice: usize) {
        self.splk.acquire();
        let slot = unsafe { self.slot() };
        if let Some(End::Alt(a)) = &slot.tx {
            if std::ptr::eq(a.alt, alt) && a.choice == choice {
                slot.tx = None;
            }
        }
        self.splk.release();
    }

    /// Withdraw a previously posted receive offer. Idempotent.
    pub(crate) fn alt_recv_leave(&self, alt: *const AltShared, choice: usize) {
        self.splk.acquire();
        let slot = unsafe { self.slot() };
        if let Some(End::Alt(a)) = &slot.rx {
            if std::ptr::eq(a.alt, alt) && a.choice == choice {
                slot.rx = None;
            }
        }
        self.splk.release();
    }

    /// Whether a send offer currently has a committed peer: a parked plain
    /// receiver, or another alt's receive offer whose selection is parked.
    pub(crate) fn alt_send_ready(&self) -> bool {
        self.splk.acquire();
        let ready = !self.is_closed()
            && match &unsafe { self.slot() }.rx {
                Some(End::Plain(_)) => true,
                Some(End::Alt(a)) => {
                    unsafe { (*a.alt).state.load(Ordering::Acquire) == ALT_WAITING }
                }
                None => false,
            };
        self.splk.release();
        ready
    }

    /// Whether a receive offer currently has a committed peer.
    pub(crate) fn alt_recv_ready(&self) -> bool {
        self.splk.acquire();
        let ready = !self.is_closed()
            && match &unsafe { self.slot() }.tx {
                Some(End::Plain(_)) => true,
                Some(End::Alt(a)) => {
                    unsafe { (*a.alt).state.load(Ordering::Acquire) == ALT_WAITING }
                }
                None => false,
            };
        self.splk.release();
        ready
    }

    /// Attempt to complete a send choice: claim a waiting receiver, move
    /// the item from `item` into its storage, and wake it.
    pub(crate) fn alt_send_complete(
        &self,
        me: &AltShared,
        my_choice: usize,
        item: *mut Option<T>,
    ) -> Attempt {
        self.splk.acquire();
        if self.is_closed() {
            self.splk.release();
            return Attempt::Failed;
        }
        let slot = unsafe { self.slot() };

        match slot.rx.take() {
            None => {
                self.splk.release();
                Attempt::Failed
            }
            Some(End::Plain(rx)) => {
                me.splk.acquire();
                if !me.claim_self(my_choice) {
                    // Someone claimed our selection; the receiver stays.
                    me.splk.release();
                    slot.rx = Some(End::Plain(rx));
                    self.splk.release();
                    return Attempt::Superseded;
                }
                unsafe { *rx.item = (*item).take() };
                Self::remove_own_tx(slot, me, my_choice);
                me.splk.release();
                self.splk.release();
                scheduler::schedule(rx.fiber);
                Attempt::Done
            }
            Some(End::Alt(rx)) => {
                let peer = rx.alt;
                let (first, second) = order_locks(me as *const AltShared, peer);
                unsafe {
                    (*first).splk.acquire();
                    (*second).splk.acquire();
                }
                let attempt = unsafe { Self::complete_cross_send(slot, me, my_choice, &rx, item) };
                unsafe {
                    (*second).splk.release();
                    (*first).splk.release();
                }
                match attempt {
                    CrossOutcome::Done => {
                        self.splk.release();
                        scheduler::schedule(rx.fiber);
                        Attempt::Done
                    }
                    CrossOutcome::Superseded => {
                        slot.rx = Some(End::Alt(rx));
                        self.splk.release();
                        Attempt::Superseded
                    }
                    CrossOutcome::PeerChecking => {
                        slot.rx = Some(End::Alt(rx));
                        self.splk.release();
                        Attempt::TryLater
                    }
                    CrossOutcome::PeerDead => {
                        // Discard the stale offer.
                        self.splk.release();
                        Attempt::Failed
                    }
                }
            }
        }
    }

    /// Attempt to complete a receive choice: claim a waiting sender, move
    /// its item into `item`, and wake it.
    pub(crate) fn alt_recv_complete(
        &self,
        me: &AltShared,
        my_choice: usize,
        item: *mut Option<T>,
    ) -> Attempt {
        self.splk.acquire();
        if self.is_closed() {
            self.splk.release();
            return Attempt::Failed;
        }
        let slot = unsafe { self.slot() };

        match slot.tx.take() {
            None => {
                self.splk.release();
                Attempt::Failed
            }
            Some(End::Plain(tx)) => {
                me.splk.acquire();
                if !me.claim_self(my_choice) {
                    me.splk.release();
                    slot.tx = Some(End::Plain(tx));
                    self.splk.release();
                    return Attempt::Superseded;
                }
                unsafe { *item = (*tx.item).take() };
                debug_assert!(unsafe { (*item).is_some() }, "parked sender without an item");
                Self::remove_own_rx(slot, me, my_choice);
                me.splk.release();
                self.splk.release();
                scheduler::schedule(tx.fiber);
                Attempt::Done
            }
            Some(End::Alt(tx)) => {
                let peer = tx.alt;
                let (first, second) = order_locks(me as *const AltShared, peer);
                unsafe {
                    (*first).splk.acquire();
                    (*second).splk.acquire();
                }
                let attempt = unsafe { Self::complete_cross_recv(slot, me, my_choice, &tx, item) };
                unsafe {
                    (*second).splk.release();
                    (*first).splk.release();
                }
                match attempt {
                    CrossOutcome::Done => {
                        self.splk.release();
                        scheduler::schedule(tx.fiber);
                        Attempt::Done
                    }
                    CrossOutcome::Superseded => {
                        slot.tx = Some(End::Alt(tx));
                        self.splk.release();
                        Attempt::Superseded
                    }
                    CrossOutcome::PeerChecking => {
                        slot.tx = Some(End::Alt(tx));
                        self.splk.release();
                        Attempt::TryLater
                    }
                    CrossOutcome::PeerDead => {
                        self.splk.release();
                        Attempt::Failed
                    }
                }
            }
        }
    }

    /// Two-alt agreement for a send choice. Caller holds the slot lock and
    /// both alt spinlocks (address order).
    unsafe fn complete_cross_send(
        slot: &mut Slot<T>,
        me: &AltShared,
        my_choice: usize,
        rx: &AltEnd<T>,
        item: *mut Option<T>,
    ) -> CrossOutcome {
        let peer = &*rx.alt;
        if me.is_selected() {
            return CrossOutcome::Superseded;
        }
        match peer.claim_state() {
            PeerState::Checking => CrossOutcome::PeerChecking,
            PeerState::Dead => CrossOutcome::PeerDead,
            PeerState::Claimable => {
                let peer_won = peer.claim_self(rx.choice);
                debug_assert!(peer_won, "claimable peer lost its own claim under lock");
                let self_won = me.claim_self(my_choice);
                debug_assert!(self_won, "unselected alt lost its own claim under lock");
                *rx.item = (*item).take();
                Self::remove_own_tx(slot, me, my_choice);
                CrossOutcome::Done
            }
        }
    }

    /// Two-alt agreement for a receive choice; mirror of
    /// `complete_cross_send`.
    unsafe fn complete_cross_recv(
        slot: &mut Slot<T>,
        me: &AltShared,
        my_choice: usize,
        tx: &AltEnd<T>,
        item: *mut Option<T>,
    ) -> CrossOutcome {
        let peer = &*tx.alt;
        if me.is_selected() {
            return CrossOutcome::Superseded;
        }
        match peer.claim_state() {
            PeerState::Checking => CrossOutcome::PeerChecking,
            PeerState::Dead => CrossOutcome::PeerDead,
            PeerState::Claimable => {
                let peer_won = peer.claim_self(tx.choice);
                debug_assert!(peer_won, "claimable peer lost its own claim under lock");
                let self_won = me.claim_self(my_choice);
                debug_assert!(self_won, "unselected alt lost its own claim under lock");
                *item = (*tx.item).take();
                debug_assert!((*item).is_some(), "alt send offer without an item");
                Self::remove_own_rx(slot, me, my_choice);
                CrossOutcome::Done
            }
        }
    }

    /// Drop our own send offer on this channel once the choice commits.
    /// Caller holds the slot lock.
    fn remove_own_tx(slot: &mut Slot<T>, me: &AltShared, choice: usize) {
        if let Some(End::Alt(a)) = &slot.tx {
            if std::ptr::eq(a.alt, me as *const AltShared) && a.choice == choice {
                slot.tx = None;
            }
        }
    }

    /// Drop our own receive offer on this channel once the choice commits.
    fn remove_own_rx(slot: &mut Slot<T>, me: &AltShared, choice: usize) {
        if let Some(End::Alt(a)) = &slot.rx {
            if std::ptr::eq(a.alt, me as *const AltShared) && a.choice == choice {
                slot.rx = None;
            }
        }
    }
}

/// Outcome of a two-alt agreement attempt.
enum CrossOutcome {
    Done,
    Superseded,
    PeerChecking,
    PeerDead,
}

fn order_locks(a: *const AltShared, b: *const AltShared) -> (*const AltShared, *const AltShared) {
    debug_assert!(!std::ptr::eq(a, b), "alt completing against itself");
    if (a as usize) < (b as usize) {
        (a, b)
    } else {
        (b, a)
    }
}

// ============================================================================
// Handles
// ============================================================================

/// Create a rendezvous channel, returning its two handles.
pub fn create<T: Send + 'static>() -> (Tx<T>, Rx<T>) {
    let chan = Chan::new();
    (
        Tx {
            chan: chan.clone(),
            _not_sync: PhantomData,
        },
        Rx {
            chan,
            _not_sync: PhantomData,
        },
    )
}

/// Sending half of a rendezvous channel. One sender at a time: the handle
/// is movable but not clonable, and not shareable across threads.
pub struct Tx<T: Send> {
    pub(crate) chan: Arc<Chan<T>>,
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

impl<T: Send> Tx<T> {
    /// Identity shared with the paired receiver.
    pub fn id(&self) -> ChanId {
        Arc::as_ptr(&self.chan) as ChanId
    }

    /// Whether the channel has been closed from either side.
    pub fn is_closed(&self) -> bool {
        self.chan.is_closed()
    }

    /// Close the channel. Idempotent; wakes any parked peer.
    pub fn close(&self) {
        self.chan.close();
    }

    /// Send `item`, parking until a receiver takes it.
    pub fn send(&self, item: T) -> Result<(), SendError<T>> {
        let mut storage = Some(item);
        match self.chan.send_inner(&mut storage, None) {
            SendStatus::Done => Ok(()),
            SendStatus::Closed => Err(SendError::Closed(storage.take().expect("item preserved"))),
            SendStatus::TimedOut => unreachable!("send without deadline timed out"),
        }
    }

    /// Send `item`, giving up at `deadline`.
    pub fn send_until(&self, item: T, deadline: Instant) -> Result<(), SendError<T>> {
        let mut storage = Some(item);
        match self.chan.send_inner(&mut storage, Some(deadline)) {
            SendStatus::Done => Ok(()),
            SendStatus::Closed => Err(SendError::Closed(storage.take().expect("item preserved"))),
            SendStatus::TimedOut => {
                Err(SendError::Timeout(storage.take().expect("item preserved")))
            }
        }
    }

    /// Send `item`, giving up after `timeout`.
    pub fn send_for(&self, item: T, timeout: Duration) -> Result<(), SendError<T>> {
        self.send_until(item, Instant::now() + timeout)
    }
}

impl<T: Send> Drop for Tx<T> {
    fn drop(&mut self) {
        self.chan.close();
    }
}

impl<T: Send> fmt::Debug for Tx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tx")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving half of a rendezvous channel. One receiver at a time: the
/// handle is movable but not clonable, and not shareable across threads.
pub struct Rx<T: Send> {
    pub(crate) chan: Arc<Chan<T>>,
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

impl<T: Send> Rx<T> {
    /// Identity shared with the paired sender.
    pub fn id(&self) -> ChanId {
        Arc::as_ptr(&self.chan) as ChanId
    }

    /// Whether the channel has been closed from either side.
    pub fn is_closed(&self) -> bool {
        self.chan.is_closed()
    }

    /// Close the channel. Idempotent; wakes any parked peer.
    pub fn close(&self) {
        self.chan.close();
    }

    /// Receive an item, parking until a sender arrives.
    pub fn recv(&self) -> Result<T, RecvError> {
        let mut storage = None;
        match self.chan.recv_inner(&mut storage, None) {
            RecvStatus::Done => Ok(storage.take().expect("transfer filled storage")),
            RecvStatus::Closed => Err(RecvError::Closed),
            RecvStatus::TimedOut => unreachable!("recv without deadline timed out"),
        }
    }

    /// Receive an item, giving up at `deadline`.
    pub fn recv_until(&self, deadline: Instant) -> Result<T, RecvError> {
        let mut storage = None;
        match self.chan.recv_inner(&mut storage, Some(deadline)) {
            RecvStatus::Done => Ok(storage.take().expect("transfer filled storage")),
            RecvStatus::Closed => Err(RecvError::Closed),
            RecvStatus::TimedOut => Err(RecvError::Timeout),
        }
    }

    /// Receive an item, giving up after `timeout`.
    pub fn recv_for(&self, timeout: Duration) -> Result<T, RecvError> {
        self.recv_until(Instant::now() + timeout)
    }

    /// Iterate over received items until the channel closes.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { rx: self }
    }
}

impl<T: Send> Drop for Rx<T> {
    fn drop(&mut self) {
        self.chan.close();
    }
}

impl<T: Send> fmt::Debug for Rx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rx")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving iterator; ends when the channel closes.
pub struct Iter<'a, T: Send> {
    rx: &'a Rx<T>,
}

impl<T: Send> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.rx.recv().ok()
    }
}

impl<'a, T: Send> IntoIterator for &'a Rx<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_share_id() {
        let (tx1, rx1) = create::<i32>();
        let (tx2, rx2) = create::<i32>();
        assert_eq!(tx1.id(), rx1.id());
        assert_eq!(tx2.id(), rx2.id());
        assert_ne!(tx1.id(), tx2.id());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (tx, rx) = create::<i32>();
        assert!(!tx.is_closed());
        tx.close();
        assert!(tx.is_closed());
        assert!(rx.is_closed());
        tx.close();
        rx.close();
        assert!(rx.is_closed());
    }

    #[test]
    fn test_send_after_close_returns_item() {
        let (tx, rx) = create::<String>();
        rx.close();
        match tx.send("hello".to_string()) {
            Err(SendError::Closed(item)) => assert_eq!(item, "hello"),
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[test]
    fn test_recv_after_close() {
        let (tx, rx) = create::<i32>();
        tx.close();
        assert_eq!(rx.recv(), Err(RecvError::Closed));
        assert_eq!(rx.recv_for(Duration::from_millis(1)), Err(RecvError::Closed));
    }

    #[test]
    fn test_drop_closes() {
        let (tx, rx) = create::<i32>();
        drop(tx);
        assert!(rx.is_closed());
    }
}
