//! # Alt: Guarded Choice
//!
//! Selection over several channel operations, an optional timeout and an
//! optional skip. Exactly one alternative commits per [`Alt::select`], and
//! its closure runs exactly once.
//!
//! ## Selection protocol
//!
//! The selection state shared with peers is three-phase and monotonic per
//! round: `Checking → Waiting → Done`, with the winning alternative held in
//! an atomic `selected` word that every party claims by compare-exchange.
//!
//! 1. **Enter.** Post an offer on every usable choice's channel. Choices
//!    whose channel appears in both directions in one alt clash and are
//!    excluded; a second same-direction choice on one channel is shadowed by
//!    the first.
//! 2. **Quick scan.** Collect the ready choices (a parked plain peer, or a
//!    peer alt that is itself waiting), shuffle them for fairness, and try
//!    to complete one. A peer alt still checking answers "try later"; after
//!    a bounded number of such rounds the alt gives up spinning.
//! 3. **Sleep.** Publish `Waiting`, rescan once (two alts that missed each
//!    other's offers cannot now both sleep: the second rescan happens after
//!    both offers are visible), then park under the alt spinlock, with the
//!    deadline in the scheduler's sleep set when a timeout is armed. Peers
//!    claim the selection by CAS while we sleep; the sleep expiry races the
//!    same word with a timeout mark.
//! 4. **Leave and run.** Withdraw remaining offers (idempotent) and run the
//!    winner's closure. A choice claimed because its channel closed is
//!    rescinded instead: the selection resets and re-runs without it.
//!
//! ## Cross-alt agreement
//!
//! When two alts meet on one channel, the completer holds the channel slot
//! lock and then both alt spinlocks in address order, and commits both
//! `selected` words together. A peer still `Checking` is never claimed;
//! both sides eventually pass their scans, so at least one reaches
//! `Waiting` and becomes claimable, and livelock cannot occur.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::channel::{Attempt, ChanId, Enter, Rx, Tx};
use crate::fiber::{Fiber, FiberKind};
use crate::scheduler;
use crate::spinlock::{Spinlock, XorShift};
use crate::timer::Timer;

/// Selection is scanning its choices; not claimable.
pub(crate) const ALT_CHECKING: u8 = 0;
/// Selection is parked (or about to park); claimable by peers.
pub(crate) const ALT_WAITING: u8 = 1;
/// Selection finished.
pub(crate) const ALT_DONE: u8 = 2;

/// `selected` sentinel: nothing claimed yet.
const SEL_NONE: usize = usize::MAX;
/// `selected` sentinel: the timeout fired.
const SEL_TIMEOUT: usize = usize::MAX - 1;
/// `selected` sentinel: the skip branch was taken.
const SEL_SKIP: usize = usize::MAX - 2;

/// Encode a claimed choice index plus a closed-channel mark.
fn encode(choice: usize, closed: bool) -> usize {
    (choice << 1) | closed as usize
}

fn decode(value: usize) -> (usize, bool) {
    (value >> 1, value & 1 == 1)
}

/// Spin rounds tolerated against peers still checking before sleeping.
const CHECK_ROUNDS: u32 = 64;

/// Result of claiming a peer selection from outside.
pub(crate) enum Claim {
    /// We own the peer's selection; complete the transfer and wake it.
    Won,
    /// Peer is still checking; retry shortly.
    Busy,
    /// Peer already has a winner; its offer is stale.
    Dead,
}

/// Peer selection state as seen under its spinlock.
pub(crate) enum PeerState {
    Checking,
    Claimable,
    Dead,
}

/// The part of a selection that peers touch: shared atomically between the
/// selecting fiber, completing peers, closing channels, and the sleep
/// expiry on the owning scheduler.
pub(crate) struct AltShared {
    pub(crate) state: AtomicU8,
    selected: AtomicUsize,
    pub(crate) splk: Spinlock,
    pub(crate) fiber: Arc<Fiber>,
}

impl AltShared {
    fn new(fiber: Arc<Fiber>) -> Self {
        Self {
            state: AtomicU8::new(ALT_CHECKING),
            selected: AtomicUsize::new(SEL_NONE),
            splk: Spinlock::new(),
            fiber,
        }
    }

    pub(crate) fn is_selected(&self) -> bool {
        self.selected.load(Ordering::Acquire) != SEL_NONE
    }

    /// Claim our own selection for `choice`. Callers in the checking phase
    /// are unclaimable and always win; callers in the waiting phase must
    /// hold `splk`.
    pub(crate) fn claim_self(&self, choice: usize) -> bool {
        self.selected
            .compare_exchange(SEL_NONE, encode(choice, false), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Peer state for a claimant holding `splk`.
    pub(crate) fn claim_state(&self) -> PeerState {
        match self.state.load(Ordering::Acquire) {
            ALT_CHECKING => PeerState::Checking,
            ALT_DONE => PeerState::Dead,
            _ => {
                if self.is_selected() {
                    PeerState::Dead
                } else {
                    PeerState::Claimable
                }
            }
        }
    }

    /// Race the timeout against peer claims; called by the owning scheduler
    /// when the sleep deadline expires. True if the timeout won.
    pub(crate) fn try_timeout(&self) -> bool {
        self.splk.acquire();
        let won = self
            .selected
            .compare_exchange(SEL_NONE, SEL_TIMEOUT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.splk.release();
        won
    }
}

/// Claim a peer alt's selection for the choice its offer carries.
///
/// # Safety
///
/// `alt` must come from an offer currently held in a channel slot whose
/// lock the caller holds; that pins the selection (it cannot leave its
/// offers without the slot lock).
pub(crate) unsafe fn claim_peer(alt: *const AltShared, choice: usize, closed: bool) -> Claim {
    let alt = &*alt;
    alt.splk.acquire();
    let claim = match alt.state.load(Ordering::Acquire) {
        ALT_CHECKING => Claim::Busy,
        ALT_DONE => Claim::Dead,
        _ => {
            if alt
                .selected
                .compare_exchange(
                    SEL_NONE,
                    encode(choice, closed),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                Claim::Won
            } else {
                Claim::Dead
            }
        }
    };
    alt.splk.release();
    claim
}

// ============================================================================
// Choices
// ============================================================================

/// One alternative within an alt: the operations the selection engine needs
/// from a channel end, type-erased over the item type.
trait Choice {
    fn chan_id(&self) -> ChanId;
    fn enter(&self, shared: &AltShared, idx: usize) -> Enter;
    fn leave(&self, shared: &AltShared, idx: usize);
    fn is_ready(&self) -> bool;
    fn try_complete(&self, shared: &AltShared, idx: usize) -> Attempt;
    /// Run the winning closure. Called exactly once, for the winner only.
    fn run(&mut self);
}

struct ChoiceSend<'a, T: Send> {
    tx: &'a Tx<T>,
    /// Item storage the posted offer points into; stable because the choice
    /// is boxed.
    item: std::cell::UnsafeCell<Option<T>>,
    run_fn: Option<Box<dyn FnOnce() + 'a>>,
}

impl<'a, T: Send> ChoiceSend<'a, T> {
    fn new(tx: &'a Tx<T>, item: T, run_fn: Option<Box<dyn FnOnce() + 'a>>) -> Self {
        Self {
            tx,
            item: std::cell::UnsafeCell::new(Some(item)),
            run_fn,
        }
    }
}

impl<T: Send> Choice for ChoiceSend<'_, T> {
    fn chan_id(&self) -> ChanId {
        self.tx.id()
    }

    fn enter(&self, shared: &AltShared, idx: usize) -> Enter {
        self.tx.chan.alt_send_enter(
            shared as *const AltShared,
            idx,
            shared.fiber.clone(),
            self.item.get(),
        )
    }

    fn leave(&self, shared: &AltShared, idx: usize) {
        self.tx.chan.alt_send_leave(shared as *const AltShared, idx);
    }

    fn is_ready(&self) -> bool {
        self.tx.chan.alt_send_ready()
    }

    fn try_complete(&self, shared: &AltShared, idx: usize) -> Attempt {
        self.tx.chan.alt_send_complete(shared, idx, self.item.get())
    }

    fn run(&mut self) {
        debug_assert!(
            unsafe { (*self.item.get()).is_none() },
            "send choice won but kept its item"
        );
        if let Some(f) = self.run_fn.take() {
            f();
        }
    }
}

struct ChoiceRecv<'a, T: Send> {
    rx: &'a Rx<T>,
    /// Destination storage the posted offer points into.
    item: std::cell::UnsafeCell<Option<T>>,
    run_fn: Option<Box<dyn FnOnce(T) + 'a>>,
}

impl<'a, T: Send> ChoiceRecv<'a, T> {
    fn new(rx: &'a Rx<T>, run_fn: Option<Box<dyn FnOnce(T) + 'a>>) -> Self {
        Self {
            rx,
            item: std::cell::UnsafeCell::new(None),
            run_fn,
        }
    }
}

impl<T: Send> Choice for ChoiceRecv<'_, T> {
    fn chan_id(&self) -> ChanId {
        self.rx.id()
    }

    fn enter(&self, shared: &AltShared, idx: usize) -> Enter {
        self.rx.chan.alt_recv_enter(
            shared as *const AltShared,
            idx,
            shared.fiber.clone(),
            self.item.get(),
        )
    }

    fn leave(&self, shared: &AltShared, idx: usize) {
        self.rx.chan.alt_recv_leave(shared as *const AltShared, idx);
    }

    fn is_ready(&self) -> bool {
        self.rx.chan.alt_recv_ready()
    }

    fn try_complete(&self, shared: &AltShared, idx: usize) -> Attempt {
        self.rx.chan.alt_recv_complete(shared, idx, self.item.get())
    }

    fn run(&mut self) {
        let item = unsafe { (*self.item.get()).take() };
        debug_assert!(item.is_some(), "recv choice won without an item");
        if let (Some(f), Some(item)) = (self.run_fn.take(), item) {
            f(item);
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Clone, Copy, PartialEq)]
enum Dir {
    Send,
    Recv,
    Clash,
}

struct Audit {
    dir: Dir,
    /// Index of the choice that posts the offer for this channel/direction;
    /// later duplicates are shadowed.
    first: usize,
}

enum Winner {
    Choice(usize),
    Timeout,
    Skip,
}

/// Builder and selection engine for guarded choice.
///
/// Owned by the constructing fiber; neither clonable nor shareable. Built
/// by chaining choice registrations, consumed by [`Alt::select`].
pub struct Alt<'a> {
    shared: AltShared,
    choices: Vec<Box<dyn Choice + 'a>>,
    audit: HashMap<ChanId, Audit>,
    deadline: Option<Instant>,
    timer_fn: Option<Box<dyn FnOnce() + 'a>>,
    has_skip: bool,
    skip_fn: Option<Box<dyn FnOnce() + 'a>>,
    rng: XorShift,
}

impl<'a> Alt<'a> {
    /// Start building a selection for the calling fiber.
    ///
    /// Panics outside a fiber: a selection must be able to park.
    pub fn new() -> Alt<'a> {
        let fiber = scheduler::current_fiber();
        assert_eq!(
            fiber.kind(),
            FiberKind::Work,
            "alt selection outside a fiber"
        );
        Alt {
            shared: AltShared::new(fiber),
            choices: Vec::new(),
            audit: HashMap::new(),
            deadline: None,
            timer_fn: None,
            has_skip: false,
            skip_fn: None,
            rng: XorShift::new(),
        }
    }

    fn add_choice(&mut self, dir: Dir, choice: Box<dyn Choice + 'a>) {
        let id = choice.chan_id();
        let idx = self.choices.len();
        match self.audit.get_mut(&id) {
            None => {
                self.audit.insert(id, Audit { dir, first: idx });
            }
            Some(audit) if audit.dir == dir => {
                // Same direction again: shadowed duplicate, kept only so
                // indices stay stable.
            }
            Some(audit) => {
                // Both directions on one channel: selecting either could
                // rendezvous the alt with itself. The channel is excluded.
                audit.dir = Dir::Clash;
            }
        }
        self.choices.push(choice);
    }

    /// Offer to send `item` on `tx`.
    pub fn send<T: Send + 'a>(mut self, tx: &'a Tx<T>, item: T) -> Self {
        if !tx.is_closed() {
            self.add_choice(Dir::Send, Box::new(ChoiceSend::new(tx, item, None)));
        }
        self
    }

    /// Offer to send `item` on `tx`, running `f` if this choice wins.
    pub fn send_then<T, F>(mut self, tx: &'a Tx<T>, item: T, f: F) -> Self
    where
        T: Send + 'a,
        F: FnOnce() + 'a,
    {
        if !tx.is_closed() {
            self.add_choice(
                Dir::Send,
                Box::new(ChoiceSend::new(tx, item, Some(Box::new(f)))),
            );
        }
        self
    }

    /// Guarded send: registered only when `guard` holds.
    pub fn send_if<T: Send + 'a>(self, guard: bool, tx: &'a Tx<T>, item: T) -> Self {
        if guard {
            self.send(tx, item)
        } else {
            self
        }
    }

    /// Guarded send with a closure.
    pub fn send_if_then<T, F>(self, guard: bool, tx: &'a Tx<T>, item: T, f: F) -> Self
    where
        T: Send + 'a,
        F: FnOnce() + 'a,
    {
        if guard {
            self.send_then(tx, item, f)
        } else {
            self
        }
    }

    /// Replicated send: offer `item` on every sender in `txs`.
    pub fn send_for<I, T>(mut self, txs: I, item: T) -> Self
    where
        I: IntoIterator<Item = &'a Tx<T>>,
        T: Send + Clone + 'a,
    {
        for tx in txs {
            self = self.send(tx, item.clone());
        }
        self
    }

    /// Guarded replicated send.
    pub fn send_for_if<I, T>(self, guard: bool, txs: I, item: T) -> Self
    where
        I: IntoIterator<Item = &'a Tx<T>>,
        T: Send + Clone + 'a,
    {
        if guard {
            self.send_for(txs, item)
        } else {
            self
        }
    }

    /// Offer to receive on `rx`, running `f` with the item if this choice
    /// wins.
    pub fn recv<T, F>(mut self, rx: &'a Rx<T>, f: F) -> Self
    where
        T: Send + 'a,
        F: FnOnce(T) + 'a,
    {
        if !rx.is_closed() {
            self.add_choice(
                Dir::Recv,
                Box::new(ChoiceRecv::new(rx, Some(Box::new(f)))),
            );
        }
        self
    }

    /// Guarded receive: registered only when `guard` holds.
    pub fn recv_if<T, F>(self, guard: bool, rx: &'a Rx<T>, f: F) -> Self
    where
        T: Send + 'a,
        F: FnOnce(T) + 'a,
    {
        if guard {
            self.recv(rx, f)
        } else {
            self
        }
    }

    /// Replicated receive over every receiver in `rxs`; the shared closure
    /// runs with the item of whichever choice wins.
    pub fn recv_for<I, T, F>(mut self, rxs: I, f: F) -> Self
    where
        I: IntoIterator<Item = &'a Rx<T>>,
        T: Send + 'a,
        F: FnMut(T) + 'a,
    {
        let f = std::rc::Rc::new(std::cell::RefCell::new(f));
        for rx in rxs {
            let f = f.clone();
            self = self.recv(rx, move |item| (f.borrow_mut())(item));
        }
        self
    }

    /// Guarded replicated receive.
    pub fn recv_for_if<I, T, F>(self, guard: bool, rxs: I, f: F) -> Self
    where
        I: IntoIterator<Item = &'a Rx<T>>,
        T: Send + 'a,
        F: FnMut(T) + 'a,
    {
        if guard {
            self.recv_for(rxs, f)
        } else {
            self
        }
    }

    /// Arm a timeout. Multiple timeouts fold to the earliest deadline.
    pub fn timeout<Tm: Timer>(mut self, timer: &Tm) -> Self {
        let deadline = timer.deadline();
        if self.deadline.map_or(true, |tp| deadline < tp) {
            self.deadline = Some(deadline);
            self.timer_fn = None;
        }
        self
    }

    /// Arm a timeout, running `f` if it fires.
    pub fn timeout_then<Tm, F>(mut self, timer: &Tm, f: F) -> Self
    where
        Tm: Timer,
        F: FnOnce() + 'a,
    {
        let deadline = timer.deadline();
        if self.deadline.map_or(true, |tp| deadline < tp) {
            self.deadline = Some(deadline);
            self.timer_fn = Some(Box::new(f));
        }
        self
    }

    /// Guarded timeout.
    pub fn timeout_if<Tm, F>(self, guard: bool, timer: &Tm, f: F) -> Self
    where
        Tm: Timer,
        F: FnOnce() + 'a,
    {
        if guard {
            self.timeout_then(timer, f)
        } else {
            self
        }
    }

    /// Make the selection non-blocking: skip when nothing is immediately
    /// committable.
    pub fn skip(mut self) -> Self {
        self.has_skip = true;
        self
    }

    /// Non-blocking selection, running `f` when the skip branch is taken.
    pub fn skip_then<F: FnOnce() + 'a>(mut self, f: F) -> Self {
        self.has_skip = true;
        self.skip_fn = Some(Box::new(f));
        self
    }

    /// Guarded skip.
    pub fn skip_if<F: FnOnce() + 'a>(self, guard: bool, f: F) -> Self {
        if guard {
            self.skip_then(f)
        } else {
            self
        }
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Commit exactly one alternative and run its closure.
    pub fn select(mut self) {
        let winner = self.decide();

        self.shared.state.store(ALT_DONE, Ordering::SeqCst);

        // Withdraw whatever offers are still posted; completed or closed
        // ones are already gone and leaving is idempotent.
        for (idx, choice) in self.choices.iter().enumerate() {
            choice.leave(&self.shared, idx);
        }

        match winner {
            Winner::Choice(idx) => self.choices[idx].run(),
            Winner::Timeout => {
                if let Some(f) = self.timer_fn.take() {
                    f();
                }
            }
            Winner::Skip => {
                if let Some(f) = self.skip_fn.take() {
                    f();
                }
            }
        }
    }

    /// The selection loop: enter offers, scan, sleep, resolve claims.
    fn decide(&mut self) -> Winner {
        // Which choices post the offer for their channel; clashes and
        // duplicates are shadowed.
        let mut entered: Vec<usize> = Vec::with_capacity(self.choices.len());
        for (idx, choice) in self.choices.iter().enumerate() {
            let audit = &self.audit[&choice.chan_id()];
            if audit.dir == Dir::Clash || audit.first != idx {
                continue;
            }
            if let Enter::Installed = choice.enter(&self.shared, idx) {
                entered.push(idx);
            }
        }

        let mut rounds = 0u32;
        loop {
            if entered.is_empty() && !self.has_skip && self.deadline.is_none() {
                panic!("alt has no live choices, no timeout and no skip");
            }

            // Quick scan: ready choices, plus the timeout when it is
            // already due (a due timeout ties uniformly with ready work).
            let mut candidates: Vec<Option<usize>> = entered
                .iter()
                .filter(|&&idx| self.choices[idx].is_ready())
                .map(|&idx| Some(idx))
                .collect();
            if let Some(tp) = self.deadline {
                if Instant::now() >= tp {
                    candidates.push(None);
                }
            }
            self.shuffle(&mut candidates);

            let mut saw_checking_peer = false;
            let mut rescinded = false;
            for candidate in candidates {
                match candidate {
                    None => {
                        // Timeout due: claim it ourselves. Unclaimable by
                        // peers while checking, so this always wins here.
                        let won = self
                            .shared
                            .selected
                            .compare_exchange(
                                SEL_NONE,
                                SEL_TIMEOUT,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_ok();
                        debug_assert!(won, "timeout claim lost while checking");
                        return Winner::Timeout;
                    }
                    Some(idx) => match self.choices[idx].try_complete(&self.shared, idx) {
                        Attempt::Done => return Winner::Choice(idx),
                        Attempt::Superseded => match self.resolve_claim(&mut entered) {
                            Resolution::Win(winner) => return winner,
                            Resolution::Rescinded => {
                                rescinded = true;
                                break;
                            }
                        },
                        Attempt::TryLater => saw_checking_peer = true,
                        Attempt::Failed => {}
                    },
                }
            }
            if rescinded {
                continue;
            }

            if saw_checking_peer && rounds < CHECK_ROUNDS {
                rounds += 1;
                std::hint::spin_loop();
                continue;
            }

            if self.has_skip {
                let won = self
                    .shared
                    .selected
                    .compare_exchange(SEL_NONE, SEL_SKIP, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                debug_assert!(won, "skip claim lost while checking");
                return Winner::Skip;
            }

            // Publish Waiting, then rescan once: a peer alt that entered
            // its offers after our quick scan sees ours, and we see any
            // peer that published before this point.
            self.shared.state.store(ALT_WAITING, Ordering::SeqCst);
            let mut rescind = false;
            for idx in entered.clone() {
                if !self.choices[idx].is_ready() {
                    continue;
                }
                match self.choices[idx].try_complete(&self.shared, idx) {
                    Attempt::Done => return Winner::Choice(idx),
                    Attempt::Superseded => match self.resolve_claim(&mut entered) {
                        Resolution::Win(winner) => return winner,
                        Resolution::Rescinded => {
                            rescind = true;
                            break;
                        }
                    },
                    Attempt::TryLater | Attempt::Failed => {}
                }
            }
            if rescind {
                continue;
            }

            // Park until a peer claims us or the deadline fires.
            self.shared.splk.acquire();
            if !self.shared.is_selected() {
                let fiber = self.shared.fiber.clone();
                fiber.alt.store(
                    &self.shared as *const AltShared as *mut AltShared,
                    Ordering::Release,
                );
                if let Some(tp) = self.deadline {
                    scheduler::link_current_sleep(tp);
                }
                scheduler::park_with_lock(&self.shared.splk);
                fiber
                    .alt
                    .store(std::ptr::null_mut(), Ordering::Release);
            } else {
                self.shared.splk.release();
            }

            match self.resolve_claim(&mut entered) {
                Resolution::Win(winner) => return winner,
                Resolution::Rescinded => continue,
            }
        }
    }

    /// Interpret a committed `selected` word. A closed-channel claim drops
    /// the choice and resets the selection for another round.
    fn resolve_claim(&self, entered: &mut Vec<usize>) -> Resolution {
        let sel = self.shared.selected.load(Ordering::Acquire);
        debug_assert_ne!(sel, SEL_NONE, "resolving an unclaimed selection");
        if sel == SEL_TIMEOUT {
            return Resolution::Win(Winner::Timeout);
        }
        if sel == SEL_SKIP {
            return Resolution::Win(Winner::Skip);
        }
        let (idx, closed) = decode(sel);
        if !closed {
            return Resolution::Win(Winner::Choice(idx));
        }

        // The channel under `idx` closed. Drop the choice and go around.
        entered.retain(|&i| i != idx);
        self.shared.splk.acquire();
        self.shared.selected.store(SEL_NONE, Ordering::Release);
        self.shared.state.store(ALT_CHECKING, Ordering::Release);
        self.shared.splk.release();
        Resolution::Rescinded
    }

    /// Fisher–Yates over the candidate list.
    fn shuffle(&self, candidates: &mut [Option<usize>]) {
        for i in (1..candidates.len()).rev() {
            let j = self.rng.below(i as u64 + 1) as usize;
            candidates.swap(i, j);
        }
    }
}

impl Default for Alt<'_> {
    fn default() -> Self {
        Self::new()
    }
}

enum Resolution {
    Win(Winner),
    Rescinded,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        assert_eq!(decode(encode(0, false)), (0, false));
        assert_eq!(decode(encode(7, true)), (7, true));
        assert_eq!(decode(encode(123, false)), (123, false));
        assert_ne!(encode(0, false), SEL_NONE);
        assert_ne!(encode(0, false), SEL_TIMEOUT);
    }

    #[test]
    fn test_claim_states() {
        let shared = AltShared::new(crate::fiber::Fiber::new_main(0));
        assert!(matches!(shared.claim_state(), PeerState::Checking));

        shared.state.store(ALT_WAITING, Ordering::SeqCst);
        assert!(matches!(shared.claim_state(), PeerState::Claimable));

        assert!(shared.claim_self(3));
        assert!(matches!(shared.claim_state(), PeerState::Dead));
        assert!(!shared.claim_self(4));
    }

    #[test]
    fn test_timeout_race_single_winner() {
        let shared = AltShared::new(crate::fiber::Fiber::new_main(0));
        shared.state.store(ALT_WAITING, Ordering::SeqCst);
        assert!(shared.try_timeout());
        assert!(!shared.try_timeout());
        assert!(matches!(
            unsafe { claim_peer(&shared as *const AltShared, 0, false) },
            Claim::Dead
        ));
    }

    #[test]
    fn test_claim_peer_checking_is_busy() {
        let shared = AltShared::new(crate::fiber::Fiber::new_main(0));
        assert!(matches!(
            unsafe { claim_peer(&shared as *const AltShared, 1, false) },
            Claim::Busy
        ));
        shared.state.store(ALT_WAITING, Ordering::SeqCst);
        assert!(matches!(
            unsafe { claim_peer(&shared as *const AltShared, 1, false) },
            Claim::Won
        ));
        assert_eq!(shared.selected.load(Ordering::Acquire), encode(1, false));
    }
}
