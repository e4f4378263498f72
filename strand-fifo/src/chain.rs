//! The unbounded FIFO chain and its consume contract.
//!
//! A chain is a singly linked list of heap links with a permanent sentinel
//! at `base`. Producers append behind `tail` with a CAS on the last link's
//! `next` slot; the consumer advances `base` with a CAS, which is the
//! linearization point of a dequeue. Retired links go through the epoch
//! collector because a producer may still hold a reference to the link the
//! consumer just popped.
//!
//! Capping fixes the logical end of the stream: ordinary elements queued
//! before the cap drain in FIFO order, then every further consume of the
//! empty chain observes the cap payload.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};

/// A single link in the chain.
///
/// The payload slot is uninitialized on exactly one link at any time: the
/// sentinel currently installed at `base`. A link becomes the sentinel when
/// the consumer moves its payload out, and stops being reachable when the
/// next dequeue retires it.
struct Link<T> {
    slot: UnsafeCell<MaybeUninit<T>>,
    next: Atomic<Link<T>>,
}

impl<T> Link<T> {
    fn sentinel() -> Self {
        Self {
            slot: UnsafeCell::new(MaybeUninit::uninit()),
            next: Atomic::null(),
        }
    }

    fn new(payload: T) -> Self {
        Self {
            slot: UnsafeCell::new(MaybeUninit::new(payload)),
            next: Atomic::null(),
        }
    }
}

/// An unbounded multi-producer FIFO chain with a terminal cap.
///
/// `T` is the ordinary element type; `C` is the cap payload type. Both move
/// in whole: a payload is owned by the producer until `pass`, by the chain
/// until a consume wins, and by the consumer afterwards. The cap payload is
/// observed by clone on every consume of the drained chain and surrendered
/// by value on [`close`](Chain::close).
///
/// Any number of threads may `pass` concurrently. Consuming is memory-safe
/// from any thread, but the count bookkeeping and the stream contract
/// assume a single consumer loop at a time; wrap the chain's endpoints in a
/// [`DeployGuard`](crate::DeployGuard) to catch a second registration early.
///
/// # Example
///
/// ```
/// use strand_fifo::{Chain, Consumed};
///
/// let chain: Chain<u64, &'static str> = Chain::new();
/// chain.pass(1);
/// chain.pass(2);
/// assert!(chain.pass_cap(Some("end of stream")));
///
/// assert!(matches!(chain.try_consume(), Ok(Consumed::Element(1))));
/// assert!(matches!(chain.try_consume(), Ok(Consumed::Element(2))));
/// assert!(matches!(chain.try_consume(), Ok(Consumed::Done(Some("end of stream")))));
/// // the cap is terminal: it is observed again on every further consume
/// assert!(matches!(chain.try_consume(), Ok(Consumed::Done(_))));
/// ```
pub struct Chain<T, C = ()> {
    /// Always points at the current sentinel link.
    base: CachePadded<Atomic<Link<T>>>,
    /// Last link of the chain; may lag by one during an append.
    tail: CachePadded<Atomic<Link<T>>>,
    /// Ordinary (pre-cap) elements linked but not yet consumed.
    element_count: CachePadded<AtomicUsize>,
    /// Set once, after the cap cell below is published.
    capped: AtomicBool,
    /// The cap payload; null until the chain is capped, immutable after.
    cap: Atomic<Option<C>>,
    /// Sleep/wake side-channel for the blocking consume. Data transfer
    /// never happens under this lock.
    wait_lock: Mutex<()>,
    wait_cond: Condvar,
}

// Safety: payloads move producer -> chain -> consumer, so crossing threads
// requires `T: Send`. The cap payload is additionally cloned out of shared
// storage, so sharing the chain requires `C: Sync`.
unsafe impl<T: Send, C: Send> Send for Chain<T, C> {}
unsafe impl<T: Send, C: Send + Sync> Sync for Chain<T, C> {}

impl<T, C> Chain<T, C> {
    /// Creates an empty, uncapped chain.
    pub fn new() -> Self {
        // Both ends start on the same sentinel link.
        let guard = unsafe { epoch::unprotected() };
        let sentinel = Owned::new(Link::sentinel()).into_shared(guard);
        Self {
            base: CachePadded::new(Atomic::from(sentinel)),
            tail: CachePadded::new(Atomic::from(sentinel)),
            element_count: CachePadded::new(AtomicUsize::new(0)),
            capped: AtomicBool::new(false),
            cap: Atomic::null(),
            wait_lock: Mutex::new(()),
            wait_cond: Condvar::new(),
        }
    }

    /// Number of un-consumed ordinary elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.element_count.load(Ordering::Acquire)
    }

    /// Returns `true` if no ordinary element is waiting.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once the chain has been capped. Never reverts.
    #[inline]
    pub fn is_capped(&self) -> bool {
        self.capped.load(Ordering::Acquire)
    }

    /// Enqueues an ordinary element.
    ///
    /// Lock-free and unconditionally eventually successful: the CAS loop
    /// retries until this link is appended. Elements passed after the chain
    /// was capped are still linked (and freed at teardown) but are not
    /// counted as consumable and do not wake a blocked consumer.
    pub fn pass(&self, payload: T) {
        let guard = epoch::pin();
        let new = Owned::new(Link::new(payload)).into_shared(&guard);
        let backoff = Backoff::new();
        loop {
            let tail = self.tail.load(Ordering::Acquire, &guard);
            // Safety: tail is never null and the pin keeps the link alive
            // even if the consumer retires it concurrently.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, &guard);
            if next.is_null() {
                match tail_ref.next.compare_exchange(
                    Shared::null(),
                    new,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                ) {
                    Ok(_) => {
                        // Publish the new tail. Failure just means another
                        // thread already helped it forward.
                        let _ = self.tail.compare_exchange(
                            tail,
                            new,
                            Ordering::Release,
                            Ordering::Relaxed,
                            &guard,
                        );
                        break;
                    }
                    Err(_) => backoff.spin(),
                }
            } else {
                // The tail is lagging behind an append that already won;
                // help it forward before retrying.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                );
            }
        }
        if !self.capped.load(Ordering::Acquire) {
            self.element_count.fetch_add(1, Ordering::AcqRel);
            self.wake(false);
        }
    }

    /// Caps the chain, fixing the logical end of the stream.
    ///
    /// Only the first call ever succeeds; its payload becomes immutable and
    /// is delivered (cloned) by every consume of the drained chain. Returns
    /// whether *this* call performed the capping. A losing call's payload
    /// is dropped.
    pub fn pass_cap(&self, cap: Option<C>) -> bool {
        let guard = epoch::pin();
        // The cap cell is the gate: installing it decides the winner, and
        // the flag below is only raised after the payload is published, so
        // no thread can observe `capped` without the payload.
        match self.cap.compare_exchange(
            Shared::null(),
            Owned::new(cap),
            Ordering::Release,
            Ordering::Relaxed,
            &guard,
        ) {
            Ok(_) => {
                self.capped.store(true, Ordering::Release);
                self.wake(true);
                true
            }
            // The losing `Owned` rides back in the error and drops here.
            Err(_) => false,
        }
    }

    /// Core dequeue: pops one ordinary element if any is counted.
    fn consume_element(&self, guard: &Guard) -> Option<T> {
        let backoff = Backoff::new();
        while self.element_count.load(Ordering::Acquire) > 0 {
            let base = self.base.load(Ordering::Acquire, guard);
            // Safety: base is never null while the chain is live.
            let base_ref = unsafe { base.deref() };
            let next = base_ref.next.load(Ordering::Acquire, guard);
            let Some(next_ref) = (unsafe { next.as_ref() }) else {
                // Counted but not yet linked: a producer is between its
                // winning CAS and the count increment. It will finish.
                backoff.snooze();
                continue;
            };
            // Keep the tail from pointing at the link we are about to
            // retire: if it still sits on the sentinel, help it forward.
            let tail = self.tail.load(Ordering::Acquire, guard);
            if base == tail {
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
            }
            match self.base.compare_exchange(
                base,
                next,
                Ordering::Release,
                Ordering::Relaxed,
                guard,
            ) {
                Ok(_) => {
                    // The successor is the new sentinel; its payload moves
                    // out here, exactly once, by the CAS winner.
                    let payload = unsafe { (*next_ref.slot.get()).assume_init_read() };
                    self.element_count.fetch_sub(1, Ordering::AcqRel);
                    // Safety: the old sentinel is unreachable from `base`
                    // now; stragglers still holding it are pinned.
                    unsafe { guard.defer_destroy(base) };
                    return Some(payload);
                }
                Err(_) => backoff.spin(),
            }
        }
        None
    }

    /// Dequeues without blocking.
    ///
    /// Returns the next ordinary element in enqueue order, or
    /// [`Consumed::Done`] with a clone of the cap payload once the chain is
    /// capped and drained. [`WouldBlock`] means the chain is empty but not
    /// capped; the caller may retry, block via [`consume`](Chain::consume),
    /// or walk away.
    pub fn try_consume(&self) -> Result<Consumed<T, C>, WouldBlock>
    where
        C: Clone,
    {
        let guard = epoch::pin();
        if let Some(payload) = self.consume_element(&guard) {
            return Ok(Consumed::Element(payload));
        }
        if self.capped.load(Ordering::Acquire) {
            return Ok(Consumed::Done(self.clone_cap(&guard)));
        }
        Err(WouldBlock)
    }

    /// Dequeues, blocking until an element arrives or the chain is capped.
    ///
    /// Spins briefly before parking on the chain's condition variable; the
    /// epoch pin is released before every park so a sleeping consumer never
    /// stalls reclamation. Woken by every successful ordinary `pass` and by
    /// the winning `pass_cap`.
    pub fn consume(&self) -> Consumed<T, C>
    where
        C: Clone,
    {
        let backoff = Backoff::new();
        loop {
            match self.try_consume() {
                Ok(consumed) => return consumed,
                Err(WouldBlock) => {
                    if backoff.is_completed() {
                        break;
                    }
                    backoff.snooze();
                }
            }
        }
        let mut parked = self.wait_lock.lock().unwrap();
        loop {
            match self.try_consume() {
                Ok(consumed) => return consumed,
                Err(WouldBlock) => parked = self.wait_cond.wait(parked).unwrap(),
            }
        }
    }

    /// Tears the chain down, dropping every undelivered payload (pre- and
    /// post-cap) and returning the cap payload, whose disposal belongs to
    /// the caller.
    ///
    /// Exclusive access is required by the signature, so teardown can never
    /// race a producer or consumer. The chain is left valid and empty (and
    /// still capped, if it was); dropping it afterwards frees only the
    /// fresh sentinel.
    pub fn close(&mut self) -> Option<C> {
        // Safety: `&mut self` means no other thread holds the chain.
        let guard = unsafe { epoch::unprotected() };
        let sentinel = Owned::new(Link::sentinel()).into_shared(guard);
        let old_base = self.base.swap(sentinel, Ordering::AcqRel, guard);
        self.tail.store(sentinel, Ordering::Release);
        self.element_count.store(0, Ordering::Release);
        unsafe { Self::drain(old_base, guard) };
        let cap = self.cap.swap(Shared::null(), Ordering::AcqRel, guard);
        if cap.is_null() {
            None
        } else {
            // The payload leaves but the chain stays observably capped:
            // the raised flag must keep a cap cell behind it.
            self.cap.store(Owned::new(None), Ordering::Release);
            // Hand the original cap payload back by value.
            *unsafe { cap.into_owned() }.into_box()
        }
    }

    /// Frees a detached chain, dropping every payload behind the sentinel.
    ///
    /// # Safety
    ///
    /// `head` must be the former `base` of a chain no other thread can
    /// reach, and must not be freed again.
    unsafe fn drain(head: Shared<'_, Link<T>>, guard: &Guard) {
        let mut current = head;
        let mut is_sentinel = true;
        while !current.is_null() {
            let next = unsafe { current.deref() }.next.load(Ordering::Acquire, guard);
            let mut link = unsafe { current.into_owned() };
            if !is_sentinel {
                // Only the sentinel's slot is vacant.
                unsafe { link.slot.get_mut().assume_init_drop() };
            }
            drop(link);
            is_sentinel = false;
            current = next;
        }
    }

    fn clone_cap(&self, guard: &Guard) -> Option<C>
    where
        C: Clone,
    {
        let cap = self.cap.load(Ordering::Acquire, guard);
        // Safety: `capped` is only raised after the cap cell is installed,
        // and every caller checks the flag first.
        unsafe { cap.deref() }.clone()
    }

    /// Serializes with a sleeping consumer. Taking and releasing the wait
    /// lock means the consumer is either fully parked (the notify lands) or
    /// has not yet re-checked the chain (it will see the new state).
    fn wake(&self, all: bool) {
        drop(self.wait_lock.lock().unwrap());
        if all {
            self.wait_cond.notify_all();
        } else {
            self.wait_cond.notify_one();
        }
    }
}

impl<T, C> Drop for Chain<T, C> {
    fn drop(&mut self) {
        let guard = unsafe { epoch::unprotected() };
        let base = self.base.swap(Shared::null(), Ordering::AcqRel, guard);
        self.tail.store(Shared::null(), Ordering::Release);
        // Safety: exclusive access; the chain is never touched again.
        unsafe { Self::drain(base, guard) };
        let cap = self.cap.swap(Shared::null(), Ordering::AcqRel, guard);
        if !cap.is_null() {
            drop(unsafe { cap.into_owned() });
        }
    }
}

impl<T, C> Default for Chain<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C> fmt::Debug for Chain<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("len", &self.len())
            .field("capped", &self.is_capped())
            .finish_non_exhaustive()
    }
}

/// Outcome of a successful consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumed<T, C> {
    /// An ordinary element, delivered in enqueue order.
    Element(T),
    /// The chain is capped and drained; carries a clone of the cap payload.
    /// Terminal: every further consume reports this again.
    Done(Option<C>),
}

impl<T, C> Consumed<T, C> {
    /// Returns `true` for the terminal case.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// The chain is empty, not capped, and blocking was not requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WouldBlock;

impl fmt::Display for WouldBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain is empty and not capped")
    }
}

impl std::error::Error for WouldBlock {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let chain: Chain<u64> = Chain::new();
        chain.pass(1);
        chain.pass(2);
        chain.pass(3);

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.try_consume(), Ok(Consumed::Element(1)));
        assert_eq!(chain.try_consume(), Ok(Consumed::Element(2)));
        assert_eq!(chain.try_consume(), Ok(Consumed::Element(3)));
        assert_eq!(chain.try_consume(), Err(WouldBlock));
        assert!(chain.is_empty());
    }

    #[test]
    fn cap_is_terminal() {
        let chain: Chain<u64, &'static str> = Chain::new();
        chain.pass(10);
        chain.pass(20);
        assert!(chain.pass_cap(Some("capped")));

        assert_eq!(chain.try_consume(), Ok(Consumed::Element(10)));
        assert_eq!(chain.try_consume(), Ok(Consumed::Element(20)));
        assert_eq!(chain.try_consume(), Ok(Consumed::Done(Some("capped"))));
        // forever
        assert_eq!(chain.try_consume(), Ok(Consumed::Done(Some("capped"))));

        // a second cap always fails and the live payload stays put
        assert!(!chain.pass_cap(Some("usurper")));
        assert_eq!(chain.try_consume(), Ok(Consumed::Done(Some("capped"))));
    }

    #[test]
    fn cap_without_payload() {
        let chain: Chain<u64, u64> = Chain::new();
        assert!(chain.pass_cap(None));
        assert_eq!(chain.try_consume(), Ok(Consumed::Done(None)));
    }

    #[test]
    fn post_cap_passes_are_not_counted() {
        let chain: Chain<u64, ()> = Chain::new();
        assert!(chain.pass_cap(Some(())));
        chain.pass(99);
        assert_eq!(chain.len(), 0);
        assert_eq!(chain.try_consume(), Ok(Consumed::Done(Some(()))));
    }

    struct DropCounter(Arc<AtomicUsize>);
    impl PartialEq for DropCounter {
        fn eq(&self, other: &Self) -> bool {
            self.0.load(Ordering::SeqCst) == other.0.load(Ordering::SeqCst)
        }
    }
    impl std::fmt::Debug for DropCounter {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_tuple("DropCounter")
                .field(&self.0.load(Ordering::SeqCst))
                .finish()
        }
    }
    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn teardown_drops_every_undelivered_payload() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut chain: Chain<DropCounter, u64> = Chain::new();

        for _ in 0..3 {
            chain.pass(DropCounter(Arc::clone(&drops)));
        }
        assert!(chain.pass_cap(Some(7)));
        // one linked after the cap: never delivered, still freed
        chain.pass(DropCounter(Arc::clone(&drops)));

        let delivered = chain.try_consume();
        assert!(matches!(delivered, Ok(Consumed::Element(_))));
        drop(delivered);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        // close surrenders the cap instead of dropping it
        assert_eq!(chain.close(), Some(7));
        assert_eq!(drops.load(Ordering::SeqCst), 4);

        // the drained chain is still valid and still capped
        assert!(chain.is_capped());
        assert_eq!(chain.try_consume(), Ok(Consumed::Done(None)));
    }

    #[test]
    fn drop_frees_cap_payload() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let chain: Chain<u64, DropCounter> = Chain::new();
            assert!(chain.pass_cap(Some(DropCounter(Arc::clone(&drops)))));
            // the losing cap is dropped immediately
            assert!(!chain.pass_cap(Some(DropCounter(Arc::clone(&drops)))));
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn blocking_consume_wakes_on_pass() {
        let chain: Arc<Chain<u64>> = Arc::new(Chain::new());
        let consumer = {
            let chain = Arc::clone(&chain);
            thread::spawn(move || chain.consume())
        };
        thread::sleep(Duration::from_millis(50));
        chain.pass(42);
        assert_eq!(consumer.join().unwrap(), Consumed::Element(42));
    }

    #[test]
    fn blocking_consume_wakes_on_cap() {
        let chain: Arc<Chain<u64, &'static str>> = Arc::new(Chain::new());
        let consumer = {
            let chain = Arc::clone(&chain);
            thread::spawn(move || chain.consume())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(chain.pass_cap(Some("bye")));
        assert_eq!(consumer.join().unwrap(), Consumed::Done(Some("bye")));
    }

    #[test]
    fn multi_producer_preserves_per_producer_order() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 1_000;

        let chain: Arc<Chain<u64, ()>> = Arc::new(Chain::new());
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|id| {
                let chain = Arc::clone(&chain);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        chain.pass(id * PER_PRODUCER + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(chain.pass_cap(None));

        let mut last_seen = [None::<u64>; PRODUCERS as usize];
        let mut total = 0u64;
        loop {
            match chain.consume() {
                Consumed::Element(value) => {
                    let producer = (value / PER_PRODUCER) as usize;
                    if let Some(previous) = last_seen[producer] {
                        assert!(previous < value, "producer {producer} reordered");
                    }
                    last_seen[producer] = Some(value);
                    total += 1;
                }
                Consumed::Done(None) => break,
                Consumed::Done(Some(())) => unreachable!(),
            }
        }
        assert_eq!(total, PRODUCERS * PER_PRODUCER);
    }

    #[test]
    fn count_matches_reachable_elements() {
        let chain: Chain<u64> = Chain::new();
        for i in 0..10 {
            chain.pass(i);
        }
        for expected in (0..10).rev() {
            assert!(matches!(chain.try_consume(), Ok(Consumed::Element(_))));
            assert_eq!(chain.len(), expected);
        }
    }
}
