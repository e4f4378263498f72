//! The keyed atomic list.
//!
//! A singly linked list of boxed nodes, prepended at the head. Insertion
//! is lock-free and may race with anything; removal, iteration, and close
//! coordinate through the sign-encoded [`gate`](crate::gate) instead of a
//! structure-wide mutex. Every free happens under the gate's exclusivity,
//! so no node can disappear beneath a walker and no deferred reclamation
//! is needed.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use crate::gate::{AccessGate, SharedPass};

struct KeyedLink<T> {
    /// Unique among resident nodes for the node's whole lifetime.
    key: u64,
    payload: T,
    next: AtomicPtr<KeyedLink<T>>,
}

/// An associative container keyed by an auto-incrementing 64-bit integer.
///
/// `insert` is lock-free from any thread. `remove`, `iterate`, and
/// [`try_close`](KeyedList::try_close) never block either: a caller that
/// loses the coordination race gets [`Contended`] back and retries.
/// Iteration order is most-recent-first (head insertion); no ordering among
/// keys is promised beyond uniqueness of the live ones.
///
/// # Example
///
/// ```
/// use strand_list::KeyedList;
///
/// let list = KeyedList::new();
/// let a = list.insert("alpha");
/// let b = list.insert("beta");
///
/// let mut seen = Vec::new();
/// list.iterate(|key, value| seen.push((key, *value))).unwrap();
/// assert_eq!(seen, vec![(b, "beta"), (a, "alpha")]);
///
/// assert_eq!(list.remove(a).unwrap(), Some("alpha"));
/// assert_eq!(list.remove(a).unwrap(), None);
/// ```
pub struct KeyedList<T> {
    base: CachePadded<AtomicPtr<KeyedLink<T>>>,
    element_count: CachePadded<AtomicUsize>,
    next_key: AtomicU64,
    gate: AccessGate,
}

// Safety: payloads are moved in on insert and out on remove (`T: Send`),
// and overlapping iterations hand `&T` to multiple threads at once
// (`T: Sync`).
unsafe impl<T: Send> Send for KeyedList<T> {}
unsafe impl<T: Send + Sync> Sync for KeyedList<T> {}

impl<T> KeyedList<T> {
    /// Creates an empty list. The first key issued is 0.
    pub fn new() -> Self {
        Self {
            base: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            element_count: CachePadded::new(AtomicUsize::new(0)),
            next_key: AtomicU64::new(0),
            gate: AccessGate::new(),
        }
    }

    /// Number of resident nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.element_count.load(Ordering::Acquire)
    }

    /// Returns `true` if no node is resident.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Issues the next key. The key after `u64::MAX` is 0; the counter
    /// wraps rather than overflowing.
    fn issue_key(&self) -> u64 {
        let backoff = Backoff::new();
        let mut current = self.next_key.load(Ordering::Acquire);
        loop {
            let next = if current == u64::MAX { 0 } else { current + 1 };
            match self.next_key.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current,
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }
    }

    /// Inserts a payload and returns its key.
    ///
    /// Lock-free: a CAS prepend at the head, retried until it wins. Never
    /// consults the gate, so it may race freely with iteration and with a
    /// pending removal, since prepending cannot corrupt a concurrently-read
    /// tail of the list.
    pub fn insert(&self, payload: T) -> u64 {
        let key = self.issue_key();
        let link = Box::into_raw(Box::new(KeyedLink {
            key,
            payload,
            next: AtomicPtr::new(ptr::null_mut()),
        }));
        let backoff = Backoff::new();
        let mut head = self.base.load(Ordering::Acquire);
        loop {
            // The link is unpublished until the CAS below succeeds, so the
            // plain store into `next` cannot be observed half-done.
            unsafe { (*link).next.store(head, Ordering::Relaxed) };
            match self
                .base
                .compare_exchange_weak(head, link, Ordering::Release, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => {
                    head = actual;
                    backoff.spin();
                }
            }
        }
        self.element_count.fetch_add(1, Ordering::AcqRel);
        key
    }

    /// Removes the node with the given key, returning its payload.
    ///
    /// `Err(Contended)` means another removal, iteration, or close holds
    /// the list; retry. `Ok(None)` means the key is not resident, which is
    /// a normal negative result, not an error. The returned payload is the
    /// caller's to inspect and drop; that drop is the deallocation.
    pub fn remove(&self, key: u64) -> Result<Option<T>, Contended> {
        if !self.gate.try_exclusive() {
            return Err(Contended);
        }
        // Safety: the gate grants this thread the sole right to unlink.
        let removed = unsafe { self.unlink(key) };
        self.gate.release_exclusive();
        Ok(removed)
    }

    /// Walks the list and unlinks the first match.
    ///
    /// # Safety
    ///
    /// The caller must hold the gate exclusively. Concurrent inserts are
    /// tolerated: they only move `base`, which makes the head CAS fail and
    /// sends us back around the walk.
    unsafe fn unlink(&self, key: u64) -> Option<T> {
        'walk: loop {
            let mut prev: Option<&KeyedLink<T>> = None;
            let mut current = self.base.load(Ordering::Acquire);
            while !current.is_null() {
                let link = unsafe { &*current };
                let next = link.next.load(Ordering::Acquire);
                if link.key == key {
                    let slot = match prev {
                        Some(previous) => &previous.next,
                        None => &*self.base,
                    };
                    if slot
                        .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        // An insert won the head; the match now has a real
                        // predecessor. Walk again.
                        continue 'walk;
                    }
                    // Safety: unlinked and we hold exclusivity, so nothing
                    // else can reach or free this node.
                    let boxed = unsafe { Box::from_raw(current) };
                    self.element_count.fetch_sub(1, Ordering::AcqRel);
                    return Some(boxed.payload);
                }
                prev = Some(link);
                current = next;
            }
            return None;
        }
    }

    /// Visits every resident node as `(key, &payload)`.
    ///
    /// Iterations overlap each other freely but never a removal or close;
    /// `Err(Contended)` reports the latter case. An insert racing with the
    /// walk may or may not be observed. The shared hold is released even if
    /// the callback panics.
    pub fn iterate<F>(&self, mut f: F) -> Result<(), Contended>
    where
        F: FnMut(u64, &T),
    {
        let Some(_pass) = SharedPass::enter(&self.gate) else {
            return Err(Contended);
        };
        let mut current = self.base.load(Ordering::Acquire);
        while !current.is_null() {
            // Safety: the shared hold excludes every path that frees nodes.
            let link = unsafe { &*current };
            f(link.key, &link.payload);
            current = link.next.load(Ordering::Acquire);
        }
        Ok(())
    }

    /// Tears the list down: frees every node and drops every payload.
    ///
    /// Requires the same exclusivity as a removal and holds it forever: a
    /// closed list never readmits removal or iteration (they report
    /// [`Contended`]), while late inserts are simply swept up by `Drop`.
    /// `Err(Contended)` means another holder was in; retry.
    pub fn try_close(&self) -> Result<(), Contended> {
        if !self.gate.try_exclusive() {
            return Err(Contended);
        }
        let head = self.base.swap(ptr::null_mut(), Ordering::AcqRel);
        // Safety: detached under exclusivity; no walker can be inside.
        unsafe { Self::drain(head) };
        self.element_count.store(0, Ordering::Release);
        Ok(())
    }

    /// Frees a detached chain of nodes.
    ///
    /// # Safety
    ///
    /// No other thread may be able to reach `head`, and the nodes must not
    /// be freed again.
    unsafe fn drain(head: *mut KeyedLink<T>) {
        let mut current = head;
        while !current.is_null() {
            let link = unsafe { Box::from_raw(current) };
            current = link.next.load(Ordering::Acquire);
        }
    }
}

impl<T> Drop for KeyedList<T> {
    fn drop(&mut self) {
        let head = std::mem::replace(self.base.get_mut(), ptr::null_mut());
        // Safety: `&mut self`, so nothing else can reach the nodes.
        unsafe { Self::drain(head) };
    }
}

impl<T> Default for KeyedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for KeyedList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedList")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// A removal, iteration, or close lost the coordination race.
///
/// Always safe and expected to retry; never surfaced as a user-facing
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contended;

impl fmt::Display for Contended {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "another removal, iteration, or close holds the list")
    }
}

impl std::error::Error for Contended {}
