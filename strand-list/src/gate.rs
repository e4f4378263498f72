//! Sign-encoded access coordination for the keyed list.
//!
//! One signed counter arbitrates three states:
//!
//! ```text
//! 0   Idle       nothing holds the list
//! +1  Exclusive  one removal or teardown in flight
//! -n  Shared     n overlapping iterations in flight
//! ```
//!
//! Shared holders may overlap each other but never the exclusive holder,
//! and the exclusive holder admits nobody. Insertion never consults the
//! gate at all. Acquisition never blocks: a loser reports contention and
//! the caller retries.

use std::sync::atomic::{AtomicI16, Ordering};

use crossbeam_utils::Backoff;

const IDLE: i16 = 0;
const EXCLUSIVE: i16 = 1;

pub(crate) struct AccessGate {
    state: AtomicI16,
}

impl AccessGate {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicI16::new(IDLE),
        }
    }

    /// Attempts the Idle -> Exclusive transition. A single CAS: any other
    /// holder, shared or exclusive, means refusal, not waiting.
    pub(crate) fn try_exclusive(&self) -> bool {
        self.state
            .compare_exchange(IDLE, EXCLUSIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_exclusive(&self) {
        let previous = self.state.swap(IDLE, Ordering::Release);
        debug_assert_eq!(previous, EXCLUSIVE);
    }

    /// Attempts to join the shared state, taking the counter one step more
    /// negative. Refused only while the exclusive holder is in; CAS
    /// failures against other shared holders are retried internally.
    ///
    /// More than `i16::MAX` overlapping iterations would wrap the counter;
    /// that many live iterator threads is far past any sane embedding.
    pub(crate) fn try_shared(&self) -> bool {
        let backoff = Backoff::new();
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            if state > IDLE {
                return false;
            }
            match self.state.compare_exchange_weak(
                state,
                state - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => {
                    state = actual;
                    backoff.spin();
                }
            }
        }
    }

    pub(crate) fn release_shared(&self) {
        let previous = self.state.fetch_add(1, Ordering::Release);
        debug_assert!(previous < IDLE);
    }
}

/// Releases a shared hold when dropped, so an iteration that panics in its
/// callback cannot wedge the gate shut for removals.
pub(crate) struct SharedPass<'a> {
    gate: &'a AccessGate,
}

impl<'a> SharedPass<'a> {
    pub(crate) fn enter(gate: &'a AccessGate) -> Option<Self> {
        gate.try_shared().then_some(Self { gate })
    }
}

impl Drop for SharedPass<'_> {
    fn drop(&mut self) {
        self.gate.release_shared();
    }
}
