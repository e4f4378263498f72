//! One-shot latches for a chain's two singleton roles.
//!
//! A chain tolerates any number of producers but exactly one continuation
//! waiter and one consumer loop. The latches here do not make a violation
//! safe. They make it loud, at registration time instead of as a corrupted
//! stream later. They are kept apart from [`Chain`](crate::Chain) so an
//! embedder can compile them into debug builds only, the way the original
//! runtime does.

use std::sync::atomic::{AtomicBool, Ordering};

/// A pair of independent one-shot role latches.
///
/// Each latch flips false to true exactly once; the caller that performed
/// the flip is the sole winner and every later caller is refused.
///
/// # Example
///
/// ```
/// use strand_fifo::DeployGuard;
///
/// let guard = DeployGuard::new();
/// assert!(guard.try_issue_consumer());
/// assert!(!guard.try_issue_consumer());
/// // the other role is unaffected
/// assert!(guard.try_issue_continuation());
/// ```
#[derive(Debug, Default)]
pub struct DeployGuard {
    continuation_issued: AtomicBool,
    consumer_issued: AtomicBool,
}

impl DeployGuard {
    /// Creates a guard with both roles unissued.
    pub const fn new() -> Self {
        Self {
            continuation_issued: AtomicBool::new(false),
            consumer_issued: AtomicBool::new(false),
        }
    }

    /// Claims the continuation-waiter role. Only the first caller wins.
    #[inline]
    pub fn try_issue_continuation(&self) -> bool {
        self.continuation_issued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claims the consumer-loop role. Only the first caller wins.
    #[inline]
    pub fn try_issue_consumer(&self) -> bool {
        self.consumer_issued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the continuation role has been claimed.
    #[inline]
    pub fn continuation_issued(&self) -> bool {
        self.continuation_issued.load(Ordering::Acquire)
    }

    /// Whether the consumer role has been claimed.
    #[inline]
    pub fn consumer_issued(&self) -> bool {
        self.consumer_issued.load(Ordering::Acquire)
    }
}
