//! # strand-fifo
//!
//! An unbounded multi-producer FIFO chain designed to carry payloads from
//! arbitrary threads to a single consumer loop beneath an async runtime.
//!
//! ## Features
//!
//! - **Lock-free enqueue**: `pass` is a CAS append that always eventually
//!   succeeds, from any number of threads.
//! - **Terminal cap**: `pass_cap` marks the logical end of the stream
//!   exactly once; queued elements still drain in FIFO order and the cap
//!   payload is delivered on every consume thereafter.
//! - **Hybrid blocking**: the hot path is lock-free; a mutex/condvar pair
//!   exists purely as the sleep/wake side-channel for `consume`.
//! - **Role latches**: [`DeployGuard`] catches a second consumer loop or
//!   continuation waiter at registration time.
//!
//! ## Example
//!
//! ```
//! use strand_fifo::{Chain, Consumed};
//!
//! let chain: Chain<String, ()> = Chain::new();
//! chain.pass("hello".to_string());
//! chain.pass_cap(None);
//!
//! assert!(matches!(chain.try_consume(), Ok(Consumed::Element(_))));
//! assert!(matches!(chain.try_consume(), Ok(Consumed::Done(None))));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod deploy;
pub mod os;

pub use chain::{Chain, Consumed, WouldBlock};
pub use deploy::DeployGuard;
