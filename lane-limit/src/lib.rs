//! # lane-limit
//!
//! `lane-limit` provides the runtime-free pacing primitives behind an admission lane.
//!
//! ## Key Concepts
//!
//! * **Strategy Trait**: A unified, non-blocking interface for release gates. A strategy
//!   either lets a caller through or tells it how long to wait.
//! * **Cadence**: A lock-free gate that releases at most once per fixed interval and
//!   never banks more than a single pending release.
//! * **Backoff**: Exponential retry delays with a ceiling and optional jitter.
//!
//! Nothing in this crate sleeps or spawns. Callers decide how to wait for `retry_after`.
//!
//! ## Example
//!
//! ```rust
//! use lane_limit::Cadence;
//! use lane_limit::Strategy;
//! use std::time::Duration;
//! use std::num::NonZeroUsize;
//!
//! let limit = NonZeroUsize::new(1000).unwrap();
//! let cadence = Cadence::new(limit, Duration::from_secs(60));
//!
//! if cadence.process().is_continue() {
//!     // Release granted
//! }
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod backoff;
mod cadence;

pub use backoff::Backoff;
pub use cadence::Cadence;

/// Reasons why a request might be held back by a strategy.
#[derive(Debug, PartialEq)]
pub enum Reason {
    Overloaded { retry_after: Duration },
}

/// The core trait for release gates.
///
/// Strategies must be `Send` and `Sync` to allow sharing across thread boundaries
/// via `Arc`.
pub trait Strategy: Debug {
    /// Attempts to take a single release.
    ///
    /// This method is non-blocking and uses atomic operations to update
    /// internal state.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if no release is available yet.
    fn process(&self) -> ControlFlow<Reason>;
}
