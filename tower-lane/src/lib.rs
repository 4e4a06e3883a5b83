//! # Tower Lane
//!
//! `tower-lane` protects a downstream dependency that enforces a hard rate limit.
//! Callers submit work into a bounded queue; a single worker releases it to the
//! downstream at a fixed cadence, retries rate-limited calls with exponential backoff
//! and hands every caller exactly one terminal outcome within its deadline.
//!
//! ## The Lane
//!
//! 1. **Admission**: [`LaneHandle::submit`] waits for queue space (backpressure);
//!    [`LaneHandle::try_submit`] sheds with [`LaneError::Overloaded`] instead.
//! 2. **Throttle**: the worker takes one release from a [`lane_limit::Strategy`]
//!    (by default a [`lane_limit::Cadence`]) before every downstream call, retries
//!    included.
//! 3. **Retry**: a downstream returning [`LaneError::RateLimited`] is retried after
//!    [`lane_limit::Backoff`] delays until the attempt budget is spent
//!    ([`LaneError::RetriesExhausted`]). Any other error is final.
//! 4. **Correlation**: each request carries a single-use slot. A caller whose deadline
//!    passes gets [`LaneError::TimedOut`]; the worker's late delivery is discarded.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`LaneError`], mapping outcomes to distinct
//!   HTTP status codes (429, 500, 503, 504).
//! - `demo`: Builds the `lane_demo` binary, which drives a simulated flaky API.

mod config;
mod correlator;
mod error;
mod keyed;
mod lane;
mod layer;
mod queue;
mod service;
mod throttle;
mod worker;


pub use config::LaneConfig;
pub use correlator::Outcome;
pub use correlator::Receipt;
pub use correlator::Slot;
pub use correlator::correlator;
pub use error::LaneError;
pub use keyed::KeyedLocks;
pub use keyed::SerializeByKey;
pub use keyed::SerializeByKeyLayer;
pub use lane::Lane;
pub use lane::LaneHandle;
pub use layer::LaneLayer;
pub use service::Submission;
pub use throttle::Throttle;
