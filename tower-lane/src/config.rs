use std::num::NonZeroU32;
use std::num::NonZeroUsize;
use std::time::Duration;

use lane_limit::Backoff;
use lane_limit::Cadence;

/// Tuning for a [`Lane`](crate::Lane).
///
/// Defaults protect a downstream allowing 1000 requests per minute: a 60ms release
/// cadence, room for 10,000 queued requests, five attempts starting at 500ms of
/// backoff and a five second caller deadline.
#[derive(Debug, Clone)]
pub struct LaneConfig {
    pub(crate) max_requests: NonZeroUsize,
    pub(crate) per: Duration,
    pub(crate) queue_capacity: NonZeroUsize,
    pub(crate) max_retries: NonZeroU32,
    pub(crate) base_backoff: Duration,
    pub(crate) max_backoff: Duration,
    pub(crate) backoff_jitter: f64,
    pub(crate) caller_deadline: Duration,
    pub(crate) cancel_abandoned: bool,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            max_requests: NonZeroUsize::new(1000).unwrap_or(NonZeroUsize::MIN),
            per: Duration::from_secs(60),
            queue_capacity: NonZeroUsize::new(10_000).unwrap_or(NonZeroUsize::MIN),
            max_retries: NonZeroU32::new(5).unwrap_or(NonZeroU32::MIN),
            base_backoff: Duration::from_millis(500),
            max_backoff: Backoff::DEFAULT_CEILING,
            backoff_jitter: 0.0,
            caller_deadline: Duration::from_secs(5),
            cancel_abandoned: false,
        }
    }
}

impl LaneConfig {
    /// Set the downstream ceiling: at most `max_requests` calls every `per`.
    pub fn with_rate(mut self, max_requests: NonZeroUsize, per: Duration) -> Self {
        self.max_requests = max_requests;
        self.per = per;
        self
    }

    /// Set the number of requests that may wait for dispatch.
    pub fn with_queue_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the total number of downstream invocations per request, first try included.
    pub fn with_max_retries(mut self, max_retries: NonZeroU32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry. Later retries double it.
    pub fn with_base_backoff(mut self, base: Duration) -> Self {
        self.base_backoff = base;
        self
    }

    /// Set the ceiling on a single backoff delay.
    pub fn with_max_backoff(mut self, ceiling: Duration) -> Self {
        self.max_backoff = ceiling;
        self
    }

    /// Set the jitter fraction added to each backoff delay.
    pub fn with_backoff_jitter(mut self, fraction: f64) -> Self {
        self.backoff_jitter = fraction;
        self
    }

    /// Set how long a caller waits for an outcome, queueing included.
    pub fn with_caller_deadline(mut self, deadline: Duration) -> Self {
        self.caller_deadline = deadline;
        self
    }

    /// Set whether the worker drops requests whose caller stopped waiting.
    ///
    /// When `true`, the worker checks before every attempt and delivers
    /// [`LaneError::Aborted`](crate::LaneError::Aborted) instead of spending budget.
    pub fn with_cancel_abandoned(mut self, cancel: bool) -> Self {
        self.cancel_abandoned = cancel;
        self
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.get()
    }

    pub fn caller_deadline(&self) -> Duration {
        self.caller_deadline
    }

    /// The spacing between two downstream calls.
    pub fn throttle_interval(&self) -> Duration {
        self.cadence().interval()
    }

    pub(crate) fn cadence(&self) -> Cadence {
        Cadence::new(self.max_requests, self.per)
    }

    pub(crate) fn backoff(&self) -> Backoff {
        Backoff::new(self.base_backoff, self.max_retries)
            .with_ceiling(self.max_backoff)
            .with_jitter(self.backoff_jitter)
    }
}
