use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;

use crate::Reason;
use crate::Strategy;

/// Fixed-cadence release gate.
///
/// Releases at most once per `period / limit`. This is a cell rate algorithm whose
/// delay tolerance is exactly one emission interval, so an idle gate holds a single
/// pending release and never a burst.
#[derive(Debug)]
pub struct Cadence {
    /// Earliest time (ns since `anchor`) at which the next release may be taken.
    next_release: AtomicU64,
    interval_ns: u64,
    clock: Clock,
    anchor: Instant,
}

impl Cadence {
    /// Creates a gate allowing `limit` releases per `period`.
    pub fn new(limit: NonZeroUsize, period: Duration) -> Self {
        Self::with_clock(limit, period, Clock::new())
    }

    pub fn with_clock(limit: NonZeroUsize, period: Duration, clock: Clock) -> Self {
        let anchor = clock.now();

        Self {
            next_release: AtomicU64::new(0),
            interval_ns: interval_ns(period, limit),
            clock,
            anchor,
        }
    }

    /// Creates a gate releasing once per `interval`.
    pub fn every(interval: Duration) -> Self {
        Self::with_clock(NonZeroUsize::MIN, interval, Clock::new())
    }

    /// The spacing enforced between two releases.
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_ns)
    }
}

/// Spacing in nanoseconds, never zero so a gate always gates.
fn interval_ns(period: Duration, limit: NonZeroUsize) -> u64 {
    let ns = period.as_nanos() / limit.get() as u128;
    u64::try_from(ns).unwrap_or(u64::MAX).max(1)
}

impl Strategy for Cadence {
    #[inline]
    fn process(&self) -> ControlFlow<Reason> {
        let now = self.clock.now().duration_since(self.anchor).as_nanos() as u64;

        loop {
            let next = self.next_release.load(Ordering::Acquire);

            if next > now {
                return ControlFlow::Break(Reason::Overloaded {
                    retry_after: Duration::from_nanos(next - now),
                });
            }

            // Anchor on `now`, not `next`: time spent idle is not banked.
            let following = now + self.interval_ns;
            if self
                .next_release
                .compare_exchange_weak(next, following, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return ControlFlow::Continue(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mocked(interval: Duration) -> (Cadence, std::sync::Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        (Cadence::with_clock(NonZeroUsize::MIN, interval, clock), mock)
    }

    #[test]
    fn it_derives_interval_from_limit() {
        let cadence = Cadence::new(NonZeroUsize::new(1000).unwrap(), Duration::from_secs(60));
        assert_eq!(cadence.interval(), Duration::from_millis(60));
    }

    #[test]
    fn test_tiny_period_still_gates() {
        let (clock, _mock) = Clock::mock();
        let cadence = Cadence::with_clock(
            NonZeroUsize::new(1000).unwrap(),
            Duration::ZERO,
            clock,
        );

        assert_eq!(cadence.interval(), Duration::from_nanos(1));
        assert_eq!(cadence.process(), ControlFlow::Continue(()));
        assert!(cadence.process().is_break());
    }

    #[test]
    fn it_releases_once_per_interval() {
        let (cadence, mock) = mocked(Duration::from_millis(60));

        assert_eq!(cadence.process(), ControlFlow::Continue(()));
        assert_eq!(
            cadence.process(),
            ControlFlow::Break(Reason::Overloaded {
                retry_after: Duration::from_millis(60)
            })
        );

        mock.increment(Duration::from_millis(59));
        assert_eq!(
            cadence.process(),
            ControlFlow::Break(Reason::Overloaded {
                retry_after: Duration::from_millis(1)
            })
        );

        mock.increment(Duration::from_millis(1));
        assert_eq!(cadence.process(), ControlFlow::Continue(()));
        assert!(cadence.process().is_break());
    }

    #[test]
    fn test_idle_time_is_not_banked() {
        let (cadence, mock) = mocked(Duration::from_millis(10));

        let _ = cadence.process();

        // Ten intervals of idleness buy exactly one release.
        mock.increment(Duration::from_millis(100));
        assert_eq!(cadence.process(), ControlFlow::Continue(()));
        assert_eq!(
            cadence.process(),
            ControlFlow::Break(Reason::Overloaded {
                retry_after: Duration::from_millis(10)
            })
        );
    }

    #[tokio::test]
    async fn test_actual_concurrency() {
        use std::sync::Arc;

        let (clock, _mock) = Clock::mock();
        let cadence = Arc::new(Cadence::with_clock(
            NonZeroUsize::MIN,
            Duration::from_secs(1),
            clock,
        ));

        let mut handles = vec![];
        for _ in 0..50 {
            let c = Arc::clone(&cadence);
            handles.push(tokio::spawn(async move { c.process() }));
        }

        let results = futures::future::join_all(handles).await;
        let released = results
            .into_iter()
            .filter(|r| matches!(r, Ok(ControlFlow::Continue(()))))
            .count();

        // Frozen clock: one release, no matter how many contenders.
        assert_eq!(released, 1);
    }
}
