use std::ops::ControlFlow;
use std::sync::Arc;

use lane_limit::Reason;
use lane_limit::Strategy;
use tokio::time::sleep;

/// Release gate in front of the downstream.
///
/// Each [`acquire`](Throttle::acquire) consumes one release from the strategy,
/// sleeping for the strategy's hint until one is available.
#[derive(Debug)]
pub struct Throttle<L>
where
    L: ?Sized,
{
    strategy: Arc<L>,
}

impl<L> Clone for Throttle<L>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            strategy: Arc::clone(&self.strategy),
        }
    }
}

impl<L> Throttle<L>
where
    L: Strategy + ?Sized,
{
    pub fn new(strategy: Arc<L>) -> Self {
        Self { strategy }
    }

    /// Waits for the next release.
    pub async fn acquire(&self) {
        loop {
            match self.strategy.process() {
                ControlFlow::Continue(_) => return,
                ControlFlow::Break(reason) => {
                    let Reason::Overloaded { retry_after } = reason;
                    tracing::trace!(?retry_after, "waiting for release");
                    sleep(retry_after).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lane_limit::Cadence;
    use more_asserts::assert_ge;
    use tokio::time::Instant;

    use super::*;

    // The strategy clock and the tokio clock are read independently.
    const SLACK: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn it_spaces_releases() {
        let interval = Duration::from_millis(20);
        let throttle = Throttle::new(Arc::new(Cadence::every(interval)));

        let start = Instant::now();
        throttle.acquire().await;
        let first = start.elapsed();
        throttle.acquire().await;
        throttle.acquire().await;

        // The first release is immediate; each later one costs a full interval.
        assert!(first < interval);
        assert_ge!(start.elapsed(), interval * 2 - SLACK);
    }

    #[tokio::test]
    async fn test_clones_share_the_budget() {
        let interval = Duration::from_millis(20);
        let throttle = Throttle::new(Arc::new(Cadence::every(interval)));
        let other = throttle.clone();

        let start = Instant::now();
        throttle.acquire().await;
        other.acquire().await;

        assert_ge!(start.elapsed(), interval - SLACK);
    }
}
