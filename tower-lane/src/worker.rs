use std::time::Duration;

use lane_limit::Backoff;
use lane_limit::Strategy;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tokio::sync::watch;
use tokio::time::sleep;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::correlator::Outcome;
use crate::correlator::Slot;
use crate::error::LaneError;
use crate::queue::Backlog;
use crate::queue::WorkItem;
use crate::throttle::Throttle;

/// Lifecycle of a lane, broadcast from the owner to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Running,
    /// Admission is closed; queued items are still dispatched.
    Draining,
    /// Everything not yet handed to the downstream is aborted.
    Halted,
}

#[derive(Clone, Debug)]
struct LaneMetrics {
    downstream_calls: Counter<u64>,
    retries: Counter<u64>,
    outcomes: Counter<u64>,
    abandoned_deliveries: Counter<u64>,
}

impl LaneMetrics {
    fn new() -> Self {
        let meter = global::meter("admission_lane");
        Self {
            downstream_calls: meter.u64_counter("downstream_calls").build(),
            retries: meter.u64_counter("retries").build(),
            outcomes: meter.u64_counter("outcomes").build(),
            abandoned_deliveries: meter.u64_counter("abandoned_deliveries").build(),
        }
    }
}

/// Retry bookkeeping for the item currently being dispatched.
#[derive(Debug)]
struct RetryState {
    attempt: u32,
    delay: Duration,
}

impl RetryState {
    fn new() -> Self {
        Self {
            attempt: 1,
            delay: Duration::ZERO,
        }
    }
}

/// The single serial lane between the admission queue and the downstream.
pub(crate) struct DispatchWorker<S, L, Req, Resp>
where
    L: ?Sized,
{
    downstream: S,
    throttle: Throttle<L>,
    backoff: Backoff,
    backlog: Backlog<Req, Resp>,
    phase: watch::Receiver<Phase>,
    cancel_abandoned: bool,
    metrics: LaneMetrics,
}

impl<S, L, Req, Resp> DispatchWorker<S, L, Req, Resp>
where
    S: Service<Req, Response = Resp, Error = BoxError>,
    L: Strategy + ?Sized,
    Req: Clone,
{
    pub(crate) fn new(
        downstream: S,
        throttle: Throttle<L>,
        backoff: Backoff,
        backlog: Backlog<Req, Resp>,
        phase: watch::Receiver<Phase>,
    ) -> Self {
        Self {
            downstream,
            throttle,
            backoff,
            backlog,
            phase,
            cancel_abandoned: false,
            metrics: LaneMetrics::new(),
        }
    }

    pub(crate) fn with_cancel_abandoned(mut self, cancel: bool) -> Self {
        self.cancel_abandoned = cancel;
        self
    }

    /// Dispatches items until the queue is closed and drained.
    pub(crate) async fn run(mut self) {
        info!("dispatch worker started");
        let mut watching = true;
        let mut closed = false;

        loop {
            let next = tokio::select! {
                biased;
                changed = self.phase.changed(), if watching && !closed => {
                    match changed {
                        // Nobody can stop a detached lane; run until the handles are gone.
                        Err(_) => watching = false,
                        Ok(()) if *self.phase.borrow_and_update() != Phase::Running => {
                            info!("admission closed, draining queue");
                            self.backlog.close();
                            closed = true;
                        }
                        Ok(()) => {}
                    }
                    continue;
                }
                item = self.backlog.next() => item,
            };

            let Some(item) = next else {
                break;
            };
            self.dispatch(item).await;
        }

        info!("dispatch worker stopped");
    }

    async fn dispatch(&mut self, item: WorkItem<Req, Resp>) {
        let WorkItem { key, payload, slot } = item;

        let outcome = self.process(&key, payload, &slot).await;
        let kind = match &outcome {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        self.metrics
            .outcomes
            .add(1, &[KeyValue::new("outcome", kind)]);

        if !slot.deliver(outcome) {
            self.metrics.abandoned_deliveries.add(1, &[]);
            debug!(%key, outcome = kind, "caller stopped waiting; outcome discarded");
        }
    }

    async fn process(&mut self, key: &str, payload: Req, slot: &Slot<Resp>) -> Outcome<Resp> {
        let mut phase = self.phase.clone();
        let mut state = RetryState::new();

        loop {
            tokio::select! {
                biased;
                _ = halted(&mut phase) => return Err(LaneError::Aborted),
                _ = self.throttle.acquire() => {}
            }

            // Checked as late as possible so the wait for a release is covered too.
            if self.cancel_abandoned && slot.is_abandoned() {
                debug!(key, attempt = state.attempt, "caller gone; dropping request");
                return Err(LaneError::Aborted);
            }

            self.metrics.downstream_calls.add(1, &[]);
            debug!(key, attempt = state.attempt, "invoking downstream");
            let result = match self.downstream.ready().await {
                Ok(svc) => svc.call(payload.clone()).await,
                Err(err) => Err(err),
            };

            let err = match result {
                Ok(response) => return Ok(response),
                Err(err) => classify(err),
            };

            if err != LaneError::RateLimited {
                warn!(key, attempt = state.attempt, error = %err, "downstream failed");
                return Err(err);
            }

            if !self.backoff.should_retry(state.attempt) {
                warn!(key, attempts = state.attempt, "retries exhausted");
                return Err(LaneError::RetriesExhausted {
                    attempts: state.attempt,
                });
            }

            state.delay = self.backoff.next_delay(state.attempt);
            self.metrics.retries.add(1, &[]);
            warn!(
                key,
                attempt = state.attempt,
                delay = ?state.delay,
                "rate limited by downstream; backing off"
            );

            tokio::select! {
                biased;
                _ = halted(&mut phase) => return Err(LaneError::Aborted),
                _ = sleep(state.delay) => {}
            }
            state.attempt += 1;
        }
    }
}

/// Sorts a downstream error into the lane's taxonomy.
///
/// Only `RateLimited` is transient. Every other error is permanent, including lane
/// statuses returned by the downstream.
fn classify(err: BoxError) -> LaneError {
    match err.downcast::<LaneError>() {
        Ok(err) => match *err {
            err @ (LaneError::RateLimited | LaneError::PermanentFailure(_)) => err,
            other => LaneError::PermanentFailure(other.to_string()),
        },
        Err(other) => LaneError::PermanentFailure(other.to_string()),
    }
}

/// Resolves once the lane stops admitting. Never resolves if it can no longer be stopped.
pub(crate) async fn stopping(phase: &mut watch::Receiver<Phase>) {
    reached(phase, |p| *p != Phase::Running).await
}

/// Resolves once the lane is halted. Never resolves if it can no longer be halted.
async fn halted(phase: &mut watch::Receiver<Phase>) {
    reached(phase, |p| *p == Phase::Halted).await
}

async fn reached(phase: &mut watch::Receiver<Phase>, target: impl FnMut(&Phase) -> bool) {
    let observed = phase.wait_for(target).await.is_ok();
    if !observed {
        std::future::pending::<()>().await;
    }
}
