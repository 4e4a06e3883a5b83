use std::sync::Arc;
use std::time::Duration;

use lane_limit::Strategy;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio::time::timeout_at;
use tower::BoxError;
use tower::Service;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::LaneConfig;
use crate::correlator::Outcome;
use crate::correlator::correlator;
use crate::error::LaneError;
use crate::queue::Admission;
use crate::queue::WorkItem;
use crate::queue::admission_queue;
use crate::throttle::Throttle;
use crate::worker::DispatchWorker;
use crate::worker::Phase;

/// An admission lane in front of a single rate-limited downstream.
///
/// Owns the dispatch worker. Submit through [`Lane::handle`]; stop with
/// [`Lane::shutdown`].
#[derive(Debug)]
pub struct Lane<Req, Resp> {
    handle: LaneHandle<Req, Resp>,
    phase: watch::Sender<Phase>,
    worker: JoinHandle<()>,
}

impl<Req, Resp> Lane<Req, Resp>
where
    Req: Clone + Send + 'static,
    Resp: Send + 'static,
{
    /// Spawns a lane pacing `downstream` at the configured cadence.
    pub fn new<S>(downstream: S, config: LaneConfig) -> Self
    where
        S: Service<Req, Response = Resp, Error = BoxError> + Send + 'static,
        S::Future: Send,
    {
        let cadence = Arc::new(config.cadence());
        Self::with_strategy(downstream, config, cadence)
    }

    /// Spawns a lane whose releases are granted by `strategy`.
    ///
    /// The rate in `config` is ignored.
    pub fn with_strategy<S, L>(downstream: S, config: LaneConfig, strategy: Arc<L>) -> Self
    where
        S: Service<Req, Response = Resp, Error = BoxError> + Send + 'static,
        S::Future: Send,
        L: Strategy + ?Sized + Send + Sync + 'static,
    {
        let (phase, watcher) = watch::channel(Phase::Running);
        let (admission, backlog) = admission_queue(config.queue_capacity(), watcher.clone());

        let worker = DispatchWorker::new(
            downstream,
            Throttle::new(strategy),
            config.backoff(),
            backlog,
            watcher,
        )
        .with_cancel_abandoned(config.cancel_abandoned);

        Self {
            handle: LaneHandle {
                admission,
                deadline: config.caller_deadline(),
            },
            phase,
            worker: tokio::spawn(worker.run()),
        }
    }

    /// A cloneable submission handle.
    pub fn handle(&self) -> LaneHandle<Req, Resp> {
        self.handle.clone()
    }

    /// Gives up control of the worker. It runs until every handle is dropped.
    pub fn detach(self) -> LaneHandle<Req, Resp> {
        self.handle
    }

    /// Stops the lane.
    ///
    /// Admission closes at once and queued requests keep being dispatched. If the
    /// queue is not drained within `grace`, the request in flight is aborted at its
    /// next wait and every request still queued receives [`LaneError::Aborted`].
    pub async fn shutdown(self, grace: Duration) {
        let Self {
            handle,
            phase,
            mut worker,
        } = self;
        drop(handle);

        phase.send_replace(Phase::Draining);
        let joined = match timeout(grace, &mut worker).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(?grace, "grace period elapsed; aborting remaining requests");
                phase.send_replace(Phase::Halted);
                worker.await
            }
        };

        if let Err(err) = joined {
            error!("dispatch worker failed: {err}");
        }
        info!("lane stopped");
    }
}

/// Submission side of a [`Lane`].
#[derive(Debug)]
pub struct LaneHandle<Req, Resp> {
    admission: Admission<Req, Resp>,
    deadline: Duration,
}

// Manually implement Clone to avoid requiring Req: Clone + Resp: Clone
impl<Req, Resp> Clone for LaneHandle<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            admission: self.admission.clone(),
            deadline: self.deadline,
        }
    }
}

impl<Req, Resp> LaneHandle<Req, Resp> {
    /// Submits a request and waits for its outcome.
    ///
    /// Waits for queue space while the lane is full. The caller deadline covers the
    /// whole wait; when it passes first the result is [`LaneError::TimedOut`].
    pub async fn submit(&self, key: impl Into<String>, payload: Req) -> Outcome<Resp> {
        let (slot, receipt) = correlator(self.deadline);
        let item = WorkItem {
            key: key.into(),
            payload,
            slot,
        };

        match timeout_at(receipt.deadline(), self.admission.submit(item)).await {
            Ok(Ok(())) => receipt.await,
            Ok(Err(err)) => Err(err),
            Err(_) => Err(LaneError::TimedOut),
        }
    }

    /// Submits a request without waiting for queue space.
    ///
    /// Fails with [`LaneError::Overloaded`] if the queue is full.
    pub async fn try_submit(&self, key: impl Into<String>, payload: Req) -> Outcome<Resp> {
        let (slot, receipt) = correlator(self.deadline);
        let item = WorkItem {
            key: key.into(),
            payload,
            slot,
        };

        self.admission.try_submit(item)?;
        receipt.await
    }

    /// Number of requests waiting for dispatch.
    pub fn queue_depth(&self) -> usize {
        self.admission.depth()
    }

    /// Whether the lane has stopped admitting requests.
    pub fn is_closed(&self) -> bool {
        self.admission.is_closed()
    }
}
