use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use pin_project_lite::pin_project;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio::time::Timeout;
use tokio::time::timeout_at;

use crate::error::LaneError;

/// The terminal result of one submission.
pub type Outcome<T> = Result<T, LaneError>;

/// Creates a single-use delivery slot and the caller's deadline-bounded receipt.
///
/// The deadline starts now.
pub fn correlator<T>(deadline: Duration) -> (Slot<T>, Receipt<T>) {
    let (tx, rx) = oneshot::channel();
    let deadline = Instant::now() + deadline;
    (
        Slot { tx },
        Receipt {
            inner: timeout_at(deadline, rx),
            deadline,
        },
    )
}

/// Write side of a correlator. Consumed by delivery, so it can only be written once.
#[derive(Debug)]
pub struct Slot<T> {
    tx: oneshot::Sender<Outcome<T>>,
}

impl<T> Slot<T> {
    /// Hands the outcome to the caller.
    ///
    /// Returns `false` if the caller already gave up; the outcome is discarded.
    pub fn deliver(self, outcome: Outcome<T>) -> bool {
        self.tx.send(outcome).is_ok()
    }

    /// Whether the caller has stopped waiting.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

pin_project! {
    /// Read side of a correlator.
    ///
    /// Resolves to the delivered outcome, to `LaneError::TimedOut` once the deadline
    /// passes, or to `LaneError::Aborted` if the slot is dropped without a delivery.
    /// Dropping the receipt abandons the request.
    #[derive(Debug)]
    pub struct Receipt<T> {
        #[pin]
        inner: Timeout<oneshot::Receiver<Outcome<T>>>,
        deadline: Instant,
    }
}

impl<T> Receipt<T> {
    /// The instant at which the caller stops waiting.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl<T> Future for Receipt<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(Ok(Ok(outcome))) => Poll::Ready(outcome),
            Poll::Ready(Ok(Err(_))) => Poll::Ready(Err(LaneError::Aborted)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(LaneError::TimedOut)),
            Poll::Pending => Poll::Pending,
        }
    }
}
