use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;

use crate::correlator::Slot;
use crate::error::LaneError;
use crate::worker::Phase;
use crate::worker::stopping;

/// A caller's request on its way to the downstream.
#[derive(Debug)]
pub(crate) struct WorkItem<Req, Resp> {
    pub(crate) key: String,
    pub(crate) payload: Req,
    pub(crate) slot: Slot<Resp>,
}

/// Creates a bounded FIFO admission queue.
///
/// Waiting submitters are admitted in arrival order, so enqueue order is dispatch order.
/// Admission stops as soon as `phase` leaves `Running`, even while the worker is busy.
pub(crate) fn admission_queue<Req, Resp>(
    capacity: usize,
    phase: watch::Receiver<Phase>,
) -> (Admission<Req, Resp>, Backlog<Req, Resp>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Admission { tx, phase }, Backlog { rx })
}

/// Submission side, shared by every caller.
#[derive(Debug)]
pub(crate) struct Admission<Req, Resp> {
    tx: mpsc::Sender<WorkItem<Req, Resp>>,
    phase: watch::Receiver<Phase>,
}

impl<Req, Resp> Clone for Admission<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            phase: self.phase.clone(),
        }
    }
}

impl<Req, Resp> Admission<Req, Resp> {
    /// Enqueues at the tail, waiting for space while the queue is full.
    ///
    /// A submitter still waiting for space when admission stops is refused.
    pub(crate) async fn submit(&self, item: WorkItem<Req, Resp>) -> Result<(), LaneError> {
        let mut phase = self.phase.clone();
        tokio::select! {
            biased;
            _ = stopping(&mut phase) => Err(LaneError::Aborted),
            sent = self.tx.send(item) => sent.map_err(|_| LaneError::Aborted),
        }
    }

    /// Enqueues at the tail, or sheds the item if the queue is full.
    pub(crate) fn try_submit(&self, item: WorkItem<Req, Resp>) -> Result<(), LaneError> {
        if self.is_stopping() {
            return Err(LaneError::Aborted);
        }
        self.tx.try_send(item).map_err(|err| match err {
            TrySendError::Full(_) => LaneError::Overloaded,
            TrySendError::Closed(_) => LaneError::Aborted,
        })
    }

    /// Number of items currently waiting.
    pub(crate) fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.is_stopping()
    }

    fn is_stopping(&self) -> bool {
        *self.phase.borrow() != Phase::Running
    }
}

/// Dispatch side, owned by the worker.
#[derive(Debug)]
pub(crate) struct Backlog<Req, Resp> {
    rx: mpsc::Receiver<WorkItem<Req, Resp>>,
}

impl<Req, Resp> Backlog<Req, Resp> {
    /// Removes the head, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed (or every submitter is gone) and drained.
    pub(crate) async fn next(&mut self) -> Option<WorkItem<Req, Resp>> {
        self.rx.recv().await
    }

    /// Stops admission. Items already queued can still be taken.
    pub(crate) fn close(&mut self) {
        self.rx.close();
    }
}
