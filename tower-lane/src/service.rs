use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use tower::BoxError;
use tower::Service;

use crate::error::LaneError;
use crate::lane::LaneHandle;

/// A keyed request for a lane.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission<Req> {
    /// Opaque caller identity.
    pub key: String,
    pub payload: Req,
}

impl<Req> Submission<Req> {
    pub fn new(key: impl Into<String>, payload: Req) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }
}

impl<Req, Resp> Service<Submission<Req>> for LaneHandle<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Response = Resp;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Resp, BoxError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Queue space is awaited inside the call so the caller deadline covers it.
        if self.is_closed() {
            return Poll::Ready(Err(Box::new(LaneError::Aborted)));
        }
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Submission<Req>) -> Self::Future {
        let handle = self.clone();
        Box::pin(async move {
            handle
                .submit(req.key, req.payload)
                .await
                .map_err(BoxError::from)
        })
    }
}
