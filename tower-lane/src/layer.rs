use std::marker::PhantomData;

use tower::BoxError;
use tower::Layer;
use tower::Service;

use crate::config::LaneConfig;
use crate::lane::Lane;
use crate::lane::LaneHandle;

/// Puts a downstream service behind an admission lane.
///
/// Like `tower::buffer::Buffer`, layering spawns the dispatch worker onto the current
/// tokio runtime and detaches it; the worker stops once every handle is dropped.
/// Use [`Lane`] directly when a graceful shutdown is needed.
pub struct LaneLayer<Req> {
    config: LaneConfig,
    _phantom: PhantomData<fn(Req)>,
}

impl<Req> Clone for LaneLayer<Req> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<Req> LaneLayer<Req> {
    pub fn new(config: LaneConfig) -> Self {
        Self {
            config,
            _phantom: PhantomData,
        }
    }
}

impl<S, Req> Layer<S> for LaneLayer<Req>
where
    S: Service<Req, Error = BoxError> + Send + 'static,
    S::Future: Send,
    S::Response: Send + 'static,
    Req: Clone + Send + 'static,
{
    type Service = LaneHandle<Req, S::Response>;

    fn layer(&self, inner: S) -> Self::Service {
        Lane::new(inner, self.config.clone()).detach()
    }
}
