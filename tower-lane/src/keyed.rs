use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::task::Context;
use std::task::Poll;

use tokio::sync::Mutex as Token;
use tokio::sync::OwnedMutexGuard;
use tower::Layer;
use tower::Service;

use crate::service::Submission;

/// Registry of per-key exclusion tokens.
///
/// Tokens are created on first use. The registry lock is only held to look a token
/// up, never while waiting for the token itself.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    tokens: Mutex<HashMap<K, Arc<Token<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of `key`. Released when the guard drops.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let token = {
            let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(tokens.entry(key).or_default())
        };
        token.lock_owned().await
    }

    /// Forgets `key`'s token if nobody holds or waits for it.
    pub fn release(&self, key: &K) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if tokens
            .get(key)
            .is_some_and(|token| Arc::strong_count(token) == 1)
        {
            tokens.remove(key);
        }
    }

    /// Drops tokens nobody holds or waits for. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        let before = tokens.len();
        tokens.retain(|_, token| Arc::strong_count(token) > 1);
        before - tokens.len()
    }

    /// Number of tokens currently registered.
    pub fn len(&self) -> usize {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Allows one in-flight [`Submission`] per key; different keys run concurrently.
///
/// A key's token is released once its last call completes, so the registry only
/// holds keys with calls in flight.
#[derive(Debug, Clone, Default)]
pub struct SerializeByKeyLayer {
    locks: Arc<KeyedLocks<String>>,
}

impl SerializeByKeyLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every service this layer produces.
    pub fn locks(&self) -> Arc<KeyedLocks<String>> {
        Arc::clone(&self.locks)
    }
}

impl<S> Layer<S> for SerializeByKeyLayer {
    type Service = SerializeByKey<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SerializeByKey {
            inner,
            locks: Arc::clone(&self.locks),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SerializeByKey<S> {
    inner: S,
    locks: Arc<KeyedLocks<String>>,
}

impl<S, Req> Service<Submission<Req>> for SerializeByKey<S>
where
    S: Service<Submission<Req>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    S::Error: 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Submission<Req>) -> Self::Future {
        // Keep the instance that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let locks = Arc::clone(&self.locks);

        Box::pin(async move {
            let key = req.key.clone();
            let guard = locks.lock(key.clone()).await;
            let result = inner.call(req).await;
            drop(guard);
            locks.release(&key);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tokio::time::sleep;
    use tower::BoxError;
    use tower::ServiceBuilder;
    use tower::ServiceExt;
    use tower::service_fn;

    use super::*;

    #[tokio::test]
    async fn it_excludes_same_key() {
        let locks = KeyedLocks::new();

        let guard = locks.lock("client-1").await;
        assert!(futures::poll!(Box::pin(locks.lock("client-1"))).is_pending());

        // Other keys are unaffected.
        let _other = locks.lock("client-2").await;

        drop(guard);
        let _again = locks.lock("client-1").await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_held_tokens() {
        let locks = KeyedLocks::new();

        let held = locks.lock(1).await;
        drop(locks.lock(2).await);
        drop(locks.lock(3).await);

        assert_eq!(locks.prune(), 2);
        assert_eq!(locks.len(), 1);

        drop(held);
        assert_eq!(locks.prune(), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_layer_serializes_per_key() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let svc = {
            let active = active.clone();
            let peak = peak.clone();
            service_fn(move |req: Submission<u32>| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(req.payload)
                }
            })
        };
        let layer = SerializeByKeyLayer::new();
        let service = ServiceBuilder::new().layer(layer.clone()).service(svc);

        let mut same_key = vec![];
        for i in 0..4 {
            let svc = service.clone();
            same_key.push(tokio::spawn(
                svc.oneshot(Submission::new("client-1", i)),
            ));
        }
        for h in same_key {
            h.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1, "same key overlapped");

        let mut spread = vec![];
        for i in 0..4 {
            let svc = service.clone();
            spread.push(tokio::spawn(
                svc.oneshot(Submission::new(format!("client-{i}"), i)),
            ));
        }
        for h in spread {
            h.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) > 1, "distinct keys were serialized");
        assert!(layer.locks().is_empty());
    }

    #[tokio::test]
    async fn test_release_keeps_contended_tokens() {
        let locks = KeyedLocks::new();

        let held = locks.lock("client-1").await;
        let mut waiter = Box::pin(locks.lock("client-1"));
        assert!(futures::poll!(waiter.as_mut()).is_pending());

        drop(held);
        locks.release(&"client-1");
        assert_eq!(locks.len(), 1);

        drop(waiter.await);
        locks.release(&"client-1");
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_one_shot_keys_do_not_accumulate() {
        let layer = SerializeByKeyLayer::new();
        let service = ServiceBuilder::new()
            .layer(layer.clone())
            .service(service_fn(|req: Submission<u32>| async move {
                Ok::<_, BoxError>(req.payload)
            }));

        for i in 0..1000 {
            let response = service
                .clone()
                .oneshot(Submission::new(format!("visitor-{i}"), i))
                .await
                .unwrap();
            assert_eq!(response, i);
        }

        assert!(layer.locks().is_empty());
    }
}
