//! Onion middleware for the request path.
//!
//! A [`Middleware`] wraps a typed request/response call. It receives the
//! request and a [`Next`] continuation; it may rewrite the request, call
//! `next` zero or more times and rewrite the response. The first layer
//! registered is the outermost, so layers run in registration order on the
//! way in and in reverse on the way out.

use std::{future::Future, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BusError;

/// Asynchronous request/response endpoint at the centre of a pipeline.
#[async_trait]
pub trait Service<Req, Resp>: Send + Sync + 'static
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Handle `request` and produce a response.
    async fn call(&self, request: Req, cancel: &CancellationToken) -> Result<Resp, BusError>;
}

/// Continuation used by middleware to call the rest of the chain.
pub struct Next<'a, Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    layers: &'a [Arc<dyn Middleware<Req, Resp>>],
    endpoint: &'a dyn Service<Req, Resp>,
}

impl<Req, Resp> Clone for Next<'_, Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn clone(&self) -> Self { *self }
}

impl<Req, Resp> Copy for Next<'_, Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
}

impl<'a, Req, Resp> Next<'a, Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Creates a continuation over `layers` ending at `endpoint`.
    pub const fn new(
        layers: &'a [Arc<dyn Middleware<Req, Resp>>],
        endpoint: &'a dyn Service<Req, Resp>,
    ) -> Self {
        Self { layers, endpoint }
    }

    /// Call the next layer, or the endpoint once every layer has run.
    ///
    /// `Next` is `Copy`, so a layer may call `run` repeatedly to retry.
    ///
    /// # Errors
    ///
    /// Propagates whatever the remaining chain returns.
    pub async fn run(self, request: Req, cancel: &CancellationToken) -> Result<Resp, BusError> {
        match self.layers.split_first() {
            Some((layer, rest)) => {
                layer
                    .intercept(request, Next::new(rest, self.endpoint), cancel)
                    .await
            }
            None => self.endpoint.call(request, cancel).await,
        }
    }
}

/// One layer of the onion.
#[async_trait]
pub trait Middleware<Req, Resp>: Send + Sync + 'static
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Process `request`, usually by delegating to `next`.
    async fn intercept(
        &self,
        request: Req,
        next: Next<'_, Req, Resp>,
        cancel: &CancellationToken,
    ) -> Result<Resp, BusError>;
}

/// [`Service`] backed by an async closure.
pub struct ServiceFn<F, Req> {
    f: F,
    _request: PhantomData<fn(Req)>,
}

/// Wrap `f` as a [`Service`].
///
/// ```
/// use framebus::middleware::{Service, service_fn};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let double = service_fn(|n: u32| async move { Ok(n * 2) });
/// let out = double.call(4, &CancellationToken::new()).await.expect("call");
/// assert_eq!(out, 8);
/// # }
/// ```
pub fn service_fn<F, Fut, Req, Resp>(f: F) -> ServiceFn<F, Req>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, BusError>> + Send,
{
    ServiceFn {
        f,
        _request: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, Req, Resp> Service<Req, Resp> for ServiceFn<F, Req>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, BusError>> + Send,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn call(&self, request: Req, _cancel: &CancellationToken) -> Result<Resp, BusError> {
        (self.f)(request).await
    }
}
