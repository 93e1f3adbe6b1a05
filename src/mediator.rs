//! Typed request pipelines.
//!
//! A [`Pipeline`] pairs an ordered middleware stack with an endpoint
//! [`Service`] for one request/response type pair. Pipelines are assembled
//! with [`PipelineBuilder`] and fixed once built.
//!
//! ```
//! use framebus::{
//!     BusError,
//!     mediator::PipelineBuilder,
//!     middleware::service_fn,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), BusError> {
//! let pipeline = PipelineBuilder::<String, usize>::new()
//!     .build(service_fn(|s: String| async move { Ok(s.len()) }));
//! assert_eq!(pipeline.send("four".into(), &CancellationToken::new()).await?, 4);
//! # Ok(())
//! # }
//! ```

use std::{fmt, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    bus::MessageBus,
    codec::Codec,
    error::BusError,
    message::Request,
    middleware::{Middleware, Next, Service},
    transport::Transport,
};

/// Middleware stack around an endpoint for `Req`/`Resp`.
pub struct Pipeline<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    layers: Arc<[Arc<dyn Middleware<Req, Resp>>]>,
    endpoint: Arc<dyn Service<Req, Resp>>,
}

impl<Req, Resp> Clone for Pipeline<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            layers: Arc::clone(&self.layers),
            endpoint: Arc::clone(&self.endpoint),
        }
    }
}

impl<Req, Resp> fmt::Debug for Pipeline<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("layers", &self.layers.len())
            .finish_non_exhaustive()
    }
}

impl<Req, Resp> Pipeline<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Run `request` through every layer and the endpoint.
    ///
    /// # Errors
    ///
    /// Propagates errors raised by the middleware or the endpoint.
    pub async fn send(&self, request: Req, cancel: &CancellationToken) -> Result<Resp, BusError> {
        Next::new(&self.layers, self.endpoint.as_ref())
            .run(request, cancel)
            .await
    }
}

/// Collects middleware for a [`Pipeline`].
pub struct PipelineBuilder<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    layers: Vec<Arc<dyn Middleware<Req, Resp>>>,
}

impl<Req, Resp> Default for PipelineBuilder<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn default() -> Self { Self { layers: Vec::new() } }
}

impl<Req, Resp> PipelineBuilder<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Add `middleware` inside every layer added before it.
    #[must_use]
    pub fn wrap<M>(mut self, middleware: M) -> Self
    where
        M: Middleware<Req, Resp>,
    {
        self.layers.push(Arc::new(middleware));
        self
    }

    /// Finish the pipeline around `endpoint`.
    #[must_use]
    pub fn build<S>(self, endpoint: S) -> Pipeline<Req, Resp>
    where
        S: Service<Req, Resp>,
    {
        Pipeline {
            layers: self.layers.into(),
            endpoint: Arc::new(endpoint),
        }
    }
}

/// [`Service`] that sends each request over a [`MessageBus`] and returns
/// the decoded reply.
///
/// Non-success acknowledgements surface as [`BusError::Rejected`].
pub struct BusEndpoint<T, C, Req>
where
    T: Transport,
    C: Codec,
{
    bus: MessageBus<T, C>,
    _request: PhantomData<fn(Req)>,
}

impl<T: Transport, C: Codec, Req> BusEndpoint<T, C, Req> {
    pub(crate) fn new(bus: MessageBus<T, C>) -> Self {
        Self {
            bus,
            _request: PhantomData,
        }
    }
}

#[async_trait]
impl<T, C, Req> Service<Req, Req::Response> for BusEndpoint<T, C, Req>
where
    T: Transport,
    C: Codec,
    Req: Request,
{
    async fn call(&self, request: Req, cancel: &CancellationToken) -> Result<Req::Response, BusError> {
        self.bus
            .request_typed::<Req, Req::Response>(&request, cancel)
            .await?
            .into_result()
    }
}
