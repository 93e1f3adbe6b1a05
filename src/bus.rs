//! Initiating side of a connection.
//!
//! A [`MessageBus`] owns one transport and multiplexes three kinds of
//! traffic over it: correlated requests awaiting an acknowledgement,
//! fire-and-forget sends, and inbound messages routed to subscribers. A
//! single event loop consumes the transport's events; callers issue
//! `request`/`send` concurrently against the shared connection.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    codec::{BincodeCodec, Codec},
    correlation::PendingRequests,
    dispatch::{DispatchOutcome, HandlerError, SubscriberRegistry},
    error::BusError,
    frame::{Acknowledgement, Frame, FrameId},
    interceptor::InterceptorChain,
    lifecycle::{ConnectionState, Lifecycle},
    mediator::{BusEndpoint, Pipeline, PipelineBuilder},
    message::{Message, Request},
    metrics::{self, Direction},
    transport::{EventStream, Transport, TransportEvent},
};

mod builder;

pub use builder::MessageBusBuilder;

/// Source of identifiers for outbound frames.
pub type IdSource = Arc<dyn Fn() -> FrameId + Send + Sync>;

/// Acknowledgement whose reply payload has been decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypedAcknowledgement<R> {
    pub correlation_id: FrameId,
    pub status_code: i32,
    pub error_message: Option<String>,
    /// Decoded reply, if the responder produced one.
    pub payload: Option<R>,
}

impl<R> TypedAcknowledgement<R> {
    /// Return `true` for any status in the 2xx family.
    #[must_use]
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status_code) }

    /// Convert into the reply value.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Rejected`] for a non-success status and
    /// [`BusError::MissingPayload`] when a successful acknowledgement carried
    /// no reply.
    pub fn into_result(self) -> Result<R, BusError> {
        if !self.is_success() {
            return Err(BusError::Rejected {
                status: self.status_code,
                message: self.error_message,
            });
        }
        self.payload.ok_or(BusError::MissingPayload)
    }
}

/// Client endpoint multiplexing requests, sends and subscriptions over one
/// transport.
///
/// Cloning is cheap; clones share the connection.
pub struct MessageBus<T, C = BincodeCodec>
where
    T: Transport,
    C: Codec,
{
    inner: Arc<BusInner<T, C>>,
}

impl<T: Transport, C: Codec> Clone for MessageBus<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport, C: Codec> fmt::Debug for MessageBus<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("state", &self.inner.lifecycle.state())
            .field("pending", &self.inner.pending.len())
            .field("subscribers", &self.inner.subscribers)
            .field("interceptors", &self.inner.interceptors)
            .finish_non_exhaustive()
    }
}

struct BusInner<T, C> {
    transport: Arc<T>,
    codec: Arc<C>,
    pending: PendingRequests,
    subscribers: SubscriberRegistry,
    interceptors: InterceptorChain,
    lifecycle: Arc<Lifecycle>,
    id_source: IdSource,
    handlers: TaskTracker,
    shutdown: CancellationToken,
}

impl<T, C> Drop for BusInner<T, C> {
    fn drop(&mut self) { self.shutdown.cancel(); }
}

impl<T: Transport, C: Codec> BusInner<T, C> {
    fn next_frame(&self, type_tag: &str, payload: Vec<u8>) -> Frame {
        Frame::with_id((self.id_source)(), type_tag, payload)
    }

    async fn transmit(&self, frame: &Frame, cancel: &CancellationToken) -> Result<(), BusError> {
        self.interceptors.sending(&frame.envelope()).await?;
        let bytes = self.codec.encode_frame(frame)?;
        self.transport.send(Bytes::from(bytes), cancel).await?;
        metrics::inc_frames(Direction::Outbound);
        tracing::trace!(frame_id = %frame.id(), type_tag = frame.type_tag(), "frame sent");
        Ok(())
    }

    async fn handle_inbound(&self, bytes: &[u8]) {
        metrics::inc_frames(Direction::Inbound);
        let frame = match self.codec.decode_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                metrics::inc_errors();
                tracing::warn!(error = %e, len = bytes.len(), "dropping malformed frame");
                return;
            }
        };

        if frame.is_acknowledgement() {
            self.handle_acknowledgement(&frame);
            return;
        }

        if let Err(e) = self.interceptors.received(&frame.envelope()).await {
            tracing::warn!(
                frame_id = %frame.id(),
                type_tag = frame.type_tag(),
                error = %e,
                "receive interceptor rejected frame"
            );
            return;
        }

        let tag = frame.type_tag().to_owned();
        let payload = Bytes::from(frame.into_payload());
        match self
            .subscribers
            .dispatch_detached(&tag, payload, &self.handlers)
        {
            DispatchOutcome::NoHandler => {
                tracing::debug!(type_tag = %tag, "no subscriber for inbound frame");
            }
            DispatchOutcome::Dispatched(count) => {
                tracing::trace!(type_tag = %tag, handlers = count, "inbound frame dispatched");
            }
        }
    }

    fn handle_acknowledgement(&self, frame: &Frame) {
        match self.codec.decode_acknowledgement(frame.payload()) {
            Ok(ack) => {
                let correlation_id = ack.correlation_id;
                if !self.pending.resolve(ack) {
                    tracing::debug!(%correlation_id, "discarding unmatched acknowledgement");
                }
            }
            Err(e) => {
                metrics::inc_errors();
                tracing::warn!(frame_id = %frame.id(), error = %e, "dropping malformed acknowledgement");
            }
        }
    }
}

async fn event_loop<T: Transport, C: Codec>(
    inner: std::sync::Weak<BusInner<T, C>>,
    mut events: EventStream,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;

            () = shutdown.cancelled() => break,
            event = events.next() => event,
        };
        let Some(event) = event else { break };
        let Some(inner) = inner.upgrade() else { break };
        match event {
            TransportEvent::Connected => inner.lifecycle.on_transport_connected(),
            TransportEvent::Disconnected => inner.lifecycle.on_transport_disconnected(),
            TransportEvent::MessageReceived(bytes) => inner.handle_inbound(&bytes).await,
        }
    }
    log::debug!("message bus event loop finished");
}

impl<T: Transport, C: Codec> MessageBus<T, C> {
    fn spawn(inner: BusInner<T, C>, events: EventStream) -> Self {
        let inner = Arc::new(inner);
        let shutdown = inner.shutdown.clone();
        tokio::spawn(event_loop(Arc::downgrade(&inner), events, shutdown));
        Self { inner }
    }

    /// Register `handler` for inbound messages of type `M`.
    ///
    /// Handlers are spawned without being awaited; their failures are logged
    /// and never reach the sender.
    pub fn subscribe<M, F, Fut>(&self, handler: F)
    where
        M: Message,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.inner
            .subscribers
            .subscribe(Arc::clone(&self.inner.codec), handler);
    }

    /// Send `message` without waiting for an acknowledgement.
    ///
    /// Returns the identifier of the transmitted frame.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Codec`] if encoding fails,
    /// [`BusError::Interceptor`] if a send hook rejects the frame and
    /// [`BusError::Transport`] if the transport refuses the bytes.
    pub async fn send<M: Message>(
        &self,
        message: &M,
        cancel: &CancellationToken,
    ) -> Result<FrameId, BusError> {
        let payload = self.inner.codec.encode(message)?;
        let frame = self.inner.next_frame(M::TYPE_TAG, payload);
        self.inner.transmit(&frame, cancel).await?;
        Ok(frame.id())
    }

    /// Send `message` and wait for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Fails as [`MessageBus::send`] does, with
    /// [`BusError::DuplicateCorrelationId`] if the frame id is already
    /// pending, and with [`BusError::Cancelled`] when `cancel` fires first.
    pub async fn request<M: Message>(
        &self,
        message: &M,
        cancel: &CancellationToken,
    ) -> Result<Acknowledgement, BusError> {
        let payload = self.inner.codec.encode(message)?;
        self.request_raw(M::TYPE_TAG, payload, cancel).await
    }

    /// Send an already encoded payload under `type_tag` and wait for its
    /// acknowledgement.
    ///
    /// The pending entry is registered before any byte reaches the
    /// transport and is removed when the acknowledgement arrives, when
    /// `cancel` fires or when transmission fails.
    ///
    /// # Errors
    ///
    /// See [`MessageBus::request`].
    pub async fn request_raw(
        &self,
        type_tag: &str,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Acknowledgement, BusError> {
        let frame = self.inner.next_frame(type_tag, payload);
        let waiter = self.inner.pending.register(frame.id())?;
        self.inner.transmit(&frame, cancel).await?;
        let ack = waiter.wait(cancel).await;
        if let Err(BusError::Cancelled) = &ack {
            tracing::debug!(frame_id = %frame.id(), type_tag, "request cancelled");
        }
        ack
    }

    /// Send `message` and decode the reply carried by its acknowledgement.
    ///
    /// # Errors
    ///
    /// Fails as [`MessageBus::request`] does, and with [`BusError::Codec`]
    /// if the reply cannot be decoded as `R`.
    pub async fn request_typed<M, R>(
        &self,
        message: &M,
        cancel: &CancellationToken,
    ) -> Result<TypedAcknowledgement<R>, BusError>
    where
        M: Message,
        R: DeserializeOwned,
    {
        let ack = self.request(message, cancel).await?;
        let payload = ack
            .payload
            .as_deref()
            .map(|bytes| self.inner.codec.decode::<R>(bytes))
            .transpose()?;
        Ok(TypedAcknowledgement {
            correlation_id: ack.correlation_id,
            status_code: ack.status_code,
            error_message: ack.error_message,
            payload,
        })
    }

    /// Service sending `Req` as a typed request over this bus.
    #[must_use]
    pub fn endpoint<Req: Request>(&self) -> BusEndpoint<T, C, Req> { BusEndpoint::new(self.clone()) }

    /// Finish `layers` with this bus as the endpoint.
    #[must_use]
    pub fn pipeline<Req: Request>(
        &self,
        layers: PipelineBuilder<Req, Req::Response>,
    ) -> Pipeline<Req, Req::Response> {
        layers.build(self.endpoint::<Req>())
    }

    /// Connect the transport.
    ///
    /// Connecting an already connected bus does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Transport`] when the attempt fails,
    /// [`BusError::ConnectInProgress`] while another attempt or the
    /// reconnect loop is running and [`BusError::Stopped`] after
    /// [`MessageBus::stop`].
    pub async fn connect(&self) -> Result<(), BusError> { self.inner.lifecycle.connect().await }

    /// Stop the bus and tear down the transport. No reconnection happens
    /// afterwards.
    ///
    /// Returns once every subscriber handler already started has finished.
    /// Requests still pending stay pending until their own cancellation
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Transport`] if the transport fails to stop and
    /// [`BusError::Cancelled`] if `cancel` fires while handlers are still
    /// running.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<(), BusError> {
        self.inner.lifecycle.stop(cancel).await?;
        self.inner.handlers.close();
        tokio::select! {
            biased;

            () = self.inner.handlers.wait() => Ok(()),
            () = cancel.cancelled() => Err(BusError::Cancelled),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState { self.inner.lifecycle.state() }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> { self.inner.lifecycle.watch() }

    /// Number of requests awaiting an acknowledgement.
    #[must_use]
    pub fn pending_requests(&self) -> usize { self.inner.pending.len() }

    #[must_use]
    pub fn transport(&self) -> &T { &self.inner.transport }

    #[must_use]
    pub fn codec(&self) -> &C { &self.inner.codec }
}

#[cfg(test)]
mod tests;
