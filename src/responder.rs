//! Listening side of a connection.
//!
//! A [`Responder`] answers every inbound frame with an acknowledgement. It
//! runs the receive hooks, awaits each subscriber for the frame's type tag in
//! registration order, folds their outcomes into a status code and sends the
//! acknowledgement back on the connection the frame arrived on.
//!
//! One responder can serve many connections at once; they share only the
//! subscriber registry.

use std::{fmt, future::Future, io, sync::Arc};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::{codec::Framed, sync::CancellationToken};

use crate::{
    codec::{BincodeCodec, Codec},
    dispatch::{HandlerError, SubscriberRegistry},
    envelope::Envelope,
    frame::{ACK_TYPE, Acknowledgement, Frame},
    interceptor::{FnInterceptor, Interceptor, InterceptorChain, InterceptorError},
    message::{Message, Request},
    metrics::{self, Direction},
    transport::{
        Transport,
        TransportError,
        TransportEvent,
        event_channel,
        tcp::{MAX_FRAME_LENGTH, length_codec},
    },
};

/// Configures and creates a [`Responder`].
pub struct ResponderBuilder<C = BincodeCodec> {
    codec: C,
    interceptors: InterceptorChain,
}

impl Default for ResponderBuilder<BincodeCodec> {
    fn default() -> Self { Self::new() }
}

impl ResponderBuilder<BincodeCodec> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            codec: BincodeCodec,
            interceptors: InterceptorChain::default(),
        }
    }
}

impl<C: Codec> ResponderBuilder<C> {
    /// Replace the codec. Peers must use the same one.
    #[must_use]
    pub fn codec<C2: Codec>(self, codec: C2) -> ResponderBuilder<C2> {
        ResponderBuilder {
            codec,
            interceptors: self.interceptors,
        }
    }

    /// Append an interceptor. Interceptors run in the order added.
    #[must_use]
    pub fn interceptor<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Append a send hook built from a closure. It observes acknowledgement
    /// frames before they are written.
    #[must_use]
    pub fn on_sending<F>(self, hook: F) -> Self
    where
        F: Fn(&Envelope<'_>) -> Result<(), InterceptorError> + Send + Sync + 'static,
    {
        self.interceptor(FnInterceptor::sending(hook))
    }

    /// Append a receive hook built from a closure.
    #[must_use]
    pub fn on_received<F>(self, hook: F) -> Self
    where
        F: Fn(&Envelope<'_>) -> Result<(), InterceptorError> + Send + Sync + 'static,
    {
        self.interceptor(FnInterceptor::received(hook))
    }

    #[must_use]
    pub fn build(self) -> Responder<C> {
        Responder {
            inner: Arc::new(ResponderInner {
                codec: Arc::new(self.codec),
                subscribers: SubscriberRegistry::new(),
                interceptors: self.interceptors,
            }),
        }
    }
}

/// Frame-answering endpoint. Cloning is cheap; clones share subscribers.
pub struct Responder<C = BincodeCodec> {
    inner: Arc<ResponderInner<C>>,
}

struct ResponderInner<C> {
    codec: Arc<C>,
    subscribers: SubscriberRegistry,
    interceptors: InterceptorChain,
}

impl<C> Clone for Responder<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for Responder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("subscribers", &self.inner.subscribers)
            .field("interceptors", &self.inner.interceptors)
            .finish_non_exhaustive()
    }
}

impl<C: Codec> Responder<C> {
    /// Register `handler` for messages of type `M`.
    ///
    /// An `Err` from the handler turns the acknowledgement into status 500
    /// carrying its message.
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

    /// Register a handler whose result travels back in the acknowledgement
    /// payload.
    ///
    /// When several reply handlers succeed for one frame, the last reply
    /// wins.
    pub fn reply<M, F, Fut>(&self, handler: F)
    where
        M: Request,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<M::Response, HandlerError>> + Send + 'static,
    {
        self.inner
            .subscribers
            .reply(Arc::clone(&self.inner.codec), handler);
    }

    #[must_use]
    pub fn codec(&self) -> &C { &self.inner.codec }

    /// Process one decoded frame and compute its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns the [`InterceptorError`] of a receive hook that rejected the
    /// frame. Such frames are not dispatched and receive no
    /// acknowledgement.
    pub async fn acknowledge(&self, frame: Frame) -> Result<Acknowledgement, InterceptorError> {
        self.inner.interceptors.received(&frame.envelope()).await?;
        let id = frame.id();
        let tag = frame.type_tag().to_owned();
        let report = self
            .inner
            .subscribers
            .dispatch_awaited(&tag, Bytes::from(frame.into_payload()))
            .await;
        tracing::debug!(
            frame_id = %id,
            type_tag = %tag,
            status = report.status_code,
            handlers = report.handlers_run,
            "frame dispatched"
        );
        Ok(report.into_acknowledgement(id))
    }

    /// Process raw inbound bytes and return the encoded acknowledgement
    /// frame to send back, if any.
    ///
    /// Malformed input, acknowledgement frames and frames rejected by a hook
    /// produce nothing.
    pub async fn handle_bytes(&self, bytes: &[u8]) -> Option<Bytes> {
        metrics::inc_frames(Direction::Inbound);
        let frame = match self.inner.codec.decode_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                metrics::inc_errors();
                tracing::warn!(error = %e, len = bytes.len(), "dropping malformed frame");
                return None;
            }
        };
        if frame.is_acknowledgement() {
            tracing::debug!(frame_id = %frame.id(), "responder ignores acknowledgement frames");
            return None;
        }
        let frame_id = frame.id();
        let ack = match self.acknowledge(frame).await {
            Ok(ack) => ack,
            Err(e) => {
                tracing::warn!(%frame_id, error = %e, "receive interceptor rejected frame");
                return None;
            }
        };
        self.encode_acknowledgement(&ack).await
    }

    async fn encode_acknowledgement(&self, ack: &Acknowledgement) -> Option<Bytes> {
        let payload = match self.inner.codec.encode(ack) {
            Ok(payload) => payload,
            Err(e) => {
                metrics::inc_errors();
                tracing::error!(correlation_id = %ack.correlation_id, error = %e, "failed to encode acknowledgement");
                return None;
            }
        };
        let frame = Frame::wrap(ACK_TYPE, payload);
        if let Err(e) = self.inner.interceptors.sending(&frame.envelope()).await {
            tracing::warn!(
                correlation_id = %ack.correlation_id,
                error = %e,
                "send interceptor rejected acknowledgement"
            );
            return None;
        }
        match self.inner.codec.encode_frame(&frame) {
            Ok(bytes) => {
                metrics::inc_frames(Direction::Outbound);
                Some(Bytes::from(bytes))
            }
            Err(e) => {
                metrics::inc_errors();
                tracing::error!(correlation_id = %ack.correlation_id, error = %e, "failed to encode acknowledgement frame");
                None
            }
        }
    }

    /// Serve one connection carried by `transport` until the peer
    /// disconnects or `cancel` fires.
    ///
    /// The transport is connected first and stopped when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the [`TransportError`] raised while connecting or stopping.
    pub async fn serve<T: Transport>(
        &self,
        transport: &T,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let (sink, mut events) = event_channel();
        transport.attach(sink);
        transport.connect(cancel).await?;
        loop {
            let event = tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    transport.stop(&CancellationToken::new()).await?;
                    return Ok(());
                }
                event = events.next() => event,
            };
            match event {
                Some(TransportEvent::MessageReceived(bytes)) => {
                    let Some(reply) = self.handle_bytes(&bytes).await else {
                        continue;
                    };
                    if let Err(e) = transport.send(reply, cancel).await {
                        metrics::inc_errors();
                        tracing::warn!(error = %e, "failed to send acknowledgement");
                    }
                }
                Some(TransportEvent::Connected) => {}
                Some(TransportEvent::Disconnected) | None => return Ok(()),
            }
        }
    }

    /// Serve a length-delimited byte stream until EOF or `cancel` fires.
    ///
    /// Frames are handled one at a time in arrival order.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if reading or writing the stream fails.
    pub async fn serve_stream<S>(&self, stream: S, cancel: &CancellationToken) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut framed = Framed::new(stream, length_codec(MAX_FRAME_LENGTH));
        loop {
            let next = tokio::select! {
                biased;

                () = cancel.cancelled() => return Ok(()),
                next = framed.next() => next,
            };
            match next {
                Some(Ok(bytes)) => {
                    if let Some(reply) = self.handle_bytes(&bytes).await {
                        framed.send(reply).await?;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            }
        }
    }
}
