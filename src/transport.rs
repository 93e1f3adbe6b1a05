//! Transport abstraction.
//!
//! A [`Transport`] moves opaque byte buffers between two endpoints and
//! reports what happens on the wire through an [`EventSink`]. The engine
//! never inspects how bytes travel; it only consumes [`TransportEvent`]s.
//!
//! Two implementations ship with the crate: [`MemoryTransport`] for
//! in-process pairs and tests, and [`TcpTransport`] for length-delimited TCP.

use std::{io, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod memory;
pub mod tcp;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

/// Signals raised by a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link is established.
    Connected,
    /// The link was lost or closed by the peer.
    Disconnected,
    /// A complete buffer arrived from the peer.
    MessageReceived(Bytes),
}

/// Errors raised by transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Underlying I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    /// The operation requires an established link.
    #[error("transport is not connected")]
    NotConnected,
    /// The cancellation token fired before the operation completed.
    #[error("transport operation cancelled")]
    Cancelled,
}

/// Handle a transport uses to publish [`TransportEvent`]s.
///
/// Sinks are cheap to clone. Events published after the consumer has gone
/// away are discarded.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    /// Publish an arbitrary event.
    pub fn emit(&self, event: TransportEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("transport event dropped: consumer closed");
        }
    }

    pub fn connected(&self) { self.emit(TransportEvent::Connected); }

    pub fn disconnected(&self) { self.emit(TransportEvent::Disconnected); }

    pub fn message(&self, bytes: Bytes) { self.emit(TransportEvent::MessageReceived(bytes)); }

    /// Return `true` once the consuming [`EventStream`] has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}

/// Receiving half paired with an [`EventSink`].
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl EventStream {
    /// Wait for the next event. Returns `None` once every sink is dropped.
    pub async fn next(&mut self) -> Option<TransportEvent> { self.rx.recv().await }
}

/// Create a connected [`EventSink`]/[`EventStream`] pair.
#[must_use]
pub fn event_channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, EventStream { rx })
}

/// Byte-moving link underneath a bus or responder.
///
/// Implementations must publish [`TransportEvent::Connected`] when a link is
/// established, [`TransportEvent::MessageReceived`] for each inbound buffer
/// and [`TransportEvent::Disconnected`] when an established link is lost.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Install the sink that receives this transport's events.
    ///
    /// A later call replaces the previous sink.
    fn attach(&self, sink: EventSink);

    /// Establish the link.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the link cannot be established or
    /// `cancel` fires first.
    async fn connect(&self, cancel: &CancellationToken) -> Result<(), TransportError>;

    /// Send one buffer to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] when no link exists and
    /// [`TransportError::Io`] when the write fails.
    async fn send(&self, bytes: Bytes, cancel: &CancellationToken) -> Result<(), TransportError>;

    /// Close the link.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the link cannot be shut down cleanly.
    async fn stop(&self, cancel: &CancellationToken) -> Result<(), TransportError>;
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    fn attach(&self, sink: EventSink) { (**self).attach(sink); }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        (**self).connect(cancel).await
    }

    async fn send(&self, bytes: Bytes, cancel: &CancellationToken) -> Result<(), TransportError> {
        (**self).send(bytes, cancel).await
    }

    async fn stop(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        (**self).stop(cancel).await
    }
}
