//! Length-delimited TCP transport.
//!
//! Each buffer travels as one length-prefixed frame, the same framing a
//! [`Responder`](crate::Responder) uses when serving a socket.

use std::{
    net::SocketAddr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    SinkExt,
    StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_util::{
    codec::{Framed, LengthDelimitedCodec},
    sync::CancellationToken,
};

use super::{EventSink, Transport, TransportError};

/// Largest frame accepted by default.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;
const MIN_FRAME_LENGTH: usize = 64;

type Writer = SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>;
type Reader = SplitStream<Framed<TcpStream, LengthDelimitedCodec>>;

/// Build the length-delimited codec used on both ends of a TCP link.
#[must_use]
pub fn length_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_length.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH))
        .new_codec()
}

/// Client-side TCP [`Transport`] connecting to a fixed address.
///
/// Every successful [`connect`](Transport::connect) opens a new socket, so a
/// bus can reconnect through the same instance.
#[derive(Debug)]
pub struct TcpTransport {
    addr: SocketAddr,
    max_frame_length: usize,
    sink: Mutex<Option<EventSink>>,
    writer: tokio::sync::Mutex<Option<Writer>>,
    reader_stop: Mutex<Option<CancellationToken>>,
    link: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TcpTransport {
    /// Create a transport that connects to `addr`.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            max_frame_length: MAX_FRAME_LENGTH,
            sink: Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
            reader_stop: Mutex::new(None),
            link: tokio::sync::Mutex::new(()),
        }
    }

    /// Override the largest accepted frame, clamped to
    /// [`MAX_FRAME_LENGTH`].
    #[must_use]
    pub fn max_frame_length(mut self, len: usize) -> Self {
        self.max_frame_length = len.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH);
        self
    }

    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr { self.addr }

    fn halt_reader(&self) {
        if let Some(stop) = lock(&self.reader_stop).take() {
            stop.cancel();
        }
    }
}

async fn read_frames(mut reader: Reader, sink: Option<EventSink>, stop: CancellationToken) {
    loop {
        tokio::select! {
            biased;

            () = stop.cancelled() => return,
            next = reader.next() => match next {
                Some(Ok(frame)) => {
                    if let Some(sink) = &sink {
                        sink.message(frame.freeze());
                    }
                }
                Some(Err(e)) => {
                    log::warn!("tcp read failed: error={e:?}");
                    tracing::warn!(error = ?e, "tcp read failed");
                    break;
                }
                None => {
                    log::debug!("tcp peer closed the connection");
                    break;
                }
            },
        }
    }
    if let Some(sink) = sink {
        sink.disconnected();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn attach(&self, sink: EventSink) { *lock(&self.sink) = Some(sink); }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        let _guard = self.link.lock().await;
        let stream = tokio::select! {
            biased;

            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            res = TcpStream::connect(self.addr) => res?,
        };
        self.halt_reader();
        let (writer, reader) = Framed::new(stream, length_codec(self.max_frame_length)).split();
        *self.writer.lock().await = Some(writer);

        let stop = CancellationToken::new();
        *lock(&self.reader_stop) = Some(stop.clone());
        let sink = lock(&self.sink).clone();
        if let Some(sink) = &sink {
            sink.connected();
        }
        tokio::spawn(read_frames(reader, sink, stop));
        Ok(())
    }

    async fn send(&self, bytes: Bytes, cancel: &CancellationToken) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        tokio::select! {
            biased;

            () = cancel.cancelled() => Err(TransportError::Cancelled),
            res = writer.send(bytes) => res.map_err(TransportError::from),
        }
    }

    async fn stop(&self, _cancel: &CancellationToken) -> Result<(), TransportError> {
        self.halt_reader();
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.close().await?;
        }
        Ok(())
    }
}
