//! In-process transport.
//!
//! [`MemoryTransport`] keeps everything in memory. A standalone instance
//! records what is sent and lets callers inject inbound buffers, simulate
//! link loss or script connection failures. [`MemoryTransport::pair`] links
//! two instances so that whatever one sends the other receives.

use std::{
    io,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{EventSink, Transport, TransportError, TransportEvent};

/// Cloneable in-memory [`Transport`]. Clones share state.
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    sink: Mutex<Option<EventSink>>,
    peer: Mutex<Weak<Shared>>,
    connected: AtomicBool,
    connect_attempts: AtomicUsize,
    failing_connects: AtomicUsize,
    sent: watch::Sender<Vec<Bytes>>,
}

impl Shared {
    fn new() -> Self {
        let (sent, _) = watch::channel(Vec::new());
        Self {
            sink: Mutex::new(None),
            peer: Mutex::new(Weak::new()),
            connected: AtomicBool::new(false),
            connect_attempts: AtomicUsize::new(0),
            failing_connects: AtomicUsize::new(0),
            sent,
        }
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(sink) = lock(&self.sink).as_ref() {
            sink.emit(event);
        }
    }
}

// Poisoning only happens if a holder panicked; the guarded data stays valid.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Default for MemoryTransport {
    fn default() -> Self { Self::new() }
}

impl MemoryTransport {
    /// Create a standalone transport with no peer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new()),
        }
    }

    /// Create two transports wired to each other.
    ///
    /// Buffers sent on one side surface as
    /// [`TransportEvent::MessageReceived`] on the other.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let left = Self::new();
        let right = Self::new();
        *lock(&left.shared.peer) = Arc::downgrade(&right.shared);
        *lock(&right.shared.peer) = Arc::downgrade(&left.shared);
        (left, right)
    }

    /// Make the next `count` calls to [`Transport::connect`] fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.shared.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Number of connection attempts made so far, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> usize { self.shared.connect_attempts.load(Ordering::SeqCst) }

    #[must_use]
    pub fn is_connected(&self) -> bool { self.shared.connected.load(Ordering::SeqCst) }

    /// Snapshot of every buffer sent through this transport.
    #[must_use]
    pub fn sent(&self) -> Vec<Bytes> { self.shared.sent.borrow().clone() }

    /// Wait until at least `count` buffers have been sent and return them.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<Bytes> {
        let mut rx = self.shared.sent.subscribe();
        match rx.wait_for(|sent| sent.len() >= count).await {
            Ok(sent) => sent.clone(),
            // The sender lives as long as `self`, so the channel cannot close.
            Err(_) => self.sent(),
        }
    }

    /// Deliver `bytes` to this transport's consumer as if the peer sent them.
    pub fn inject(&self, bytes: impl Into<Bytes>) {
        self.shared
            .emit(TransportEvent::MessageReceived(bytes.into()));
    }

    /// Drop the link without the consumer asking for it.
    pub fn simulate_drop(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.emit(TransportEvent::Disconnected);
    }

    fn peer(&self) -> Option<Arc<Shared>> { lock(&self.shared.peer).upgrade() }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn attach(&self, sink: EventSink) { *lock(&self.shared.sink) = Some(sink); }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let scripted_failure = self
            .shared
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted connection failure",
            )));
        }
        self.shared.connected.store(true, Ordering::SeqCst);
        self.shared.emit(TransportEvent::Connected);
        Ok(())
    }

    async fn send(&self, bytes: Bytes, cancel: &CancellationToken) -> Result<(), TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.shared.sent.send_modify(|sent| sent.push(bytes.clone()));
        if let Some(peer) = self.peer() {
            peer.emit(TransportEvent::MessageReceived(bytes));
        }
        Ok(())
    }

    async fn stop(&self, _cancel: &CancellationToken) -> Result<(), TransportError> {
        let was_connected = self.shared.connected.swap(false, Ordering::SeqCst);
        if was_connected && let Some(peer) = self.peer() {
            peer.emit(TransportEvent::Disconnected);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::transport::event_channel;

    #[tokio::test]
    async fn send_requires_connection() {
        let transport = MemoryTransport::new();
        let err = transport
            .send(Bytes::from_static(b"x"), &CancellationToken::new())
            .await
            .expect_err("send before connect must fail");
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[rstest]
    #[case(0, 1)]
    #[case(2, 3)]
    #[tokio::test]
    async fn scripted_failures_precede_success(#[case] failures: usize, #[case] attempts: usize) {
        let transport = MemoryTransport::new();
        transport.fail_next_connects(failures);
        let cancel = CancellationToken::new();
        let mut outcome = transport.connect(&cancel).await;
        while outcome.is_err() {
            outcome = transport.connect(&cancel).await;
        }
        assert_eq!(transport.connect_attempts(), attempts);
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn pair_forwards_sent_bytes() {
        let (left, right) = MemoryTransport::pair();
        let (sink, mut events) = event_channel();
        right.attach(sink);
        let cancel = CancellationToken::new();
        left.connect(&cancel).await.expect("connect");
        left.send(Bytes::from_static(b"hi"), &cancel)
            .await
            .expect("send");

        assert_eq!(
            events.next().await,
            Some(TransportEvent::MessageReceived(Bytes::from_static(b"hi")))
        );
        assert_eq!(left.wait_for_sent(1).await.len(), 1);
    }

    #[tokio::test]
    async fn stop_notifies_peer() {
        let (left, right) = MemoryTransport::pair();
        let (sink, mut events) = event_channel();
        right.attach(sink);
        let cancel = CancellationToken::new();
        left.connect(&cancel).await.expect("connect");
        left.stop(&cancel).await.expect("stop");
        assert_eq!(events.next().await, Some(TransportEvent::Disconnected));
    }
}
