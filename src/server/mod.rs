//! TCP server for [`Responder`] instances.
//!
//! [`ResponderServer`] owns a bound listener and serves every accepted peer
//! with a clone of one responder. Peers speak length-delimited frames, the
//! same framing [`TcpTransport`](crate::transport::TcpTransport) uses.

mod accept;
mod backoff;
mod error;

use std::{
    fmt,
    future::Future,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use accept::{AcceptLoopOptions, PeerHooks, accept_loop};
pub use accept::PeerCallback;
pub use backoff::BackoffConfig;
pub use error::ServerError;
use log::warn;
use tokio::{net::TcpListener, select, signal, sync::oneshot};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    codec::{BincodeCodec, Codec},
    responder::Responder,
};

/// Accepts TCP peers and answers their frames with a [`Responder`].
pub struct ResponderServer<C = BincodeCodec> {
    responder: Responder<C>,
    listener: Arc<TcpListener>,
    backoff: BackoffConfig,
    hooks: PeerHooks,
    ready_tx: Option<oneshot::Sender<()>>,
}

impl<C> fmt::Debug for ResponderServer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponderServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("backoff", &self.backoff)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl<C: Codec> ResponderServer<C> {
    /// Bind a new listener on `addr`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the socket cannot be bound.
    pub fn bind(responder: Responder<C>, addr: SocketAddr) -> Result<Self, ServerError> {
        let std = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        Self::from_std_listener(responder, std)
    }

    /// Serve on an already bound standard library listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listener cannot be switched to
    /// non-blocking mode or registered with the runtime.
    pub fn from_std_listener(
        responder: Responder<C>,
        listener: StdTcpListener,
    ) -> Result<Self, ServerError> {
        listener.set_nonblocking(true).map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(listener).map_err(ServerError::Bind)?;
        Ok(Self {
            responder,
            listener: Arc::new(listener),
            backoff: BackoffConfig::default(),
            hooks: PeerHooks::default(),
            ready_tx: None,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Propagates the socket error if the address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> { self.listener.local_addr() }

    /// Override the accept-loop back-off. The value is normalized before use.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Callback fired when a peer connection is accepted.
    #[must_use]
    pub fn on_peer_connected<F>(mut self, f: F) -> Self
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        self.hooks.connected = Some(Arc::new(f));
        self
    }

    /// Callback fired after a peer connection has been fully served.
    #[must_use]
    pub fn on_peer_disconnected<F>(mut self, f: F) -> Self
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        self.hooks.disconnected = Some(Arc::new(f));
        self
    }

    /// Send `()` on `tx` once the accept loop is running.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Run until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns `Ok` once every peer task has finished. Accept failures are
    /// logged and retried with back-off rather than surfaced.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run until `shutdown` resolves, then stop accepting, close every peer
    /// connection and wait for their tasks to finish.
    ///
    /// ```
    /// use std::net::SocketAddr;
    ///
    /// use framebus::{ResponderBuilder, ResponderServer};
    /// use tokio::sync::oneshot;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), framebus::server::ServerError> {
    /// let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
    /// let server = ResponderServer::bind(ResponderBuilder::new().build(), addr)?;
    ///
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(server.run_with_shutdown(async {
    ///     let _ = rx.await;
    /// }));
    /// let _ = tx.send(());
    /// handle.await.expect("join server task")?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `Ok` once every peer task has finished. Accept failures are
    /// logged and retried with back-off rather than surfaced.
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let ResponderServer {
            responder,
            listener,
            backoff,
            hooks,
            ready_tx,
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(accept_loop(
            listener,
            responder,
            AcceptLoopOptions {
                hooks,
                shutdown: shutdown_token.clone(),
                tracker: tracker.clone(),
                backoff,
            },
        ));

        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        Ok(())
    }
}
