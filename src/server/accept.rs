//! Accept loop and per-peer tasks.

use std::{fmt, io, net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use log::{error, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::backoff::BackoffConfig;
use crate::{codec::Codec, dispatch::panic_text, metrics, responder::Responder};

/// Source of incoming connections consumed by the accept loop.
///
/// Dropping a pending `accept()` future must not leak resources.
#[async_trait]
pub(crate) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Callback receiving a peer's address.
pub type PeerCallback = Arc<dyn Fn(SocketAddr) + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct PeerHooks {
    pub connected: Option<PeerCallback>,
    pub disconnected: Option<PeerCallback>,
}

impl fmt::Debug for PeerHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHooks")
            .field("connected", &self.connected.is_some())
            .field("disconnected", &self.disconnected.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct AcceptLoopOptions {
    pub hooks: PeerHooks,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub backoff: BackoffConfig,
}

/// Accept peers from `listener` until `shutdown` fires, serving each one with
/// `responder` in a task tracked by `tracker`.
///
/// Accept failures are logged and retried after a delay that doubles on each
/// consecutive failure.
pub(crate) async fn accept_loop<L, C>(listener: Arc<L>, responder: Responder<C>, options: AcceptLoopOptions)
where
    L: AcceptListener + 'static,
    C: Codec,
{
    let AcceptLoopOptions {
        hooks,
        shutdown,
        tracker,
        backoff,
    } = options;
    let backoff = backoff.normalized();
    let mut delay = backoff.initial_delay;
    loop {
        let accepted = select! {
            biased;

            () = shutdown.cancelled() => return,
            res = listener.accept() => res,
        };
        match accepted {
            Ok((stream, peer_addr)) => {
                spawn_peer_task(
                    stream,
                    peer_addr,
                    responder.clone(),
                    hooks.clone(),
                    shutdown.clone(),
                    &tracker,
                );
                delay = backoff.initial_delay;
            }
            Err(e) => {
                metrics::inc_errors();
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                select! {
                    biased;

                    () = shutdown.cancelled() => return,
                    () = sleep(delay) => {}
                }
                delay = backoff.next_delay(delay);
            }
        }
    }
}

/// Serve one peer in a tracked task, logging and discarding any panics.
fn spawn_peer_task<C: Codec>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    responder: Responder<C>,
    hooks: PeerHooks,
    shutdown: CancellationToken,
    tracker: &TaskTracker,
) {
    tracker.spawn(async move {
        metrics::inc_connections();
        tracing::debug!(%peer_addr, "peer connected");
        if let Some(cb) = &hooks.connected {
            cb(peer_addr);
        }

        let served = AssertUnwindSafe(responder.serve_stream(stream, &shutdown))
            .catch_unwind()
            .await;
        match served {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("peer connection failed: error={e}, peer_addr={peer_addr}");
            }
            Err(panic) => {
                metrics::inc_errors();
                let panic_msg = panic_text(&*panic);
                error!("peer task panicked: panic={panic_msg}, peer_addr={peer_addr}");
                tracing::error!(panic = %panic_msg, %peer_addr, "peer task panicked");
            }
        }

        metrics::dec_connections();
        tracing::debug!(%peer_addr, "peer disconnected");
        if let Some(cb) = &hooks.disconnected {
            cb(peer_addr);
        }
    });
}
