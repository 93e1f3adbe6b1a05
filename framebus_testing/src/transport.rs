//! Helpers wiring responders to in-memory transports.

use framebus::{Codec, Responder, TransportError, transport::MemoryTransport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A responder serving one end of a [`MemoryTransport::pair`].
pub struct ServedResponder {
    pub transport: MemoryTransport,
    pub cancel: CancellationToken,
    pub task: JoinHandle<Result<(), TransportError>>,
}

impl ServedResponder {
    /// Stop serving and wait for the task.
    ///
    /// # Panics
    ///
    /// Panics if the serving task panicked or failed.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.task
            .await
            .expect("join responder task")
            .expect("responder stopped cleanly");
    }
}

/// Create a linked transport pair and serve the second end with `responder`.
///
/// Returns once the served end is connected, so the client end can connect
/// and send immediately.
pub async fn serve_pair<C: Codec>(responder: Responder<C>) -> (MemoryTransport, ServedResponder) {
    let (client, server) = MemoryTransport::pair();
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let server = server.clone();
        let cancel = cancel.clone();
        async move { responder.serve(&server, &cancel).await }
    });
    while !server.is_connected() {
        tokio::task::yield_now().await;
    }
    (
        client,
        ServedResponder {
            transport: server,
            cancel,
            task,
        },
    )
}
