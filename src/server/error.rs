//! Errors raised by [`ResponderServer`](super::ResponderServer) operations.

use std::io;

use thiserror::Error;

/// Errors that may occur while setting up the server.
///
/// Accept failures never surface here; the accept loop retries them with
/// back-off.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or configuring the listening socket failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
}
