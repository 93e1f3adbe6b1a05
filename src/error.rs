//! Canonical error types for the crate.
//!
//! [`BusError`] is the surface returned by bus operations. Transport, codec
//! and interceptor failures are wrapped so callers can match on their origin.
//! Protocol failures reported by a responder (no handler, handler failed) are
//! not errors at this level; they arrive as an
//! [`Acknowledgement`](crate::Acknowledgement) status.

use std::time::Duration;

use crate::{
    codec::CodecError,
    frame::FrameId,
    interceptor::InterceptorError,
    transport::TransportError,
};

/// Errors emitted by [`MessageBus`](crate::MessageBus) and
/// [`Pipeline`](crate::mediator::Pipeline) operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// A request with this identifier is already awaiting its acknowledgement.
    #[error("correlation id {0} is already pending")]
    DuplicateCorrelationId(FrameId),
    /// The caller's cancellation token fired before the operation completed,
    /// including while the transport was still sending.
    #[error("operation cancelled")]
    Cancelled,
    /// The transport failed to connect, send or stop.
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),
    /// A frame or payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// A sending interceptor refused the frame.
    #[error("interceptor failed: {0}")]
    Interceptor(#[from] InterceptorError),
    /// Builder configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// `connect` was called while a connection attempt is already running.
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,
    /// The bus was stopped.
    #[error("message bus stopped")]
    Stopped,
    /// The responder acknowledged a typed request with a non-success status.
    #[error("request rejected with status {status}: {}", message.as_deref().unwrap_or("no details"))]
    Rejected {
        /// Status code carried by the acknowledgement.
        status: i32,
        /// Failure details carried by the acknowledgement.
        message: Option<String>,
    },
    /// A successful acknowledgement to a typed request carried no reply.
    #[error("acknowledgement carried no reply payload")]
    MissingPayload,
}

// A transport that gave up because the caller's token fired reports the
// caller's cancellation, not a link failure.
impl From<TransportError> for BusError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Cancelled => Self::Cancelled,
            other => Self::Transport(other),
        }
    }
}

/// Errors raised while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Reconnect delays must be strictly positive.
    #[error("reconnect delay must be positive, got {0:?}")]
    NonPositiveReconnectDelay(Duration),
}

/// Result alias used by `framebus` public APIs.
pub type Result<T> = std::result::Result<T, BusError>;
