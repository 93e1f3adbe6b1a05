#![doc(html_root_url = "https://docs.rs/framebus/latest")]
//! Public API for the `framebus` library.
//!
//! `framebus` moves typed messages between peers over any [`Transport`].
//! Every message travels in a [`Frame`] carrying a unique [`FrameId`] and a
//! type tag. A [`MessageBus`] sends frames, matches returning
//! [`Acknowledgement`]s to the requests that are waiting for them and keeps
//! the connection alive with a fixed-delay reconnect loop. A [`Responder`]
//! dispatches inbound frames to subscribers and answers each one with an
//! acknowledgement.
//!
//! ```
//! use framebus::{
//!     BusError,
//!     Message,
//!     MessageBusBuilder,
//!     ResponderBuilder,
//!     frame::status,
//!     transport::MemoryTransport,
//! };
//! use serde::{Deserialize, Serialize};
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Greeting {
//!     name: String,
//! }
//!
//! impl Message for Greeting {
//!     const TYPE_TAG: &'static str = "Greeting";
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), BusError> {
//! let (client_side, server_side) = MemoryTransport::pair();
//!
//! let responder = ResponderBuilder::new().build();
//! responder.subscribe(|g: Greeting| async move {
//!     println!("hello, {}", g.name);
//!     Ok(())
//! });
//! let cancel = CancellationToken::new();
//! tokio::spawn({
//!     let server_side = server_side.clone();
//!     let cancel = cancel.clone();
//!     async move { responder.serve(&server_side, &cancel).await }
//! });
//! while !server_side.is_connected() {
//!     tokio::task::yield_now().await;
//! }
//!
//! let bus = MessageBusBuilder::new().connect(client_side).await?;
//! let ack = bus
//!     .request(&Greeting { name: "bus".into() }, &cancel)
//!     .await?;
//! assert_eq!(ack.status_code, status::OK);
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod codec;
pub mod correlation;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod interceptor;
pub mod lifecycle;
pub mod mediator;
pub mod message;
pub mod metrics;
pub mod middleware;
pub mod responder;
pub mod server;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use bus::{MessageBus, MessageBusBuilder, TypedAcknowledgement};
pub use codec::{BincodeCodec, Codec, CodecError, JsonCodec};
pub use dispatch::HandlerError;
pub use envelope::Envelope;
pub use error::{BusError, ConfigError, Result};
pub use frame::{ACK_TYPE, Acknowledgement, Frame, FrameId};
pub use interceptor::{Interceptor, InterceptorError};
pub use lifecycle::{ConnectionState, ReconnectConfig};
pub use mediator::{Pipeline, PipelineBuilder};
pub use message::{Message, Request};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_TOTAL, PENDING_REQUESTS};
pub use middleware::{Middleware, Next, Service};
pub use responder::{Responder, ResponderBuilder};
pub use server::{BackoffConfig, ResponderServer, ServerError};
pub use transport::{Transport, TransportError, TransportEvent};
