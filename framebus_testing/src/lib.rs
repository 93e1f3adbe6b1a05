//! Shared fixtures for `framebus` tests.
//!
//! ```rust
//! use framebus::{MessageBusBuilder, ResponderBuilder, frame::status};
//! use framebus_testing::{TestMessage, serve_pair};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let responder = ResponderBuilder::new().build();
//! responder.subscribe(|_: TestMessage| async { Ok(()) });
//! let (client, served) = serve_pair(responder).await;
//!
//! let bus = MessageBusBuilder::new().connect(client).await.unwrap();
//! let ack = bus
//!     .request(&TestMessage { value: 1 }, &CancellationToken::new())
//!     .await
//!     .unwrap();
//! assert_eq!(ack.status_code, status::OK);
//! served.shutdown().await;
//! # }
//! ```

pub mod frames;
pub mod interceptor;
pub mod logging;
pub mod transport;

pub use frames::{Doubling, TestMessage, ack_bytes, decode_ack, decode_sent, message_bytes};
pub use interceptor::{Observed, RecordingInterceptor, observed};
pub use logging::{LoggerHandle, logger};
pub use transport::{ServedResponder, serve_pair};
