//! Typed message contracts.
//!
//! A [`Message`] names its wire type tag; the tag is what subscribers register
//! under and what responders route on. A [`Request`] additionally names the
//! reply type a responder produces for it.

use serde::{Serialize, de::DeserializeOwned};

/// A payload type that can travel inside a [`Frame`](crate::Frame).
///
/// ```
/// use framebus::Message;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Ping {
///     seq: u32,
/// }
///
/// impl Message for Ping {
///     const TYPE_TAG: &'static str = "Ping";
/// }
///
/// assert_eq!(Ping::TYPE_TAG, "Ping");
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type tag written into every frame carrying this message.
    const TYPE_TAG: &'static str;
}

/// A message answered with a typed reply.
pub trait Request: Message {
    /// Value returned by the responder's reply handler.
    type Response: Serialize + DeserializeOwned + Send + 'static;
}
