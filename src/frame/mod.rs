//! Wire frames and acknowledgements.
//!
//! A [`Frame`] wraps an encoded payload with a unique identifier and a type
//! tag. Responders answer every inbound frame with an [`Acknowledgement`]
//! carried inside a frame tagged [`ACK_TYPE`], correlated to the original
//! frame by its identifier.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::Envelope;

/// Reserved type tag of frames carrying an [`Acknowledgement`].
///
/// Both ends of a connection must agree on this value.
pub const ACK_TYPE: &str = "framebus.ack";

/// Status codes carried by [`Acknowledgement::status_code`].
pub mod status {
    /// Every handler completed successfully.
    pub const OK: i32 = 200;
    /// No handler is registered for the frame's type tag.
    pub const NOT_FOUND: i32 = 404;
    /// At least one handler failed.
    pub const HANDLER_FAILED: i32 = 500;
}

/// 128-bit identifier of a frame, also used as the correlation id of the
/// acknowledgement answering it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(Uuid);

impl FrameId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn random() -> Self { Self(Uuid::new_v4()) }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self { Self(uuid) }

    /// Build an identifier from its 128-bit integer representation.
    ///
    /// ```
    /// use framebus::FrameId;
    ///
    /// assert_eq!(FrameId::from_u128(7), FrameId::from_u128(7));
    /// ```
    #[must_use]
    pub const fn from_u128(value: u128) -> Self { Self(Uuid::from_u128(value)) }

    /// Return the wrapped UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid { &self.0 }
}

impl From<Uuid> for FrameId {
    fn from(value: Uuid) -> Self { Self(value) }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// Unit of transmission: an identifier, a type tag and an opaque payload.
///
/// Frames are immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    id: FrameId,
    #[serde(rename = "type")]
    type_tag: String,
    payload: Vec<u8>,
}

impl Frame {
    /// Wrap an encoded payload under `type_tag`, assigning a fresh identifier.
    ///
    /// ```
    /// use framebus::Frame;
    ///
    /// let a = Frame::wrap("Ping", vec![1]);
    /// let b = Frame::wrap("Ping", vec![1]);
    /// assert_ne!(a.id(), b.id());
    /// assert_eq!(a.type_tag(), "Ping");
    /// ```
    #[must_use]
    pub fn wrap(type_tag: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::with_id(FrameId::random(), type_tag, payload)
    }

    /// Build a frame with an explicit identifier.
    #[must_use]
    pub fn with_id(id: FrameId, type_tag: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id,
            type_tag: type_tag.into(),
            payload,
        }
    }

    #[must_use]
    pub const fn id(&self) -> FrameId { self.id }

    #[must_use]
    pub fn type_tag(&self) -> &str { &self.type_tag }

    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// Consume the frame and return its payload bytes.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> { self.payload }

    /// Return `true` when the frame carries an [`Acknowledgement`].
    #[must_use]
    pub fn is_acknowledgement(&self) -> bool { self.type_tag == ACK_TYPE }

    /// Borrow a read-only [`Envelope`] view for interceptors.
    #[must_use]
    pub const fn envelope(&self) -> Envelope<'_> { Envelope::new(self) }
}

/// Reply to a single [`Frame`], matched to it by `correlation_id`.
///
/// Protocol-level failures (no handler, handler error) travel inside the
/// acknowledgement as a status code and message; they are never raised across
/// the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    /// Identifier of the frame being acknowledged.
    pub correlation_id: FrameId,
    /// HTTP-style status; see [`status`].
    pub status_code: i32,
    /// Failure details, if any.
    pub error_message: Option<String>,
    /// Encoded reply value for typed requests.
    pub payload: Option<Vec<u8>>,
}

impl Acknowledgement {
    /// Successful acknowledgement without a reply payload.
    #[must_use]
    pub fn ok(correlation_id: FrameId) -> Self {
        Self {
            correlation_id,
            status_code: status::OK,
            error_message: None,
            payload: None,
        }
    }

    /// Acknowledgement reporting that no handler exists for `type_tag`.
    ///
    /// ```
    /// use framebus::{Acknowledgement, FrameId, frame::status};
    ///
    /// let ack = Acknowledgement::not_found(FrameId::from_u128(1), "Ping");
    /// assert_eq!(ack.status_code, status::NOT_FOUND);
    /// assert_eq!(ack.error_message.as_deref(), Some("no handler for type Ping"));
    /// ```
    #[must_use]
    pub fn not_found(correlation_id: FrameId, type_tag: &str) -> Self {
        Self {
            correlation_id,
            status_code: status::NOT_FOUND,
            error_message: Some(format!("no handler for type {type_tag}")),
            payload: None,
        }
    }

    /// Acknowledgement reporting a handler failure.
    #[must_use]
    pub fn failed(correlation_id: FrameId, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            status_code: status::HANDLER_FAILED,
            error_message: Some(message.into()),
            payload: None,
        }
    }

    /// Attach an encoded reply payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Return `true` for any status in the 2xx family.
    #[must_use]
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status_code) }
}
