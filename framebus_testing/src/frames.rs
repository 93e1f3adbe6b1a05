//! Message types and frame builders shared by tests.

use bytes::Bytes;
use framebus::{ACK_TYPE, Acknowledgement, BincodeCodec, Codec, Frame, FrameId, Message, Request};
use serde::{Deserialize, Serialize};

/// Minimal message carrying one integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMessage {
    pub value: i32,
}

impl Message for TestMessage {
    const TYPE_TAG: &'static str = "TestMessage";
}

/// Request answered with the doubled value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doubling(pub i64);

impl Message for Doubling {
    const TYPE_TAG: &'static str = "Doubling";
}

impl Request for Doubling {
    type Response = i64;
}

/// Encode `message` into a complete frame with the default codec.
///
/// # Panics
///
/// Panics if encoding fails.
#[must_use]
pub fn message_bytes<M: Message>(id: FrameId, message: &M) -> Bytes {
    let payload = BincodeCodec.encode(message).expect("encode message");
    let frame = Frame::with_id(id, M::TYPE_TAG, payload);
    Bytes::from(BincodeCodec.encode_frame(&frame).expect("encode frame"))
}

/// Encode `ack` into an acknowledgement frame with the default codec.
///
/// # Panics
///
/// Panics if encoding fails.
#[must_use]
pub fn ack_bytes(ack: &Acknowledgement) -> Bytes {
    let payload = BincodeCodec.encode(ack).expect("encode acknowledgement");
    let frame = Frame::wrap(ACK_TYPE, payload);
    Bytes::from(BincodeCodec.encode_frame(&frame).expect("encode frame"))
}

/// Decode one frame written by a bus or responder using the default codec.
///
/// # Panics
///
/// Panics if `bytes` is not a valid frame.
#[must_use]
pub fn decode_sent(bytes: &[u8]) -> Frame { BincodeCodec.decode_frame(bytes).expect("decode frame") }

/// Decode the acknowledgement carried by `bytes`.
///
/// # Panics
///
/// Panics if `bytes` is not an acknowledgement frame.
#[must_use]
pub fn decode_ack(bytes: &[u8]) -> Acknowledgement {
    let frame = decode_sent(bytes);
    assert!(frame.is_acknowledgement(), "expected an acknowledgement frame");
    BincodeCodec
        .decode_acknowledgement(frame.payload())
        .expect("decode acknowledgement")
}
