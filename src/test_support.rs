//! Frame builders shared by unit tests.

use bytes::Bytes;

use crate::{
    codec::{BincodeCodec, Codec},
    frame::{ACK_TYPE, Acknowledgement, Frame, FrameId},
    message::Message,
};

pub(crate) fn message_frame<M: Message>(id: FrameId, message: &M) -> Frame {
    Frame::with_id(id, M::TYPE_TAG, BincodeCodec.encode(message).expect("encode message"))
}

pub(crate) fn frame_bytes(frame: &Frame) -> Bytes {
    Bytes::from(BincodeCodec.encode_frame(frame).expect("encode frame"))
}

/// Encode `message` under a fresh identifier.
pub(crate) fn message_bytes<M: Message>(message: &M) -> Bytes {
    frame_bytes(&message_frame(FrameId::random(), message))
}

pub(crate) fn ack_bytes(ack: &Acknowledgement) -> Bytes {
    let payload = BincodeCodec.encode(ack).expect("encode acknowledgement");
    frame_bytes(&Frame::wrap(ACK_TYPE, payload))
}

pub(crate) fn decode_sent(bytes: &[u8]) -> Frame { BincodeCodec.decode_frame(bytes).expect("decode frame") }

/// Split an acknowledgement frame into its envelope and decoded body.
pub(crate) fn decode_ack(bytes: &[u8]) -> (Frame, Acknowledgement) {
    let frame = decode_sent(bytes);
    assert!(frame.is_acknowledgement(), "expected an acknowledgement frame");
    let ack = BincodeCodec
        .decode_acknowledgement(frame.payload())
        .expect("decode acknowledgement");
    (frame, ack)
}
