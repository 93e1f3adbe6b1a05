//! Pluggable payload codecs.
//!
//! A [`Codec`] turns typed values into bytes and back. The same codec encodes
//! message payloads and the [`Frame`]/[`Acknowledgement`] structures that
//! carry them, so both ends of a connection must use the same implementation.
//!
//! [`BincodeCodec`] (binary, the default) and [`JsonCodec`] (textual) are
//! provided.

use std::error::Error;

use bincode::config;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::frame::{Acknowledgement, Frame};

/// Errors raised while encoding or decoding values.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value could not be encoded.
    #[error("failed to encode value: {0}")]
    Encode(#[source] Box<dyn Error + Send + Sync>),
    /// The bytes could not be decoded into the requested type.
    #[error("failed to decode value: {0}")]
    Decode(#[source] Box<dyn Error + Send + Sync>),
    /// Decoding succeeded without consuming the whole input.
    #[error("{remaining} trailing bytes after decoded value")]
    TrailingBytes {
        /// Number of unread bytes.
        remaining: usize,
    },
}

/// Trait for serializing and deserializing values.
///
/// # Object Safety
///
/// This trait is not object-safe: its methods are generic over the value
/// type. Components that need a codec take it as a type parameter and share
/// it behind an [`Arc`](std::sync::Arc).
pub trait Codec: Send + Sync + 'static {
    /// Encode `value` into a byte vector.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the value cannot be represented.
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized;

    /// Decode a value of type `T` from `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes are malformed and
    /// [`CodecError::TrailingBytes`] if input remains after the value.
    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned;

    /// Encode a frame for transmission.
    ///
    /// # Errors
    ///
    /// Propagates [`Codec::encode`] failures.
    fn encode_frame(&self, frame: &Frame) -> Result<Vec<u8>, CodecError> { self.encode(frame) }

    /// Decode a frame received from a transport.
    ///
    /// # Errors
    ///
    /// Propagates [`Codec::decode`] failures.
    fn decode_frame(&self, bytes: &[u8]) -> Result<Frame, CodecError> { self.decode(bytes) }

    /// Decode the acknowledgement carried in an acknowledgement frame's
    /// payload.
    ///
    /// # Errors
    ///
    /// Propagates [`Codec::decode`] failures.
    fn decode_acknowledgement(&self, payload: &[u8]) -> Result<Acknowledgement, CodecError> {
        self.decode(payload)
    }
}

/// Codec using `bincode` with its standard configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        bincode::serde::encode_to_vec(value, config::standard())
            .map_err(|error| CodecError::Encode(Box::new(error)))
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        let (value, consumed) = bincode::serde::decode_from_slice(bytes, config::standard())
            .map_err(|error| CodecError::Decode(Box::new(error)))?;
        if consumed < bytes.len() {
            return Err(CodecError::TrailingBytes {
                remaining: bytes.len() - consumed,
            });
        }
        Ok(value)
    }
}

/// Codec producing UTF-8 JSON documents.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value).map_err(|error| CodecError::Encode(Box::new(error)))
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(|error| CodecError::Decode(Box::new(error)))
    }
}
