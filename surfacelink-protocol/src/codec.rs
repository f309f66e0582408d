//! Message codec for socket framing
//!
//! Frames are a 4-byte big-endian length followed by that many bytes of UTF-8
//! JSON. The prefix makes framing independent of the JSON content.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{Request, Response};

/// Default maximum message size (16 MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Largest body the 4-byte length prefix can describe
pub const MAX_FRAME_SIZE: usize = u32::MAX as usize;

const LENGTH_PREFIX: usize = 4;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// A complete frame pulled off the stream
///
/// A frame whose body is not a valid message is still consumed, so the
/// stream stays aligned on frame boundaries and the connection can answer
/// with an error instead of closing.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Message(T),
    Malformed(String),
}

/// Length-prefixed JSON codec, decoding `D` and encoding `E`
#[derive(Debug)]
pub struct JsonCodec<D, E> {
    max_size: usize,
    _marker: PhantomData<fn(E) -> D>,
}

impl<D, E> JsonCodec<D, E> {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a codec that rejects frames larger than `max_size` bytes
    ///
    /// Limits above [`MAX_FRAME_SIZE`] are clamped to it.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size: max_size.min(MAX_FRAME_SIZE),
            _marker: PhantomData,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<D, E> Default for JsonCodec<D, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DeserializeOwned, E> Decoder for JsonCodec<D, E> {
    type Item = Decoded<D>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_message(src, self.max_size)
    }
}

impl<D, E: Serialize> Encoder<E> for JsonCodec<D, E> {
    type Error = CodecError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst, self.max_size)
    }
}

/// Codec for Request (decoding) and Response (encoding)
/// Used by the bridge side
pub type ServerCodec = JsonCodec<Request, Response>;

/// Codec for Request (encoding) and Response (decoding)
/// Used by the client side
pub type ClientCodec = JsonCodec<Response, Request>;

/// Decode a length-prefixed message
fn decode_message<T: DeserializeOwned>(
    src: &mut BytesMut,
    max_size: usize,
) -> Result<Option<Decoded<T>>, CodecError> {
    // Need at least 4 bytes for length prefix
    if src.len() < LENGTH_PREFIX {
        return Ok(None);
    }

    // Peek at length without consuming
    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

    if len > max_size {
        return Err(CodecError::MessageTooLarge {
            size: len,
            max: max_size,
        });
    }

    if src.len() < LENGTH_PREFIX + len {
        src.reserve(LENGTH_PREFIX + len - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX);
    let data = src.split_to(len);

    match serde_json::from_slice::<T>(&data) {
        Ok(msg) => Ok(Some(Decoded::Message(msg))),
        Err(e) => Ok(Some(Decoded::Malformed(e.to_string()))),
    }
}

/// Encode a length-prefixed message
///
/// Nothing is appended to `dst` unless the whole frame fits.
fn encode_message<T: Serialize>(
    item: &T,
    dst: &mut BytesMut,
    max_size: usize,
) -> Result<(), CodecError> {
    let data = serde_json::to_vec(item)?;

    if data.len() > max_size {
        return Err(CodecError::MessageTooLarge {
            size: data.len(),
            max: max_size,
        });
    }

    dst.reserve(LENGTH_PREFIX + data.len());
    dst.put_u32(data.len() as u32);
    dst.put_slice(&data);
    Ok(())
}
