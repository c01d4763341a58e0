//! Value codec for length-prefixed JSON framing.
//!
//! The wire carries a flat sequence of values. Each value is framed as:
//! - 4 bytes: payload length (big-endian u32)
//! - N bytes: JSON payload
//!
//! There is no request-level framing: the reader must know from protocol
//! position how many values come next.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Result, WireError};

/// Default maximum payload length of a single value (16 MB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// One decoded value slot on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A well-formed value
    Value(Value),
    /// A complete frame whose payload did not decode; the bytes were consumed
    Malformed(String),
}

impl Frame {
    /// Convert into the value, mapping a malformed frame to a protocol error.
    pub fn into_value(self) -> Result<Value> {
        match self {
            Frame::Value(value) => Ok(value),
            Frame::Malformed(reason) => Err(WireError::Protocol(reason)),
        }
    }
}

/// Length-prefixed JSON value codec.
#[derive(Debug, Clone)]
pub struct ValueCodec {
    max_length: usize,
}

impl ValueCodec {
    /// Create a new codec with default max length (16 MB).
    pub fn new() -> Self {
        Self {
            max_length: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Create a new codec with custom max length.
    pub fn with_max_length(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Get the max payload length.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn too_large(&self, length: usize) -> std::io::Error {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Frame too large: {} > {}", length, self.max_length),
        )
    }
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ValueCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // Peek at the length without consuming
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        // An oversized header means we can no longer find frame boundaries
        if length > self.max_length {
            return Err(self.too_large(length));
        }

        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let data = src.split_to(length);

        match serde_json::from_slice(&data) {
            Ok(value) => Ok(Some(Frame::Value(value))),
            Err(e) => Ok(Some(Frame::Malformed(format!("JSON error: {}", e)))),
        }
    }
}

impl Encoder<Value> for ValueCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("JSON error: {}", e)))?;

        if json.len() > self.max_length {
            return Err(self.too_large(json.len()));
        }

        dst.reserve(HEADER_LEN + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);

        Ok(())
    }
}

/// Encode a single value to bytes using length-prefixed framing.
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    let length = u32::try_from(json.len()).map_err(|_| WireError::Protocol("Value too large to frame".into()))?;
    let mut result = Vec::with_capacity(HEADER_LEN + json.len());
    result.extend_from_slice(&length.to_be_bytes());
    result.extend_from_slice(&json);
    Ok(result)
}

/// Decode a single value from bytes using length-prefixed framing.
pub fn decode_value(data: &[u8]) -> Result<Value> {
    if data.len() < HEADER_LEN {
        return Err(WireError::Protocol("Frame too short".into()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if data.len() < HEADER_LEN + length {
        return Err(WireError::Protocol("Incomplete frame".into()));
    }

    serde_json::from_slice(&data[HEADER_LEN..HEADER_LEN + length])
        .map_err(|e| WireError::Protocol(format!("JSON error: {}", e)))
}
