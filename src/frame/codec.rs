//! Parse-boundary JSON codec.
//!
//! [`JsonFrameCodec`] implements [`tokio_util::codec::Decoder`] and
//! [`tokio_util::codec::Encoder`] over the "boundary = successful parse"
//! rule so any byte source can be framed with it.

use bytes::{Buf, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::DEFAULT_MAX_FRAME_BYTES;
use crate::{AppError, Result};

/// Outcome of one attempt to cut a value off the front of a buffer.
enum Cut {
    /// A value plus the number of bytes it occupied.
    Value(Value, usize),
    /// Bytes so far are a valid prefix of some JSON value.
    Incomplete,
    /// Bytes can never become valid JSON.
    Invalid(serde_json::Error),
}

/// JSON frame codec with a bounded accumulator.
#[derive(Debug, Clone)]
pub struct JsonFrameCodec {
    max_frame_bytes: usize,
}

impl JsonFrameCodec {
    /// Codec with the default [`DEFAULT_MAX_FRAME_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Codec rejecting frames longer than `max_frame_bytes`.
    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    /// Configured frame limit in bytes.
    #[must_use]
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl Default for JsonFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonFrameCodec {
    type Item = Value;
    type Error = AppError;

    /// Cut the next complete value off the front of `src`.
    ///
    /// Returns `Ok(None)` while `src` holds only whitespace or a valid
    /// prefix. Bytes after the value stay in `src` for the next call.
    ///
    /// # Errors
    ///
    /// - `AppError::MalformedFrame` when the bytes are syntactically
    ///   invalid; `src` is cleared.
    /// - `AppError::FrameTooLarge` when a frame exceeds the limit; `src` is
    ///   cleared.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>> {
        let leading = src
            .iter()
            .position(|byte| !byte.is_ascii_whitespace())
            .unwrap_or(src.len());
        src.advance(leading);

        if src.is_empty() {
            return Ok(None);
        }

        match cut_value(src) {
            Cut::Value(value, consumed) => {
                src.advance(consumed);
                if consumed > self.max_frame_bytes {
                    return Err(AppError::FrameTooLarge(format!(
                        "{consumed} bytes exceeds limit of {}",
                        self.max_frame_bytes
                    )));
                }
                Ok(Some(value))
            }
            Cut::Incomplete if src.len() > self.max_frame_bytes => {
                let buffered = src.len();
                src.clear();
                Err(AppError::FrameTooLarge(format!(
                    "{buffered} bytes buffered without a complete value, limit is {}",
                    self.max_frame_bytes
                )))
            }
            Cut::Incomplete => Ok(None),
            Cut::Invalid(err) => {
                src.clear();
                Err(AppError::MalformedFrame(err.to_string()))
            }
        }
    }

    /// Decode the last value when the peer has closed the stream.
    ///
    /// # Errors
    ///
    /// Returns `AppError::IncompleteResponse` when a partial value is left
    /// over; `src` is cleared.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Value>> {
        if let Some(value) = self.decode(src)? {
            return Ok(Some(value));
        }

        if src.is_empty() {
            Ok(None)
        } else {
            let buffered = src.len();
            src.clear();
            Err(AppError::IncompleteResponse(format!(
                "stream ended with {buffered} bytes of a partial frame"
            )))
        }
    }
}

impl Encoder<Value> for JsonFrameCodec {
    type Error = AppError;

    /// Encode `item` as compact JSON with no delimiter.
    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<()> {
        let bytes = serde_json::to_vec(&item)?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Try to parse one value from the start of `bytes`.
fn cut_value(bytes: &[u8]) -> Cut {
    let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Cut::Value(value, stream.byte_offset()),
        Some(Err(err)) if err.is_eof() || truncated_number(bytes) => Cut::Incomplete,
        Some(Err(err)) => Cut::Invalid(err),
        None => Cut::Incomplete,
    }
}

/// Whether `bytes` ends inside a number.
///
/// `serde_json` reports a number cut off after `-`, `+`, `.` or an exponent
/// marker as a syntax error rather than EOF. Completing it with one digit
/// tells truncation apart from garbage.
fn truncated_number(bytes: &[u8]) -> bool {
    if !matches!(bytes.last(), Some(b'-' | b'+' | b'.' | b'e' | b'E')) {
        return false;
    }

    let mut probe = Vec::with_capacity(bytes.len() + 1);
    probe.extend_from_slice(bytes);
    probe.push(b'0');
    match serde_json::Deserializer::from_slice(&probe).into_iter::<Value>().next() {
        Some(Ok(_)) | None => true,
        Some(Err(err)) => err.is_eof(),
    }
}
