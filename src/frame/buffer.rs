//! Push-style frame accumulator.

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::Decoder;

use super::codec::JsonFrameCodec;
use crate::Result;

/// Accumulates raw bytes until they form one complete JSON value.
///
/// One buffer belongs to one connection. Feed it every chunk read from the
/// socket; it hands back a value as soon as the bytes seen so far parse.
///
/// ```
/// use command_bridge::frame::FrameBuffer;
///
/// let mut frames = FrameBuffer::new();
/// assert!(frames.feed(br#"{"status":"succ"#).unwrap().is_none());
/// let value = frames.feed(br#"ess","result":{}}"#).unwrap().unwrap();
/// assert_eq!(value["status"], "success");
/// ```
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
    codec: JsonFrameCodec,
}

impl FrameBuffer {
    /// Buffer with the default frame limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer rejecting frames longer than `max_frame_bytes`.
    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            codec: JsonFrameCodec::with_max_frame_bytes(max_frame_bytes),
        }
    }

    /// Append `bytes` and try to extract a complete value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MalformedFrame` or `AppError::FrameTooLarge`;
    /// the accumulator is reset in both cases.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Option<Value>> {
        self.buf.extend_from_slice(bytes);
        self.next_frame()
    }

    /// Extract a value already sitting in the accumulator without adding
    /// bytes, e.g. a second value that arrived in the same read.
    ///
    /// # Errors
    ///
    /// Same as [`feed`](Self::feed).
    pub fn next_frame(&mut self) -> Result<Option<Value>> {
        self.codec.decode(&mut self.buf)
    }

    /// Whether bytes of an unfinished frame are buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.buf.iter().any(|byte| !byte.is_ascii_whitespace())
    }

    /// Number of bytes currently buffered.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Discard everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
