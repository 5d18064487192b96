//! NDJSON codec for the stdio relay transport.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length to prevent memory exhaustion caused by unterminated or maliciously
//! large requests, and parses each line as one JSON value.

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted on the stdio transport: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited JSON codec.
///
/// # Decoder
///
/// Blank lines are skipped. A line that is not valid JSON yields
/// [`AppError::MalformedFrame`]; the line has already been consumed, so the
/// next call continues with the following line. Lines longer than
/// [`MAX_LINE_BYTES`] yield [`AppError::FrameTooLarge`].
///
/// # Encoder
///
/// Values are written as compact JSON followed by `\n`.
#[derive(Debug)]
pub struct LineCodec(LinesCodec);

impl LineCodec {
    /// Create a new `LineCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Value;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode(src).map_err(map_codec_error)? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => {}
                Some(line) => return parse_line(&line).map(Some),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode_eof(src).map_err(map_codec_error)? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => {}
                Some(line) => return parse_line(&line).map(Some),
            }
        }
    }
}

impl Encoder<Value> for LineCodec {
    type Error = AppError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<()> {
        let line = serde_json::to_string(&item)?;
        // LinesCodec::encode does not enforce a max line length;
        // the limit applies only to decoding.
        self.0.encode(line, dst).map_err(map_codec_error)
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn parse_line(line: &str) -> Result<Value> {
    serde_json::from_str(line).map_err(|err| AppError::MalformedFrame(format!("invalid json line: {err}")))
}

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::FrameTooLarge(format!("line exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
