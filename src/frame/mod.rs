//! Message boundary detection for delimiter-less JSON streams.
//!
//! The command server wire format carries no length prefix and no
//! delimiter. A frame ends where the accumulated bytes first parse as one
//! complete JSON value. Truncation is told apart from corruption through
//! [`serde_json::Error::is_eof`].
//!
//! Known weakness: a value that is a complete JSON document on its own
//! *and* a prefix of a longer one (a bare number such as `12` followed later
//! by `3`) is reported as soon as it parses. Object and array frames, which
//! is all the bridge exchanges, are unaffected.

pub mod buffer;
pub mod codec;

pub use buffer::FrameBuffer;
pub use codec::JsonFrameCodec;
