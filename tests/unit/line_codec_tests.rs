//! Unit tests for the stdio relay's newline-delimited JSON codec.

use bytes::BytesMut;
use serde_json::json;
use tokio_util::codec::{Decoder, Encoder};

use command_bridge::relay::codec::{LineCodec, MAX_LINE_BYTES};
use command_bridge::AppError;

/// One complete line decodes to its JSON value.
#[test]
fn single_line_decodes() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\"}\n");

    let value = codec.decode(&mut buf).expect("decode must succeed").expect("line is complete");
    assert_eq!(value["method"], "initialize");
    assert!(buf.is_empty());
}

/// A line without its newline is held until the newline arrives.
#[test]
fn partial_line_is_buffered() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"id\":1,");
    assert!(codec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(b"\"method\":\"x\"}\n");
    let value = codec.decode(&mut buf).unwrap().expect("line is now complete");
    assert_eq!(value, json!({ "id": 1, "method": "x" }));
}

/// Blank lines between requests are skipped.
#[test]
fn blank_lines_are_skipped() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("\n   \n{\"id\":2}\n");
    let value = codec.decode(&mut buf).unwrap().expect("request after blank lines");
    assert_eq!(value, json!({ "id": 2 }));
}

/// A bad line is reported and the following line still decodes.
#[test]
fn malformed_line_does_not_poison_the_stream() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("not json\n{\"id\":3}\n");

    let err = codec.decode(&mut buf).expect_err("bad line must fail");
    assert!(matches!(err, AppError::MalformedFrame(_)), "got {err:?}");

    let value = codec.decode(&mut buf).unwrap().expect("next line must decode");
    assert_eq!(value, json!({ "id": 3 }));
}

/// Lines over the limit are rejected.
#[test]
fn overlong_line_is_rejected() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from(vec![b'a'; MAX_LINE_BYTES + 1].as_slice());

    let err = codec.decode(&mut buf).expect_err("overlong line must fail");
    assert!(matches!(err, AppError::FrameTooLarge(_)), "got {err:?}");
}

/// A final line without a newline is still answered at EOF.
#[test]
fn last_line_without_newline_decodes_at_eof() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"id\":4}");
    assert!(codec.decode(&mut buf).unwrap().is_none());

    let value = codec.decode_eof(&mut buf).unwrap().expect("eof flushes the last line");
    assert_eq!(value, json!({ "id": 4 }));
}

/// Encoded values are one compact line each.
#[test]
fn encoder_appends_newline() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(json!({ "id": 1, "result": null }), &mut buf).unwrap();
    assert_eq!(&buf[..], b"{\"id\":1,\"result\":null}\n");
}
