//! Wire protocol codecs
//!
//! Stateless-by-contract encode/decode strategies for the command and reply
//! wire formats. Three reply codecs exist:
//!
//! - `ascii`: newline-terminated text lines (the normal case),
//! - `binary`: length-framed frames that can carry raw image payloads,
//! - `json`: one serialized object per line.
//!
//! The shared contract: `decode` consumes exactly one complete frame from the
//! buffer or, when no full frame is present, consumes nothing and returns
//! `None` so the caller can tell that more input is needed. Decoding never
//! blocks and, apart from unrecoverable framing damage, never fails: a line
//! that cannot be parsed degrades to a value carrying the raw text, which the
//! hub surfaces as a warn-flagged reply.

pub mod ascii;
pub mod binary;
pub mod json;
pub mod words;

use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use serde::Deserialize;

use crate::error::CodecError;
use crate::msg::RoutingKey;

pub use ascii::{AsciiCodec, CommandLine, ReplyLine, RoutedReply};
pub use binary::BinaryCodec;
pub use json::JsonCodec;
pub use words::{encode_keys, encode_value, parse_keys, Delim, ParsedKeys};

/// Reply-side codec strategy for one actor connection
pub trait ReplyCodec: Send {
    /// Decode one reply frame, or `None` when the buffer holds no complete
    /// frame yet. Only unrecoverable framing damage is an error.
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ReplyLine>, CodecError>;

    /// Encode one command for transmission to the actor
    fn encode_command(&self, key: RoutingKey, text: &str) -> Bytes;
}

/// Which codec an actor connection speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Ascii,
    Binary,
    Json,
}

/// Build the codec for an actor connection
pub fn make_codec(kind: CodecKind, scratch_dir: PathBuf) -> Box<dyn ReplyCodec> {
    match kind {
        CodecKind::Ascii => Box::new(AsciiCodec::new()),
        CodecKind::Binary => Box::new(BinaryCodec::new(scratch_dir)),
        CodecKind::Json => Box::new(JsonCodec::new()),
    }
}

/// Encode one command in the given codec style.
///
/// Command encoding is stateless for every codec, so the hub can encode
/// without reaching into the connection's decoder instance.
pub fn encode_command_for(kind: CodecKind, key: RoutingKey, text: &str) -> Bytes {
    match kind {
        CodecKind::Ascii => ascii::encode_command(key, text),
        CodecKind::Binary => binary::encode_command(key, text),
        CodecKind::Json => JsonCodec::new().encode_command(key, text),
    }
}

/// Split one newline-terminated line off the front of the buffer.
///
/// Returns `None` (buffer untouched) when no terminator is present. A
/// trailing `\r` is stripped; bytes are decoded lossily since the grammar is
/// ASCII with opaque UTF-8 values.
pub fn take_line(buf: &mut BytesMut) -> Option<String> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let line = buf.split_to(pos + 1);
    let mut end = line.len() - 1;
    if end > 0 && line[end - 1] == b'\r' {
        end -= 1;
    }
    Some(String::from_utf8_lossy(&line[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_line_waits_for_terminator() {
        let mut buf = BytesMut::from(&b"partial"[..]);
        assert_eq!(take_line(&mut buf), None);
        assert_eq!(&buf[..], b"partial");

        buf.extend_from_slice(b" line\nrest");
        assert_eq!(take_line(&mut buf), Some("partial line".to_string()));
        assert_eq!(&buf[..], b"rest");
    }

    #[test]
    fn test_take_line_strips_cr() {
        let mut buf = BytesMut::from(&b"hello\r\n"[..]);
        assert_eq!(take_line(&mut buf), Some("hello".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_take_line_empty_line() {
        let mut buf = BytesMut::from(&b"\n"[..]);
        assert_eq!(take_line(&mut buf), Some(String::new()));
    }
}
