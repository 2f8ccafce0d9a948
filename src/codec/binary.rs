//! Length-framed binary codec
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! tag(1) isImage(1) length(4) mid(2) cid(2) body... checksum(1) trailer(1)
//! ```
//!
//! `length` covers everything after itself: mid + cid + body + checksum +
//! trailer. The checksum is the XOR of every byte from `tag` through the end
//! of the body; the trailer is a fixed 0x0A. A checksum mismatch or an
//! unexpected trailer is logged and the reply is still delivered since the frame
//! boundary is already known, so there is nothing to resynchronize.
//!
//! A frame with `isImage > 1` carries raw pixel data:
//!
//! ```text
//! body := flag(1) width(2) height(2) bitsPerPixel(2) pixels...
//! ```
//!
//! The decoder persists the pixels to a scratch file and substitutes a
//! `scratchFile` key for them, alongside the image dimensions, so the rest of
//! the hub only ever sees keyword values.

use std::path::PathBuf;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::words::{parse_keys, Delim};
use super::{ReplyCodec, ReplyLine};
use crate::error::CodecError;
use crate::msg::{KeyValue, KeyValues, ReplyFlag, RoutingKey};

/// Command frame tag
const TAG_COMMAND: u8 = 0x01;
/// Reply frame tag
const TAG_REPLY: u8 = 0x02;
/// Fixed trailer byte
const TRAILER: u8 = 0x0A;
/// Bytes of header before the length field
const PRE_LENGTH: usize = 6;
/// mid + cid + checksum + trailer
const LENGTH_OVERHEAD: usize = 6;
/// Reject frames claiming more than this many bytes
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Binary reply codec for an actor connection
pub struct BinaryCodec {
    scratch_dir: PathBuf,
    scratch_seq: u64,
}

impl BinaryCodec {
    /// Create a binary codec writing image payloads under `scratch_dir`
    pub fn new(scratch_dir: PathBuf) -> Self {
        Self {
            scratch_dir,
            scratch_seq: 0,
        }
    }

    fn decode_image_body(&mut self, key: RoutingKey, body: &[u8]) -> ReplyLine {
        let mut keys = KeyValues::new();
        let flag = body
            .first()
            .and_then(|&b| ReplyFlag::from_char(b as char))
            .unwrap_or(ReplyFlag::Info);

        if body.len() < 7 {
            tracing::warn!(key = %key, len = body.len(), "image body too short");
            keys.insert("imageError", KeyValue::Scalar("truncated image body".into()));
            return ReplyLine {
                key,
                flag: ReplyFlag::Warn,
                keys,
                degraded: true,
            };
        }

        let mut dims = &body[1..7];
        let width = dims.get_u16();
        let height = dims.get_u16();
        let bits_per_pixel = dims.get_u16();
        let pixels = &body[7..];

        self.scratch_seq += 1;
        let path = self.scratch_dir.join(format!(
            "img_{}_{}_{}.raw",
            key.cid, key.mid, self.scratch_seq
        ));

        match std::fs::write(&path, pixels) {
            Ok(()) => {
                keys.insert(
                    "scratchFile",
                    KeyValue::Scalar(path.to_string_lossy().into_owned()),
                );
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "cannot write scratch file");
                keys.insert("imageError", KeyValue::Scalar(e.to_string()));
            }
        }
        keys.insert("imgWidth", KeyValue::Scalar(width.to_string()));
        keys.insert("imgHeight", KeyValue::Scalar(height.to_string()));
        keys.insert("bitsPerPixel", KeyValue::Scalar(bits_per_pixel.to_string()));

        ReplyLine {
            key,
            flag,
            keys,
            degraded: false,
        }
    }

    fn decode_text_body(&self, key: RoutingKey, body: &[u8]) -> ReplyLine {
        let text = String::from_utf8_lossy(body);
        let mut chars = text.chars();
        let flag = chars.next().and_then(ReplyFlag::from_char);
        match flag {
            Some(flag) => {
                let parsed = parse_keys(chars.as_str(), Delim::Semicolon);
                ReplyLine {
                    key,
                    flag,
                    keys: parsed.keys,
                    degraded: parsed.degraded,
                }
            }
            None => {
                let mut line = ReplyLine::raw(&text);
                line.key = key;
                line
            }
        }
    }
}

impl ReplyCodec for BinaryCodec {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ReplyLine>, CodecError> {
        if buf.len() < PRE_LENGTH {
            return Ok(None);
        }

        let tag = buf[0];
        let is_image = buf[1];
        let length = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as usize;

        if length > MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLarge(length));
        }
        if length < LENGTH_OVERHEAD {
            return Err(CodecError::FrameTooShort(length));
        }
        if buf.len() < PRE_LENGTH + length {
            return Ok(None);
        }

        let frame = buf.split_to(PRE_LENGTH + length);
        if tag != TAG_REPLY {
            return Err(CodecError::UnknownTag(tag));
        }

        let mut ids = &frame[PRE_LENGTH..PRE_LENGTH + 4];
        let mid = ids.get_u16() as u32;
        let cid = ids.get_u16() as u32;
        let key = RoutingKey::new(cid, mid);

        let body_end = frame.len() - 2;
        let body = &frame[PRE_LENGTH + 4..body_end];
        let checksum = frame[body_end];
        let trailer = frame[body_end + 1];

        let computed = frame[..body_end].iter().fold(0u8, |acc, &b| acc ^ b);
        if computed != checksum {
            tracing::warn!(
                key = %key,
                expected = checksum,
                computed = computed,
                "binary frame checksum mismatch"
            );
        }
        if trailer != TRAILER {
            tracing::warn!(key = %key, trailer = trailer, "unexpected frame trailer");
        }

        let reply = if is_image > 1 {
            self.decode_image_body(key, body)
        } else {
            self.decode_text_body(key, body)
        };
        Ok(Some(reply))
    }

    fn encode_command(&self, key: RoutingKey, text: &str) -> Bytes {
        encode_frame(TAG_COMMAND, 0, key, text.as_bytes())
    }
}

/// Encode one command frame
pub fn encode_command(key: RoutingKey, text: &str) -> Bytes {
    encode_frame(TAG_COMMAND, 0, key, text.as_bytes())
}

/// Assemble one frame, computing length and checksum
pub fn encode_frame(tag: u8, is_image: u8, key: RoutingKey, body: &[u8]) -> Bytes {
    let length = body.len() + LENGTH_OVERHEAD;
    let mut buf = BytesMut::with_capacity(PRE_LENGTH + length);
    buf.put_u8(tag);
    buf.put_u8(is_image);
    buf.put_u32(length as u32);
    buf.put_u16(key.mid as u16);
    buf.put_u16(key.cid as u16);
    buf.put_slice(body);

    let checksum = buf.iter().fold(0u8, |acc, &b| acc ^ b);
    buf.put_u8(checksum);
    buf.put_u8(TRAILER);
    buf.freeze()
}
