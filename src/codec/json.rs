//! Serialized-object line codec
//!
//! One JSON object per newline-terminated line:
//!
//! ```text
//! actor -> hub:  {"cid": 3, "mid": 7, "flag": "i", "keys": {"state": "idle"}}
//! hub -> actor:  {"cid": 3, "mid": 7, "text": "expose time=5"}
//! ```
//!
//! Key order inside `keys` is preserved end to end. Values may be strings,
//! numbers, booleans, `null` (a bare flag key), or arrays (value lists);
//! everything arrives in the hub as strings, like the ASCII codec. A line
//! that is not valid JSON degrades to a `RawLine` reply rather than failing.

use bytes::{Bytes, BytesMut};
use serde_json::Value;

use super::{take_line, ReplyCodec, ReplyLine};
use crate::error::CodecError;
use crate::msg::{KeyValue, KeyValues, ReplyFlag, RoutingKey};

/// JSON reply codec for an actor connection
#[derive(Debug, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a JSON codec
    pub fn new() -> Self {
        Self
    }
}

impl ReplyCodec for JsonCodec {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ReplyLine>, CodecError> {
        Ok(take_line(buf).map(|line| parse_json_reply(&line)))
    }

    fn encode_command(&self, key: RoutingKey, text: &str) -> Bytes {
        let obj = serde_json::json!({
            "cid": key.cid,
            "mid": key.mid,
            "text": text,
        });
        Bytes::from(format!("{}\n", obj))
    }
}

fn parse_json_reply(line: &str) -> ReplyLine {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return ReplyLine::raw(line),
    };

    let cid = value.get("cid").and_then(Value::as_u64);
    let mid = value.get("mid").and_then(Value::as_u64);
    let flag = value
        .get("flag")
        .and_then(Value::as_str)
        .and_then(|s| s.chars().next())
        .and_then(ReplyFlag::from_char);

    let (cid, mid, flag) = match (cid, mid, flag) {
        (Some(c), Some(m), Some(f)) => (c as u32, m as u32, f),
        _ => return ReplyLine::raw(line),
    };

    let mut keys = KeyValues::new();
    if let Some(Value::Object(map)) = value.get("keys") {
        for (name, v) in map {
            keys.insert(name.clone(), json_key_value(v));
        }
    }

    ReplyLine {
        key: RoutingKey::new(cid, mid),
        flag,
        keys,
        degraded: false,
    }
}

fn json_key_value(value: &Value) -> KeyValue {
    match value {
        Value::Null => KeyValue::Flag,
        Value::Array(items) => {
            KeyValue::from_values(items.iter().map(json_scalar).collect())
        }
        other => KeyValue::Scalar(json_scalar(other)),
    }
}

fn json_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
