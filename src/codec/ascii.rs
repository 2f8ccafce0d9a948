//! ASCII line codec
//!
//! Line grammars (ws = spaces/tabs):
//!
//! ```text
//! commander -> hub:  [commanderId ws] [mid ws] target ws text
//! hub -> actor:      cid ws mid ws text
//! actor -> hub:      cid ws mid ws flag ws key1=v; key2...
//! hub -> commander:  mid ws cid ws flag ws source ws key1=v; key2...
//! ```
//!
//! A leading token is a message id iff it is all digits; a commander-id
//! prefix is recognized by the `.` every "program.user" identity carries,
//! which keeps `status 5` from being misread as an identity override.
//!
//! Reply parsing never fails: a line whose id/flag prefix does not match the
//! grammar comes back as a degraded reply carrying the whole line under
//! `RawLine`, to be surfaced as a warning rather than dropped.

use bytes::{Bytes, BytesMut};

use super::words::{encode_keys, parse_keys, Delim};
use super::{take_line, ReplyCodec};
use crate::error::CodecError;
use crate::msg::{KeyValue, KeyValues, ReplyFlag, RoutingKey, KEY_RAW_LINE};

/// One decoded command line from a commander
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    /// Identity override, when the line carried a "program.user" prefix
    pub commander: Option<String>,
    /// Commander-chosen message id (0 when omitted)
    pub mid: u32,
    /// Target actor or vocabulary word
    pub target: String,
    /// Raw command text after the target
    pub text: String,
}

/// One decoded reply line from an actor
#[derive(Debug, Clone)]
pub struct ReplyLine {
    /// Echoed routing key identifying the command being answered
    pub key: RoutingKey,
    /// Reply flag
    pub flag: ReplyFlag,
    /// Parsed keyword values
    pub keys: KeyValues,
    /// True when the line did not parse cleanly
    pub degraded: bool,
}

impl ReplyLine {
    /// Wrap an unparseable line as a degraded warn reply
    pub fn raw(line: &str) -> Self {
        let mut keys = KeyValues::new();
        keys.insert(KEY_RAW_LINE, KeyValue::Scalar(line.to_string()));
        Self {
            key: RoutingKey::default(),
            flag: ReplyFlag::Warn,
            keys,
            degraded: true,
        }
    }
}

/// One decoded reply line as seen by a commander-side client
#[derive(Debug, Clone)]
pub struct RoutedReply {
    /// The commander's own routing key for the answered command
    pub key: RoutingKey,
    /// Reply flag
    pub flag: ReplyFlag,
    /// Reporting source
    pub source: String,
    /// Parsed keyword values
    pub keys: KeyValues,
}

/// Parse one line from a commander. Returns `None` for blank lines.
pub fn parse_command_line(line: &str) -> Option<CommandLine> {
    let mut rest = line.trim_start();
    if rest.is_empty() {
        return None;
    }

    let mut commander = None;
    let mut mid = 0u32;

    let (first, after_first) = split_token(rest);
    if let Ok(n) = first.parse::<u32>() {
        mid = n;
        rest = after_first;
    } else if first.contains('.') {
        commander = Some(first.to_string());
        rest = after_first;
        let (second, after_second) = split_token(rest);
        if let Ok(n) = second.parse::<u32>() {
            mid = n;
            rest = after_second;
        }
    }

    let (target, text) = split_token(rest);
    if target.is_empty() {
        return None;
    }

    Some(CommandLine {
        commander,
        mid,
        target: target.to_string(),
        text: text.to_string(),
    })
}

/// Parse one reply line from an actor; degraded on grammar mismatch
pub fn parse_reply_line(line: &str) -> ReplyLine {
    let trimmed = line.trim_start();
    if trimmed.is_empty() {
        return ReplyLine::raw(line);
    }

    let (cid_tok, rest) = split_token(trimmed);
    let (mid_tok, rest) = split_token(rest);
    let (flag_tok, keys_text) = split_token(rest);

    let cid = match cid_tok.parse::<u32>() {
        Ok(n) => n,
        Err(_) => return ReplyLine::raw(line),
    };
    let mid = match mid_tok.parse::<u32>() {
        Ok(n) => n,
        Err(_) => return ReplyLine::raw(line),
    };
    let flag = match single_char(flag_tok).and_then(ReplyFlag::from_char) {
        Some(f) => f,
        None => return ReplyLine::raw(line),
    };

    let parsed = parse_keys(keys_text, Delim::Semicolon);
    ReplyLine {
        key: RoutingKey::new(cid, mid),
        flag,
        keys: parsed.keys,
        degraded: parsed.degraded,
    }
}

/// Parse one hub-to-commander reply line (client side)
pub fn parse_routed_reply(line: &str) -> Option<RoutedReply> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() {
        return None;
    }

    let (mid_tok, rest) = split_token(trimmed);
    let (cid_tok, rest) = split_token(rest);
    let (flag_tok, rest) = split_token(rest);
    let (source, keys_text) = split_token(rest);

    let mid = mid_tok.parse::<u32>().ok()?;
    let cid = cid_tok.parse::<u32>().ok()?;
    let flag = single_char(flag_tok).and_then(ReplyFlag::from_char)?;
    if source.is_empty() {
        return None;
    }

    Some(RoutedReply {
        key: RoutingKey::new(cid, mid),
        flag,
        source: source.to_string(),
        keys: parse_keys(keys_text, Delim::Semicolon).keys,
    })
}

/// Encode a reply for a commander connection
pub fn encode_reply(key: RoutingKey, flag: ReplyFlag, source: &str, keys: &KeyValues) -> Bytes {
    let mut line = format!("{} {} {} {}", key.mid, key.cid, flag.as_char(), source);
    if !keys.is_empty() {
        line.push(' ');
        line.push_str(&encode_keys(keys, Delim::Semicolon));
    }
    line.push('\n');
    Bytes::from(line)
}

/// Encode a command for an actor connection
pub fn encode_command(key: RoutingKey, text: &str) -> Bytes {
    Bytes::from(format!("{} {} {}\n", key.cid, key.mid, text))
}

/// Encode a command line for a commander-side client
pub fn encode_client_command(mid: u32, target: &str, text: &str) -> Bytes {
    if text.is_empty() {
        Bytes::from(format!("{} {}\n", mid, target))
    } else {
        Bytes::from(format!("{} {} {}\n", mid, target, text))
    }
}

/// ASCII reply codec for an actor connection
#[derive(Debug, Default)]
pub struct AsciiCodec;

impl AsciiCodec {
    /// Create an ASCII codec
    pub fn new() -> Self {
        Self
    }
}

impl ReplyCodec for AsciiCodec {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ReplyLine>, CodecError> {
        Ok(take_line(buf).map(|line| parse_reply_line(&line)))
    }

    fn encode_command(&self, key: RoutingKey, text: &str) -> Bytes {
        encode_command(key, text)
    }
}

fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start_matches([' ', '\t']);
    match s.find([' ', '\t']) {
        Some(idx) => (&s[..idx], s[idx..].trim_start_matches([' ', '\t'])),
        None => (s, ""),
    }
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        None
    } else {
        Some(c)
    }
}
