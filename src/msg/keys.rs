//! Keyword values
//!
//! A keyword either stands alone as a flag, carries one scalar value, or
//! carries a comma-separated list. Values are always strings at this layer;
//! interpretation belongs to whoever reads the keyword.

use crate::cimap::Cimap;

/// Ordered, case-insensitively keyed keyword set of one reply or command
pub type KeyValues = Cimap<KeyValue>;

/// Value of a single keyword
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    /// Keyword with no `=` part
    Flag,
    /// Keyword with exactly one value
    Scalar(String),
    /// Keyword with two or more comma-separated values
    List(Vec<String>),
}

impl KeyValue {
    /// Build from a parsed value list
    pub fn from_values(mut values: Vec<String>) -> Self {
        match values.len() {
            0 => KeyValue::Flag,
            1 => KeyValue::Scalar(values.remove(0)),
            _ => KeyValue::List(values),
        }
    }

    /// Scalar value, if this is a scalar
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            KeyValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// All values in order; empty for a flag key
    pub fn values(&self) -> &[String] {
        match self {
            KeyValue::Flag => &[],
            KeyValue::Scalar(s) => std::slice::from_ref(s),
            KeyValue::List(v) => v,
        }
    }

    /// True for a bare flag key
    pub fn is_flag(&self) -> bool {
        matches!(self, KeyValue::Flag)
    }
}

/// Build a `KeyValues` from literal pairs, mostly for replies the hub
/// synthesizes itself.
pub fn keys_from<I, K, V>(pairs: I) -> KeyValues
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut keys = KeyValues::new();
    for (k, v) in pairs {
        keys.insert(k, KeyValue::Scalar(v.into()));
    }
    keys
}
