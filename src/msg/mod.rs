//! Command and reply value model
//!
//! Everything that travels through the hub is either a `Command` (one request
//! from a commander to an actor) or a `Reply` (one line of output attributed
//! to a command). Both are plain value types; routing state lives in the hub
//! registries, never inside the messages themselves.

pub mod command;
pub mod keys;
pub mod reply;

pub use command::{Command, RoutingKey, XidCounter};
pub use keys::{keys_from, KeyValue, KeyValues};
pub use reply::{Reply, ReplyFlag};

/// Conventional key carrying a line that failed to parse at all
pub const KEY_RAW_LINE: &str = "RawLine";

/// Conventional key carrying the unparsed tail of a partially parsed line
pub const KEY_UNPARSED_TEXT: &str = "UNPARSEDTEXT";

/// Conventional flag key noting that an unterminated quoted string was closed
pub const KEY_UNCLOSED_QUOTE: &str = "UnclosedQuote";
