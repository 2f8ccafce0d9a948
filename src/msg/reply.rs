//! Replies
//!
//! A reply is one line of output attributed to a command. The flag classifies
//! it; `:`/`f`/`F` flags are terminal and end the owning command's life.

use super::keys::KeyValues;

/// Reply severity / lifecycle flag
///
/// Wire characters:
/// ```text
/// i - info
/// w - warn
/// d - diagnostic
/// : - finished, ok
/// f - finished, failed (recoverable)
/// F - finished, failed (fatal to the producing connection)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFlag {
    Info,
    Warn,
    Diagnostic,
    Done,
    Failed,
    Fatal,
}

impl ReplyFlag {
    /// Parse a wire flag character
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(ReplyFlag::Info),
            'w' => Some(ReplyFlag::Warn),
            'd' => Some(ReplyFlag::Diagnostic),
            ':' => Some(ReplyFlag::Done),
            'f' => Some(ReplyFlag::Failed),
            'F' => Some(ReplyFlag::Fatal),
            _ => None,
        }
    }

    /// Wire flag character
    pub fn as_char(self) -> char {
        match self {
            ReplyFlag::Info => 'i',
            ReplyFlag::Warn => 'w',
            ReplyFlag::Diagnostic => 'd',
            ReplyFlag::Done => ':',
            ReplyFlag::Failed => 'f',
            ReplyFlag::Fatal => 'F',
        }
    }

    /// True for flags that end the owning command
    pub fn is_terminal(self) -> bool {
        matches!(self, ReplyFlag::Done | ReplyFlag::Failed | ReplyFlag::Fatal)
    }

    /// True for the failure flavors of terminal flags
    pub fn is_failure(self) -> bool {
        matches!(self, ReplyFlag::Failed | ReplyFlag::Fatal)
    }
}

impl std::fmt::Display for ReplyFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// One line of output attributed to a command
#[derive(Debug, Clone)]
pub struct Reply {
    /// Owning command xid
    pub xid: u64,

    /// Severity / lifecycle flag
    pub flag: ReplyFlag,

    /// Keyword values, insertion order preserved
    pub keys: KeyValues,

    /// Reporting source; defaults to the actor name, but pseudo-actors may
    /// relabel (the keyword cache word reports as `keys_<actor>`)
    pub source: String,

    /// When false, only the owning commander sees the keys; other listeners
    /// learn at most that the command finished
    pub broadcast: bool,
}

impl Reply {
    /// Create a broadcast reply
    pub fn new(xid: u64, flag: ReplyFlag, source: impl Into<String>, keys: KeyValues) -> Self {
        Self {
            xid,
            flag,
            keys,
            source: source.into(),
            broadcast: true,
        }
    }

    /// Mark this reply visible only to the owning commander
    pub fn private(mut self) -> Self {
        self.broadcast = false;
        self
    }

    /// True for replies that end the owning command
    pub fn is_terminal(&self) -> bool {
        self.flag.is_terminal()
    }
}
