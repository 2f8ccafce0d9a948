//! Error types
//!
//! Each subsystem has its own error enum; `Error` is the top-level type the
//! public API surfaces. Protocol-level problems are deliberately *not* errors:
//! malformed wire input degrades to raw-text keys and warn replies (see the
//! codec module) so a bad line can never take a connection down with it.

use std::io;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O failure on a socket or scratch file
    Io(io::Error),
    /// Codec failure that cannot be degraded locally
    Codec(CodecError),
    /// Registry failure (duplicate names, unknown connections)
    Registry(RegistryError),
    /// Configuration file failure
    Config(ConfigError),
    /// Client-side call failure
    Client(ClientError),
}

/// Convenience result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Codec errors that force a connection teardown
///
/// Almost everything the codecs see is recovered in place; only framing
/// damage that makes resynchronization impossible lands here.
#[derive(Debug)]
pub enum CodecError {
    /// Binary frame advertises a length beyond the configured maximum
    FrameTooLarge(usize),
    /// Binary frame advertises a length smaller than its own fixed fields
    FrameTooShort(usize),
    /// Binary frame carries an unknown message tag
    UnknownTag(u8),
}

/// Registry errors from the hub core
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// An actor with this name is already connected
    DuplicateActor(String),
    /// A commander with this identity is already connected
    DuplicateCommander(String),
    /// No connection with this id is registered
    UnknownConnection(u64),
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read
    Io(io::Error),
    /// Config file could not be parsed
    Parse(toml::de::Error),
    /// A listen address or actor address failed to parse
    BadAddress(String),
    /// A safe-command pattern failed to compile
    BadPattern(String, regex::Error),
}

/// Client-side errors
#[derive(Debug)]
pub enum ClientError {
    /// Connection to the hub failed or was lost
    Io(io::Error),
    /// The hub closed the connection while calls were outstanding
    ConnectionClosed,
    /// The hub rejected the login handshake
    LoginRejected(String),
    /// A call did not reach a terminal reply within the deadline
    TimedOut,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Codec(e) => write!(f, "codec error: {}", e),
            Error::Registry(e) => write!(f, "registry error: {}", e),
            Error::Config(e) => write!(f, "config error: {}", e),
            Error::Client(e) => write!(f, "client error: {}", e),
        }
    }
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::FrameTooLarge(len) => write!(f, "frame length {} exceeds maximum", len),
            CodecError::FrameTooShort(len) => write!(f, "frame length {} below minimum", len),
            CodecError::UnknownTag(tag) => write!(f, "unknown frame tag 0x{:02x}", tag),
        }
    }
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateActor(name) => {
                write!(f, "actor already connected: {}", name)
            }
            RegistryError::DuplicateCommander(id) => {
                write!(f, "commander already connected: {}", id)
            }
            RegistryError::UnknownConnection(id) => write!(f, "unknown connection id {}", id),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read config: {}", e),
            ConfigError::Parse(e) => write!(f, "cannot parse config: {}", e),
            ConfigError::BadAddress(addr) => write!(f, "bad address: {}", addr),
            ConfigError::BadPattern(pat, e) => write!(f, "bad safe pattern {:?}: {}", pat, e),
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Io(e) => write!(f, "connection error: {}", e),
            ClientError::ConnectionClosed => write!(f, "connection closed by hub"),
            ClientError::LoginRejected(why) => write!(f, "login rejected: {}", why),
            ClientError::TimedOut => write!(f, "call timed out"),
        }
    }
}

impl std::error::Error for Error {}
impl std::error::Error for CodecError {}
impl std::error::Error for RegistryError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for ClientError {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Error::Codec(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<ClientError> for Error {
    fn from(e: ClientError) -> Self {
        Error::Client(e)
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(e)
    }
}
