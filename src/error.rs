//! Unified error types for the controller node.
//!
//! Three families, matching how each one is recovered:
//!
//! - [`ProtocolError`]: a command was rejected.  Always turned into an
//!   error acknowledgement; the connection stays open.
//! - [`TransportError`]: a socket misbehaved.  The peer is dropped; the
//!   control loop never sees it.
//! - [`ConfigError`]: startup input was unusable.  Only the binary
//!   entry point treats this as fatal.
//!
//! [`Error`] is what the startup path returns: loading the configuration
//! and bringing up the command channel.

use core::fmt;
use std::io;

use crate::rpc::codec::{FieldError, ParseError};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible startup operation funnels into this type.
#[derive(Debug)]
pub enum Error {
    /// Configuration or presence map could not be loaded.
    Config(ConfigError),
    /// The command channel could not be brought up.
    Transport(TransportError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Transport(e) => Some(e),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Protocol errors (command channel)
// ---------------------------------------------------------------------------

/// Why a command line was rejected.
///
/// The `Display` text becomes the `message` of the error acknowledgement,
/// so every variant names the field or literal the client got wrong.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The line was not a usable envelope.
    Envelope(ParseError),
    /// `version` was a string but not the supported literal.
    UnknownVersion(String),
    /// `type` is not one of the known commands.
    UnknownType(String),
    /// A payload field was missing or had the wrong JSON type.
    Field(FieldError),
    /// `mode` was a string but not `IDLE` / `ACTIVE`.
    InvalidMode(String),
    /// `target_abv` outside `[0, 100]`.
    AbvOutOfRange(f64),
    /// `target_flow` below zero.
    NegativeFlow(f64),
}

impl ProtocolError {
    /// True when the line was not JSON at all.  The transport closes the
    /// connection for these instead of keeping it open.
    pub fn is_fail_closed(&self) -> bool {
        matches!(self, Self::Envelope(ParseError::Malformed(_)))
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Envelope(e) => write!(f, "{e}"),
            Self::UnknownVersion(v) => write!(f, "Unknown version: {v}"),
            Self::UnknownType(t) => write!(f, "Unknown message type: {t}"),
            Self::Field(e) => write!(f, "{e}"),
            Self::InvalidMode(m) => write!(f, "Invalid mode: {m} (expected IDLE or ACTIVE)"),
            Self::AbvOutOfRange(v) => write!(f, "target_abv out of range (0-100): {v}"),
            Self::NegativeFlow(v) => write!(f, "target_flow cannot be negative: {v}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<ParseError> for ProtocolError {
    fn from(e: ParseError) -> Self {
        Self::Envelope(e)
    }
}

impl From<FieldError> for ProtocolError {
    fn from(e: FieldError) -> Self {
        Self::Field(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum TransportError {
    /// Binding the listener failed.
    Bind { addr: String, source: io::Error },
    /// Spawning a server thread failed.
    Spawn(io::Error),
    /// The write could not complete without blocking.
    WouldBlock,
    /// Another writer currently owns the peer's socket.
    Busy,
    /// The peer has gone away.
    Closed,
    /// Any other socket failure.
    Io(io::Error),
}

impl TransportError {
    /// Whether the peer should be reaped after this error.
    pub fn is_fatal_for_peer(&self) -> bool {
        !matches!(self, Self::Busy)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { addr, source } => write!(f, "failed to bind {addr}: {source}"),
            Self::Spawn(e) => write!(f, "failed to spawn thread: {e}"),
            Self::WouldBlock => write!(f, "write would block"),
            Self::Busy => write!(f, "writer busy"),
            Self::Closed => write!(f, "peer closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero => Self::Closed,
            _ => Self::Io(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Read { path: String, source: io::Error },
    /// The file is not valid TOML or has the wrong shape.
    Parse { path: String, detail: String },
    /// A value failed range validation.  Names the field and the rule.
    ValidationFailed(&'static str),
    /// The presence map names a sensor role that does not exist.
    UnknownSensor(String),
    /// The bind address could not be parsed.
    BadAddress(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => write!(f, "cannot read {path}: {source}"),
            Self::Parse { path, detail } => write!(f, "cannot parse {path}: {detail}"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::UnknownSensor(name) => write!(f, "unknown sensor role '{name}'"),
            Self::BadAddress(addr) => write!(f, "invalid bind address '{addr}'"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
