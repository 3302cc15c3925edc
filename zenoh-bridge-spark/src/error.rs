//! Error types for the SPARK bridge.
//!
//! Each failure class maps to one recovery policy in the supervisor:
//!
//! | Error             | Policy                                          |
//! |-------------------|-------------------------------------------------|
//! | [`BridgeError`]   | fatal at startup, process exits non-zero        |
//! | [`ConnectionError`] | retried with backoff, never fatal             |
//! | [`ParseError`]    | logged, message dropped, streaming continues    |
//! | [`PublishError`]  | reading dropped, cycle restarts via recovery    |
//! | `Cancelled`       | graceful termination                            |

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Startup errors. None of these are retried.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] spark_common::Error),

    /// Configuration was parsed but is not usable.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),
}

impl BridgeError {
    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }
}

/// Failure of the producer socket. Always retried.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The producer actively refused the connection.
    #[error("connection refused by {addr}")]
    Refused { addr: String },

    /// Connect or read did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The peer closed the connection (zero-length read).
    #[error("peer closed the connection")]
    PeerClosed,

    /// Any other OS-level failure (resolution, bind, socket creation).
    #[error("socket failure: {0}")]
    Os(#[source] io::Error),
}

impl ConnectionError {
    /// Classify an I/O error raised while talking to `addr`.
    pub fn from_io(err: io::Error, addr: impl Into<String>) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused { addr: addr.into() },
            io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof => Self::PeerClosed,
            _ => Self::Os(err),
        }
    }

    /// Short machine-friendly name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Refused { .. } => "refused",
            Self::Timeout(_) => "timeout",
            Self::PeerClosed => "peer_closed",
            Self::Os(_) => "os_failure",
        }
    }
}

/// Outcome of a source operation that did not produce data.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Shutdown was requested while waiting.
    #[error("cancelled by shutdown")]
    Cancelled,

    /// The connection failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// A message from the producer that could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Wrong field count, non-integer field, or empty message.
    #[error("bad format: {0}")]
    BadFormat(String),

    /// The message is not valid UTF-8.
    #[error("bad encoding: {0}")]
    BadEncoding(String),
}

/// Error reported by the remote platform collaborator.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Opening the session failed.
    #[error("failed to open session: {0}")]
    Open(String),

    /// The transport rejected or failed an operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// Payload could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] spark_common::Error),
}

/// Failure to hand a reading to the platform.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The collaborator reported a failure.
    #[error("transport failure: {0}")]
    Transport(#[from] RemoteError),

    /// The collaborator did not answer within the publish timeout.
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

impl PublishError {
    /// Short machine-friendly name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport_failure",
            Self::Timeout(_) => "timeout",
        }
    }
}
