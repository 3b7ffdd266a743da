use crate::engine::EngineError;

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// This crate reports session failures using this type.
///
/// Every error is fatal to the session: nothing is retried internally,
/// and the caller is expected to discard the instance (closing the
/// underlying transport is the caller's responsibility).
#[derive(Debug)]
pub enum Error {
    /// The peer closed the transport, or the engine reported its closed
    /// status during a wrap or unwrap.
    ClosedChannel,

    /// The engine failed while handshaking.  The payload carries the
    /// engine's original diagnostic.  Covers `begin_handshake`, wrap,
    /// unwrap and delegated-task failures.
    HandshakeFailed(String),

    /// A handshake unwrap produced cleartext bytes.  Application data
    /// is not valid inside the handshake.
    UnexpectedProtocolData,

    /// A data-path operation was invoked before the handshake completed.
    HandshakeIncomplete,

    /// The engine reported a status we have no transition for.  This
    /// indicates a bug in the engine or in this crate.
    InvariantViolation(String),

    /// The engine's configuration cannot be used.  Currently only
    /// raised when filtering TLS 1.3 from a server-mode engine leaves
    /// no enabled protocol.
    InvalidConfiguration(String),

    /// The transport failed with something other than would-block.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClosedChannel => write!(f, "channel closed by peer"),
            Self::HandshakeFailed(why) => write!(f, "handshake failed: {}", why),
            Self::UnexpectedProtocolData => {
                write!(f, "received application data during handshake")
            }
            Self::HandshakeIncomplete => write!(f, "handshake not completed"),
            Self::InvariantViolation(why) => write!(f, "invariant violated: {}", why),
            Self::InvalidConfiguration(why) => write!(f, "invalid configuration: {}", why),
            Self::Io(err) => write!(f, "transport error: {}", err),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        Self::HandshakeFailed(err.into_inner())
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            Error::ClosedChannel => Self::new(io::ErrorKind::UnexpectedEof, err.to_string()),
            other => Self::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
