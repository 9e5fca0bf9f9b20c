use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

use crate::protocol::ProtocolError;

/// An error raised out of the client's control-flow boundary.
///
/// Protocol-level misses and conflicts (`KeyNotFound`, `KeyExists`, ...) are
/// deliberately *not* a variant here -- they are non-exceptional and surface
/// as `success = false` on the operation's own result type instead, carrying
/// the server's [`crate::protocol::Status`] verbatim. Only programmer errors
/// and transport/protocol failures raise through this type.
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied argument could not be turned into a valid request
    /// (e.g. conflicting expiration parameters, an out-of-range timestamp).
    InvalidArgument(String),
    /// The locator found no alive node to route a key to.
    NoNode,
    /// I/O failed while talking to a node.
    Io(std::io::Error),
    /// The wire framing was malformed (bad magic, truncated body, ...).
    Protocol(ProtocolError),
    /// The SASL handshake ended in an error status; the socket is unusable.
    Auth(String),
    /// A transcoder failed outside of an argument error.
    Serialization(Box<dyn StdError + Send + Sync>),
    /// A node's socket pool could not produce a socket within `queue_timeout`.
    PoolExhausted,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

#[cfg(feature = "bincode")]
impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(Box::new(err))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::InvalidArgument(msg) => write!(f, "InvalidArgument: {}", msg),
            Error::NoNode => write!(f, "NoNode: locator returned no alive node"),
            Error::Io(err) => write!(f, "IoError: {}", err),
            Error::Protocol(err) => write!(f, "ProtocolError: {}", err),
            Error::Auth(msg) => write!(f, "AuthError: {}", msg),
            Error::Serialization(err) => write!(f, "SerializationFailure: {}", err),
            Error::PoolExhausted => write!(f, "PoolExhausted: no socket available within queue_timeout"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Protocol(err) => Some(err),
            Error::Serialization(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn test_err_display() {
        assert_eq!("NoNode: locator returned no alive node", format!("{}", Error::NoNode));
        assert_eq!(
            "InvalidArgument: conflicting expiration",
            format!("{}", Error::InvalidArgument("conflicting expiration".into()))
        );
    }
}
