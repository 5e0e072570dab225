//! Error taxonomy shared by every layer of the crate

use std::net::AddrParseError;
use std::string::FromUtf8Error;
use thiserror::Error;

/// Errors that arise while reading, writing, negotiating or dispatching on a session
#[derive(Debug, Eq, PartialEq, Clone, Error)]
pub enum Error {
    /// A socket level failure, flattened so the error stays cloneable
    #[error("{kind:?} , {message}")]
    Io {
        /// A list specifying general categories of io failure.
        kind: std::io::ErrorKind,
        /// A message describing error information
        message: String,
    },
    /// A filter stage failed while encoding or decoding
    #[error("filter {filter} failed: {message}")]
    Filter {
        /// Name of the failing filter
        filter: String,
        /// A message describing error information
        message: String,
    },
    /// Writing to the transport failed
    #[error("send failed: {0}")]
    Send(Box<Error>),
    /// The peer closed the stream or the sentinel-fill heuristic fired
    #[error("remote peer disconnected")]
    RemoteDisconnect,
    /// A synchronous read surfaced an error stashed by the event path
    #[error("synchronous read failed: {0}")]
    Read(Box<Error>),
    /// TLS configuration or record processing failed
    #[error("tls: {0}")]
    Tls(String),
    /// The handshake loop ran out of iterations before converging
    #[error("tls handshake did not complete within {0} iterations")]
    HandshakeExhausted(usize),
    /// A bounded wait elapsed
    #[error("timed out: {0}")]
    Timeout(String),
    /// Proxy negotiation failed
    #[error("proxy: {0}")]
    Proxy(String),
    /// Invalid configuration
    #[error("configuration: {0}")]
    Config(String),
    /// The worker pool refused a job
    #[error("job rejected: {0}")]
    Rejected(String),
    /// The session is no longer connected
    #[error("session is closed")]
    Closed,
    /// An outbound value has no byte representation
    #[error("unsupported message type: {0}")]
    UnsupportedMessage(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<AddrParseError> for Error {
    fn from(e: AddrParseError) -> Self {
        Error::Io {
            kind: std::io::ErrorKind::AddrNotAvailable,
            message: e.to_string(),
        }
    }
}

impl From<FromUtf8Error> for Error {
    fn from(e: FromUtf8Error) -> Self {
        Error::Io {
            kind: std::io::ErrorKind::InvalidData,
            message: e.to_string(),
        }
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e.to_string())
    }
}

impl Error {
    /// Creates a new io error from a known kind of error as well as a message.
    pub fn new(kind: std::io::ErrorKind, message: String) -> Self {
        Error::Io { kind, message }
    }

    /// Whether this error means the connection is gone rather than misbehaving
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::RemoteDisconnect | Error::Closed)
            || matches!(
                self,
                Error::Io { kind, .. } if matches!(
                    kind,
                    std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::BrokenPipe
                        | std::io::ErrorKind::UnexpectedEof
                )
            )
    }
}
