//! Error types for request execution.

use std::io;
use thiserror::Error;

/// Errors that terminate a single exchange.
#[derive(Error, Debug)]
pub enum Error {
    /// The request cannot be sent as given (no scheme or host, bad URL).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Connection, DNS, TLS or I/O failure reported by the transport.
    #[error("Transport error: {0}")]
    Transport(#[source] io::Error),

    /// The response body ended before all of it was delivered.
    #[error("Partial response: received {received} of {} bytes", expected_len(.expected))]
    PartialResponse {
        received: u64,
        expected: Option<u64>,
    },

    /// Local I/O failure outside the transport, e.g. a download sink.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

fn expected_len(expected: &Option<u64>) -> String {
    expected.map_or_else(|| "?".to_string(), |n| n.to_string())
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Transport failure built from a message, for aborted or malformed exchanges.
    pub fn transport_msg(kind: io::ErrorKind, msg: impl Into<String>) -> Self {
        Self::Transport(io::Error::new(kind, msg.into()))
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Check whether this error was raised before any I/O happened.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_partial_response(&self) -> bool {
        matches!(self, Self::PartialResponse { .. })
    }
}
