//! Error type shared by every component.

use crate::protocol::ParseError;
use thiserror::Error;

/// Errors surfaced by the store layer and the components built on it.
///
/// Failures from the underlying store are propagated unchanged; no component
/// retries or swallows a connection failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is unreachable, timed out, or dropped the connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store sent malformed RESP or a reply of an unexpected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The store answered with an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// The configuration cannot be used.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub(crate) fn connection(message: impl Into<String>) -> Self {
        StoreError::Connection(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        StoreError::Protocol(message.into())
    }

    /// Returns true for failures that mean the store could not be reached.
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Connection(err.to_string())
    }
}

impl From<ParseError> for StoreError {
    fn from(err: ParseError) -> Self {
        StoreError::Protocol(err.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
