//! Transport error types.

use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents errors that can occur while serving a long-polling transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// The underlying HTTP exchange failed or the peer went away.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Failed to hand a frame to the exchange.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to encode a frame for the wire.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// The client violated the wire protocol (missing or malformed parameter).
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// No session is registered under the given id.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The session has already been closed.
    #[error("Session closed")]
    Closed,

    /// Request size exceeds the configured maximum limit.
    #[error("Request size ({size} bytes) exceeds maximum allowed ({max} bytes)")]
    RequestTooLarge {
        /// The actual size of the request in bytes
        size: usize,
        /// The maximum allowed size in bytes
        max: usize,
    },

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    /// HTTP status used when an exchange is rejected because of this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::ProtocolError(_) => 400,
            Self::SessionNotFound(_) => 404,
            Self::Closed => 410,
            Self::RequestTooLarge { .. } => 413,
            Self::ConnectionLost(_)
            | Self::SendFailed(_)
            | Self::SerializationFailed(_)
            | Self::Io(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Returns `true` if the error was caused by the client's request.
    pub const fn is_client_error(&self) -> bool {
        let status = self.status_code();
        status >= 400 && status < 500
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}
