//! Server startup and runtime errors.

use thiserror::Error;

/// Errors returned by [`run_server`](crate::run_server).
#[derive(Debug, Error)]
pub enum ServeError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The server stopped with an I/O error.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Result type of server operations.
pub type ServeResult<T> = Result<T, ServeError>;
