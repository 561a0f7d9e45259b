//! Transport-level failures.

use thiserror::Error;

/// Opaque failure surfaced by a [`Transport`](super::Transport).
///
/// The connection manager wraps these in
/// [`PoiesisError::Transport`](crate::PoiesisError::Transport) together with the
/// operation that was interrupted.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection is closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("rejected by transport: {0}")]
    Rejected(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}
