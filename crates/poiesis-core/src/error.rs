//! Error types for the Poiesis client core.
//!
//! Errors scoped to one request resolve only that request's future. Errors
//! scoped to the connection (loss, reconnect exhaustion) are applied to every
//! pending request and additionally published once on the status channel.

use crate::connection::{ConnectionState, CorrelationId, DisconnectReason};
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the client core.
#[derive(Debug, Error)]
pub enum PoiesisError {
    // Lifecycle errors
    #[error("Cannot {operation} in state '{state}'")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    #[error("Request '{method}' ({id}) timed out after {timeout:?}")]
    Timeout {
        method: String,
        id: CorrelationId,
        timeout: Duration,
    },

    #[error("Request aborted: {reason}")]
    Disconnected { reason: DisconnectReason },

    #[error("Reconnect failed after {attempts} attempts: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },

    // Transport errors
    #[error("Transport error during {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: TransportError,
    },

    // Remote errors
    #[error("Request '{method}' ({id}) failed with code {code}: {message}")]
    Remote {
        method: String,
        id: CorrelationId,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    // Input errors
    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, PoiesisError>;

impl From<serde_json::Error> for PoiesisError {
    fn from(err: serde_json::Error) -> Self {
        PoiesisError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl PoiesisError {
    /// Wrap a transport failure with the operation it interrupted.
    pub fn transport(context: impl Into<String>, source: TransportError) -> Self {
        PoiesisError::Transport {
            context: context.into(),
            source,
        }
    }

    /// Whether resubmitting the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoiesisError::Timeout { .. }
                | PoiesisError::Disconnected { .. }
                | PoiesisError::Transport { .. }
        )
    }

    /// Whether the error was caused by the connection rather than the request.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            PoiesisError::Disconnected { .. }
                | PoiesisError::ReconnectExhausted { .. }
                | PoiesisError::Transport { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_names_the_state() {
        let err = PoiesisError::InvalidState {
            operation: "send request",
            state: ConnectionState::Disconnected,
        };
        assert_eq!(
            err.to_string(),
            "Cannot send request in state 'disconnected'"
        );
    }

    #[test]
    fn test_disconnected_display() {
        let err = PoiesisError::Disconnected {
            reason: DisconnectReason::ClientDisconnected,
        };
        assert_eq!(err.to_string(), "Request aborted: client disconnected");
    }

    #[test]
    fn test_transport_error_keeps_context() {
        let err = PoiesisError::transport(
            "request 'getStatus' (req-000001)",
            TransportError::Closed,
        );
        let message = err.to_string();
        assert!(message.contains("getStatus"));
        assert!(message.contains("req-000001"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(PoiesisError::Timeout {
            method: "ping".into(),
            id: CorrelationId::from_sequence(1),
            timeout: Duration::from_secs(1),
        }
        .is_retryable());
        assert!(!PoiesisError::InvalidState {
            operation: "send request",
            state: ConnectionState::Closed,
        }
        .is_retryable());
        assert!(PoiesisError::ReconnectExhausted {
            attempts: 5,
            last_error: "refused".into(),
        }
        .is_connection_error());
    }
}
