//! Connection lifecycle states and disconnect reasons.

use serde::{Deserialize, Serialize};

/// Connection state of a [`ConnectionManager`](super::ConnectionManager).
///
/// ```text
/// Disconnected ──connect()──▶ Connecting ──open ok──▶ Connected
///      ▲                          │                      │
///      │                      open failed            transport lost
///      │                          ▼                      ▼
///      └──── attempts exhausted ── Reconnecting ◀────────┘
///
/// any non-Closed state ──shutdown()──▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected,
    /// A transport open is in flight.
    Connecting,
    /// Requests may be sent.
    Connected,
    /// Waiting to retry after a failed open or a lost connection.
    Reconnecting,
    /// Terminal. Reached only through `shutdown()`.
    Closed,
}

impl ConnectionState {
    /// Lowercase name, as used on the wire and in status events.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }

    /// Whether `connect()` starts a new attempt from this state.
    ///
    /// True while disconnected and while a background attempt is in progress,
    /// which an explicit connect takes over.
    pub fn can_connect(&self) -> bool {
        !matches!(self, ConnectionState::Connected | ConnectionState::Closed)
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        *self == ConnectionState::Closed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a pending request (or an in-progress connect) was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The caller invoked `disconnect()`.
    ClientDisconnected,
    /// The transport dropped the connection on its own.
    ConnectionLost(String),
    /// The caller invoked `shutdown()`.
    Shutdown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ClientDisconnected => write!(f, "client disconnected"),
            DisconnectReason::ConnectionLost(detail) if detail.is_empty() => {
                write!(f, "connection lost")
            }
            DisconnectReason::ConnectionLost(detail) => write!(f, "connection lost: {}", detail),
            DisconnectReason::Shutdown => write!(f, "client shut down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display_is_lowercase() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&ConnectionState::Connected).unwrap();
        assert_eq!(json, "\"connected\"");
        let parsed: ConnectionState = serde_json::from_str("\"connecting\"").unwrap();
        assert_eq!(parsed, ConnectionState::Connecting);
    }

    #[test]
    fn test_can_connect() {
        assert!(ConnectionState::Disconnected.can_connect());
        assert!(ConnectionState::Reconnecting.can_connect());
        assert!(ConnectionState::Connecting.can_connect());
        assert!(!ConnectionState::Connected.can_connect());
        assert!(!ConnectionState::Closed.can_connect());
    }

    #[test]
    fn test_only_closed_is_terminal() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Reconnecting.is_terminal());
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(
            DisconnectReason::ClientDisconnected.to_string(),
            "client disconnected"
        );
        assert_eq!(
            DisconnectReason::ConnectionLost(String::new()).to_string(),
            "connection lost"
        );
        assert_eq!(
            DisconnectReason::ConnectionLost("peer reset".into()).to_string(),
            "connection lost: peer reset"
        );
    }
}
