//! Typed publish/subscribe event handling.
//!
//! Server push events and connection status changes are published on an
//! [`EventBus`]; subscribers register per event type and the bus keeps a
//! bounded history of everything emitted.

mod bus;
mod history;
mod payload;

pub use bus::{EventBus, SubscriptionHandle};
pub use history::HistoryBuffer;
pub use payload::EventPayload;

/// Event types published by the connection manager itself.
pub mod topics {
    /// A state transition. Data: `{"from": state, "to": state}`.
    pub const CONNECTION_STATE: &str = "connection.state";
    /// An unsolicited loss. Data: `{"reason": str, "failed_requests": n}`.
    pub const CONNECTION_LOST: &str = "connection.lost";
    /// Reconnect attempts exhausted. Data: `{"attempts": n, "error": str}`.
    pub const RECONNECT_FAILED: &str = "connection.reconnect_failed";
    /// Source recorded on every status event.
    pub const SOURCE: &str = "connection";
}
