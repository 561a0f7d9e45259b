//! Connection management: lifecycle state machine, reconnect backoff, and
//! request/response correlation.

mod backoff;
mod correlation;
mod manager;
mod pending;
mod state;

pub use backoff::ReconnectPolicy;
pub use correlation::CorrelationId;
pub use manager::ConnectionManager;
pub use pending::PendingRequestInfo;
pub use state::{ConnectionState, DisconnectReason};
