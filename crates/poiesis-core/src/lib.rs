//! Poiesis Core - client-side connection management for Poiesis services.
//!
//! Provides a [`ConnectionManager`] that owns the lifecycle of one logical
//! connection (connect, backoff-driven reconnect, disconnect), correlates
//! request/response pairs with timeouts, and fans server push events out to
//! subscribers through an [`EventBus`] with bounded history.
//!
//! The byte-level I/O sits behind the [`Transport`] trait. [`TcpTransport`]
//! speaks length-prefixed JSON-RPC 2.0; [`MemoryTransport`] is an in-process
//! transport for tests and embedding.
//!
//! # Example
//!
//! ```rust,ignore
//! use poiesis_core::{ClientConfig, ConnectionManager, TcpTransport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> poiesis_core::Result<()> {
//!     let config = ClientConfig::new("tcp://127.0.0.1:7400").with_api_key("secret");
//!     let transport = Arc::new(TcpTransport::from_config(&config));
//!     let client = ConnectionManager::new(config, transport)?;
//!
//!     let _sub = client.events().on("job.progress", |event| {
//!         println!("progress: {}", event.data);
//!     });
//!
//!     client.connect().await?;
//!     let status = client.request("getStatus", Default::default()).await?;
//!     println!("status: {}", status);
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod transport;

// Re-export commonly used types
pub use config::{BackoffStrategy, ClientConfig, ClientDefaults};
pub use connection::{
    ConnectionManager, ConnectionState, CorrelationId, DisconnectReason, PendingRequestInfo,
    ReconnectPolicy,
};
pub use error::{PoiesisError, Result};
pub use events::{topics, EventBus, EventPayload, SubscriptionHandle};
pub use transport::{
    Credentials, InboundFrame, InboundSink, MemoryPeer, MemoryTransport, OutboundRequest,
    RemoteError, TcpTransport, Transport, TransportError,
};
