//! Transport abstraction consumed by the connection manager.
//!
//! A transport performs the byte-level I/O. The core only relies on the
//! capability set below:
//!
//! - `open` establishes a connection and starts delivering inbound frames to
//!   the supplied [`InboundSink`]
//! - `send` hands one framed request to the wire (fire-and-forget)
//! - `close` tears the connection down
//!
//! An unsolicited loss is reported with [`InboundSink::connection_lost`] or by
//! dropping every clone of the sink.

mod error;
pub mod memory;
pub mod protocol;
pub mod tcp;

pub use error::TransportError;
pub use memory::{MemoryPeer, MemoryTransport};
pub use tcp::TcpTransport;

use crate::connection::CorrelationId;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Credentials handed to the transport on open.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
}

impl Credentials {
    /// Credentials carrying `api_key`.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// A request ready to be written by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub id: CorrelationId,
    pub method: String,
    pub params: Map<String, Value>,
}

/// Error half of a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Reply to an earlier request.
    Reply {
        id: CorrelationId,
        outcome: std::result::Result<Value, RemoteError>,
    },
    /// Server-originated event not tied to a request.
    Push {
        event_type: String,
        data: Value,
        source: String,
    },
}

impl InboundFrame {
    /// A successful reply to request `id`.
    pub fn reply_ok(id: impl Into<CorrelationId>, result: Value) -> Self {
        InboundFrame::Reply {
            id: id.into(),
            outcome: Ok(result),
        }
    }

    /// An error reply to request `id`.
    pub fn reply_err(id: impl Into<CorrelationId>, code: i64, message: impl Into<String>) -> Self {
        InboundFrame::Reply {
            id: id.into(),
            outcome: Err(RemoteError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// A push event not tied to any request.
    pub fn push(event_type: impl Into<String>, data: Value, source: impl Into<String>) -> Self {
        InboundFrame::Push {
            event_type: event_type.into(),
            data,
            source: source.into(),
        }
    }
}

/// Something a transport reports to the manager.
#[derive(Debug)]
pub enum TransportEvent {
    Frame(InboundFrame),
    /// The connection went away without `close()` being called.
    Lost(String),
}

/// Delivery end handed to [`Transport::open`].
///
/// Cloneable; the manager treats the connection as lost once every clone is
/// dropped.
#[derive(Debug, Clone)]
pub struct InboundSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl InboundSink {
    /// Create a sink and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver a frame. Returns false if nobody is listening any more.
    pub fn deliver(&self, frame: InboundFrame) -> bool {
        self.tx.send(TransportEvent::Frame(frame)).is_ok()
    }

    /// Report an unsolicited connection loss.
    pub fn connection_lost(&self, reason: impl Into<String>) -> bool {
        self.tx.send(TransportEvent::Lost(reason.into())).is_ok()
    }
}

/// Byte-level connection used by the [`ConnectionManager`](crate::ConnectionManager).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `endpoint`.
    ///
    /// Inbound frames for this connection must go to `sink`. A transport that
    /// is opened again must stop using any sink from an earlier open.
    async fn open(
        &self,
        endpoint: &str,
        credentials: Option<&Credentials>,
        sink: InboundSink,
    ) -> std::result::Result<(), TransportError>;

    /// Write one request. Completion means the frame was handed off, not that
    /// a reply will follow.
    async fn send(&self, request: OutboundRequest) -> std::result::Result<(), TransportError>;

    /// Close the connection. Must be safe to call when nothing is open.
    async fn close(&self);
}
