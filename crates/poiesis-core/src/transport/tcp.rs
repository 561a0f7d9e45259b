//! TCP transport speaking length-prefixed JSON-RPC 2.0.
//!
//! # Thread Safety
//!
//! The write half sits behind a tokio `Mutex` so concurrent requests are
//! written one frame at a time. Inbound frames are read by a background task
//! that forwards them to the [`InboundSink`] supplied on open.

use super::protocol::{decode_inbound, encode_request, read_frame, write_frame, RpcNotification};
use super::{Credentials, InboundSink, OutboundRequest, Transport, TransportError};
use crate::config::{ClientConfig, ClientDefaults};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Transport over a plain TCP connection.
///
/// Endpoints take the form `host:port`, optionally prefixed with `tcp://`.
#[derive(Debug)]
pub struct TcpTransport {
    connect_timeout: Duration,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(ClientDefaults::CONNECT_TIMEOUT_MS))
    }
}

impl TcpTransport {
    /// Create a transport that gives up on a connect after `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            writer: Mutex::new(None),
            reader_task: std::sync::Mutex::new(None),
        }
    }

    /// Create a transport using `config.connect_timeout_ms`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.connect_timeout())
    }

    fn socket_addr(endpoint: &str) -> &str {
        endpoint.strip_prefix("tcp://").unwrap_or(endpoint)
    }

    fn replace_reader(&self, task: Option<JoinHandle<()>>) {
        let mut slot = self
            .reader_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = std::mem::replace(&mut *slot, task) {
            previous.abort();
        }
    }

    async fn read_loop(mut reader: OwnedReadHalf, sink: InboundSink) {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(payload)) => match decode_inbound(&payload) {
                    Ok(frame) => {
                        if !sink.deliver(frame) {
                            debug!("Inbound sink closed, stopping TCP reader");
                            return;
                        }
                    }
                    Err(e) => warn!("Dropping undecodable frame: {}", e),
                },
                Ok(None) => {
                    sink.connection_lost("peer closed the connection");
                    return;
                }
                Err(e) => {
                    sink.connection_lost(e.to_string());
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(
        &self,
        endpoint: &str,
        credentials: Option<&Credentials>,
        sink: InboundSink,
    ) -> Result<(), TransportError> {
        self.close().await;

        let addr = Self::socket_addr(endpoint);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Connect {
                endpoint: endpoint.to_string(),
                message: format!("timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);

        let (reader, mut writer) = stream.into_split();

        if let Some(credentials) = credentials {
            let auth = serde_json::to_vec(&RpcNotification::auth(&credentials.api_key))?;
            write_frame(&mut writer, &auth).await?;
        }

        *self.writer.lock().await = Some(writer);
        self.replace_reader(Some(tokio::spawn(Self::read_loop(reader, sink))));

        info!("TCP transport connected to {}", addr);
        Ok(())
    }

    async fn send(&self, request: OutboundRequest) -> Result<(), TransportError> {
        let payload = encode_request(&request)?;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(TransportError::Closed)?;
        write_frame(writer, &payload).await?;
        debug!("Sent {} ({} bytes)", request.id, payload.len());
        Ok(())
    }

    async fn close(&self) {
        self.replace_reader(None);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
            debug!("TCP transport closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::CorrelationId;
    use crate::transport::protocol::RpcResponse;
    use crate::transport::{InboundFrame, TransportEvent};
    use serde_json::{json, Map, Value};
    use tokio::net::TcpListener;

    #[test]
    fn test_socket_addr_strips_scheme() {
        assert_eq!(TcpTransport::socket_addr("tcp://127.0.0.1:9"), "127.0.0.1:9");
        assert_eq!(TcpTransport::socket_addr("127.0.0.1:9"), "127.0.0.1:9");
    }

    #[tokio::test]
    async fn test_open_to_dead_port_fails() {
        let transport = TcpTransport::new(Duration::from_secs(1));
        let (sink, _rx) = InboundSink::channel();
        let result = transport.open("127.0.0.1:1", None, sink).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_send_without_open_is_closed() {
        let transport = TcpTransport::default();
        let request = OutboundRequest {
            id: CorrelationId::from_sequence(1),
            method: "ping".into(),
            params: Map::new(),
        };
        assert!(matches!(
            transport.send(request).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_request_reply_and_push_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (mut reader, mut writer) = stream.split();

            let auth = read_frame(&mut reader).await.unwrap().unwrap();
            let auth: Value = serde_json::from_slice(&auth).unwrap();
            assert_eq!(auth["params"]["apiKey"], "secret");

            let request = read_frame(&mut reader).await.unwrap().unwrap();
            let request: Value = serde_json::from_slice(&request).unwrap();
            let reply = RpcResponse::success(request["id"].clone(), json!("pong"));
            write_frame(&mut writer, &serde_json::to_vec(&reply).unwrap())
                .await
                .unwrap();

            let push = RpcNotification::new("render.done", json!({"job": 7}));
            write_frame(&mut writer, &serde_json::to_vec(&push).unwrap())
                .await
                .unwrap();
        });

        let transport = TcpTransport::new(Duration::from_secs(2));
        let (sink, mut rx) = InboundSink::channel();
        transport
            .open(
                &format!("tcp://{}", addr),
                Some(&Credentials::new("secret")),
                sink,
            )
            .await
            .unwrap();

        transport
            .send(OutboundRequest {
                id: CorrelationId::from_sequence(9),
                method: "ping".into(),
                params: Map::new(),
            })
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            TransportEvent::Frame(frame) => {
                assert_eq!(frame, InboundFrame::reply_ok("req-000009", json!("pong")))
            }
            other => panic!("Expected reply, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            TransportEvent::Frame(frame) => {
                assert_eq!(frame, InboundFrame::push("render.done", json!({"job": 7}), "server"))
            }
            other => panic!("Expected push, got {:?}", other),
        }

        server.await.unwrap();

        // Server dropped its socket: the reader reports the loss.
        match rx.recv().await.unwrap() {
            TransportEvent::Lost(reason) => assert!(reason.contains("closed")),
            other => panic!("Expected loss, got {:?}", other),
        }

        transport.close().await;
    }
}
