//! Wire format used by [`TcpTransport`](super::TcpTransport).
//!
//! Each frame is a 4-byte big-endian length prefix followed by a UTF-8
//! JSON-RPC 2.0 payload.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Requests carry the correlation id as the JSON-RPC `id`. Responses are
//! decoded into [`InboundFrame::Reply`]; notifications (no `id`) are push
//! events whose `method` is the event type and whose `params` is the data.

use super::{InboundFrame, OutboundRequest, RemoteError, TransportError};
use crate::config::TransportConfig;
use crate::connection::CorrelationId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

impl RpcRequest {
    /// Create a JSON-RPC 2.0 request from an outbound request.
    pub fn from_outbound(request: &OutboundRequest) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: request.method.clone(),
            params: Some(Value::Object(request.params.clone())),
            id: Some(Value::String(request.id.to_string())),
        }
    }
}

/// JSON-RPC 2.0 notification, used for push events and the auth frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    /// Emitter of a push event. Not part of JSON-RPC proper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl RpcNotification {
    /// Create a new JSON-RPC 2.0 notification.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
            source: None,
        }
    }

    /// The first frame sent on a connection opened with an API key.
    pub fn auth(api_key: &str) -> Self {
        let mut params = Map::new();
        params.insert("apiKey".to_string(), Value::String(api_key.to_string()));
        Self::new("auth", Value::Object(params))
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    /// Create an error response.
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id: Some(id),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Serialize an outbound request to frame payload bytes.
pub fn encode_request(request: &OutboundRequest) -> Result<Vec<u8>, TransportError> {
    Ok(serde_json::to_vec(&RpcRequest::from_outbound(request))?)
}

/// Decode one frame payload into an inbound frame.
///
/// Anything carrying an `id` is a reply; anything with a `method` and no `id`
/// is a push event.
pub fn decode_inbound(payload: &[u8]) -> Result<InboundFrame, TransportError> {
    let value: Value = serde_json::from_slice(payload)?;
    let has_id = value.get("id").map(|id| !id.is_null()).unwrap_or(false);

    if has_id {
        let response: RpcResponse = serde_json::from_value(value)?;
        let id = match response.id {
            Some(Value::String(s)) => CorrelationId::from_raw(s),
            Some(Value::Number(n)) => CorrelationId::from_raw(n.to_string()),
            other => {
                return Err(TransportError::Protocol(format!(
                    "unsupported reply id: {:?}",
                    other
                )))
            }
        };
        let outcome = match (response.error, response.result) {
            (Some(err), _) => Err(RemoteError {
                code: err.code,
                message: err.message,
                data: err.data,
            }),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        };
        return Ok(InboundFrame::Reply { id, outcome });
    }

    if value.get("method").is_some() {
        let notification: RpcNotification = serde_json::from_value(value)?;
        return Ok(InboundFrame::Push {
            event_type: notification.method,
            data: notification.params.unwrap_or(Value::Null),
            source: notification
                .source
                .unwrap_or_else(|| TransportConfig::DEFAULT_PUSH_SOURCE.to_string()),
        });
    }

    Err(TransportError::Protocol(
        "frame is neither a reply nor a notification".to_string(),
    ))
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, TransportError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > TransportConfig::MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: TransportConfig::MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), TransportError> {
    if payload.len() > TransportConfig::MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            max: TransportConfig::MAX_FRAME_SIZE,
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outbound(method: &str) -> OutboundRequest {
        let mut params = Map::new();
        params.insert("verbose".into(), json!(true));
        OutboundRequest {
            id: CorrelationId::from_sequence(1),
            method: method.into(),
            params,
        }
    }

    #[test]
    fn test_encode_request_uses_correlation_id() {
        let bytes = encode_request(&outbound("getStatus")).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "getStatus");
        assert_eq!(value["id"], "req-000001");
        assert_eq!(value["params"]["verbose"], true);
    }

    #[test]
    fn test_decode_success_reply() {
        let frame = decode_inbound(br#"{"jsonrpc":"2.0","id":"req-000004","result":{"ok":1}}"#)
            .unwrap();
        assert_eq!(frame, InboundFrame::reply_ok("req-000004", json!({"ok": 1})));
    }

    #[test]
    fn test_decode_error_reply() {
        let frame = decode_inbound(
            br#"{"jsonrpc":"2.0","id":"req-000002","error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            InboundFrame::reply_err("req-000002", -32601, "Method not found")
        );
    }

    #[test]
    fn test_error_response_decodes_as_error_reply() {
        let bytes =
            serde_json::to_vec(&RpcResponse::error(json!("req-000009"), -32000, "busy")).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("result").is_none());

        let frame = decode_inbound(&bytes).unwrap();
        assert_eq!(frame, InboundFrame::reply_err("req-000009", -32000, "busy"));
    }

    #[test]
    fn test_decode_push_event_defaults_source() {
        let frame =
            decode_inbound(br#"{"jsonrpc":"2.0","method":"render.progress","params":{"pct":40}}"#)
                .unwrap();
        assert_eq!(
            frame,
            InboundFrame::push("render.progress", json!({"pct": 40}), "server")
        );
    }

    #[test]
    fn test_decode_push_event_with_source() {
        let frame = decode_inbound(
            br#"{"jsonrpc":"2.0","method":"tick","params":3,"source":"scheduler"}"#,
        )
        .unwrap();
        assert_eq!(frame, InboundFrame::push("tick", json!(3), "scheduler"));
    }

    #[test]
    fn test_decode_rejects_unknown_shape() {
        assert!(decode_inbound(br#"{"jsonrpc":"2.0"}"#).is_err());
        assert!(decode_inbound(b"not json").is_err());
    }

    #[test]
    fn test_auth_notification_shape() {
        let json = serde_json::to_value(RpcNotification::auth("k-123")).unwrap();
        assert_eq!(json["method"], "auth");
        assert_eq!(json["params"]["apiKey"], "k-123");
        assert!(json.get("id").is_none());
        assert!(json.get("source").is_none());
    }

    #[tokio::test]
    async fn test_frame_read_write_roundtrip() {
        let payload = b"hello world";
        let mut buf = Vec::new();

        write_frame(&mut buf, payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_frame(&mut cursor).await.unwrap();

        assert_eq!(read_back, Some(payload.to_vec()));
    }

    #[tokio::test]
    async fn test_frame_read_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_frame_read_oversized_returns_error() {
        let huge_len: u32 = (TransportConfig::MAX_FRAME_SIZE + 1) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&huge_len.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge { .. })));
    }
}
