//! In-process transport driven by a [`MemoryPeer`].
//!
//! Useful for tests and for embedding applications that want to exercise the
//! connection manager without a network. The peer plays the server: it can
//! fail opens and sends, delay opens, answer requests in any order, push
//! events, and drop the connection.

use super::{Credentials, InboundFrame, InboundSink, OutboundRequest, Transport, TransportError};
use crate::connection::CorrelationId;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct PeerState {
    sink: Option<InboundSink>,
    open_failures: VecDeque<String>,
    persistent_open_failure: Option<String>,
    send_failure: Option<String>,
    open_delay: Option<Duration>,
    open_attempts: u32,
    close_calls: u32,
    sent: Vec<OutboundRequest>,
    credentials: Option<Credentials>,
    endpoint: Option<String>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<PeerState>,
    sent_tx: mpsc::UnboundedSender<OutboundRequest>,
    sent_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<OutboundRequest>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Transport half handed to the connection manager.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Server half used to script the transport.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// Create a connected transport/peer pair.
    pub fn new() -> (Self, MemoryPeer) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(PeerState::default()),
            sent_tx,
            sent_rx: tokio::sync::Mutex::new(sent_rx),
        });
        (
            Self {
                shared: shared.clone(),
            },
            MemoryPeer { shared },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        endpoint: &str,
        credentials: Option<&Credentials>,
        sink: InboundSink,
    ) -> Result<(), TransportError> {
        let delay = {
            let mut state = self.shared.state();
            state.open_attempts += 1;
            state.open_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.shared.state();
        let failure = state
            .open_failures
            .pop_front()
            .or_else(|| state.persistent_open_failure.clone());
        if let Some(message) = failure {
            return Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                message,
            });
        }

        state.sink = Some(sink);
        state.credentials = credentials.cloned();
        state.endpoint = Some(endpoint.to_string());
        Ok(())
    }

    async fn send(&self, request: OutboundRequest) -> Result<(), TransportError> {
        let mut state = self.shared.state();
        if state.sink.is_none() {
            return Err(TransportError::Closed);
        }
        if let Some(message) = &state.send_failure {
            return Err(TransportError::Rejected(message.clone()));
        }
        state.sent.push(request.clone());
        let _ = self.shared.sent_tx.send(request);
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.shared.state();
        if state.sink.take().is_some() {
            state.close_calls += 1;
        }
    }
}

impl MemoryPeer {
    /// Fail the next `count` opens with `message`.
    pub fn fail_next_opens(&self, count: usize, message: &str) {
        let mut state = self.shared.state();
        for _ in 0..count {
            state.open_failures.push_back(message.to_string());
        }
    }

    /// Fail every open until cleared with `None`.
    pub fn fail_all_opens(&self, message: Option<&str>) {
        self.shared.state().persistent_open_failure = message.map(str::to_string);
    }

    /// Fail every send until cleared with `None`.
    pub fn fail_sends(&self, message: Option<&str>) {
        self.shared.state().send_failure = message.map(str::to_string);
    }

    /// Make each open wait before completing.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        self.shared.state().open_delay = delay;
    }

    /// Whether the transport currently holds an open connection.
    pub fn is_open(&self) -> bool {
        self.shared.state().sink.is_some()
    }

    /// Number of `open` calls so far, failed ones included.
    pub fn open_attempts(&self) -> u32 {
        self.shared.state().open_attempts
    }

    /// Number of `close` calls that closed an open connection.
    pub fn close_calls(&self) -> u32 {
        self.shared.state().close_calls
    }

    /// Number of requests accepted by `send`.
    pub fn send_count(&self) -> usize {
        self.shared.state().sent.len()
    }

    /// Every request sent so far, oldest first.
    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.shared.state().sent.clone()
    }

    /// Credentials passed to the last successful open.
    pub fn credentials(&self) -> Option<Credentials> {
        self.shared.state().credentials.clone()
    }

    /// Endpoint passed to the last successful open.
    pub fn endpoint(&self) -> Option<String> {
        self.shared.state().endpoint.clone()
    }

    /// Wait for the next request the client sends.
    pub async fn next_request(&self) -> Option<OutboundRequest> {
        self.shared.sent_rx.lock().await.recv().await
    }

    /// Deliver a raw frame. Returns false when no connection is open.
    pub fn deliver(&self, frame: InboundFrame) -> bool {
        let sink = self.shared.state().sink.clone();
        match sink {
            Some(sink) => sink.deliver(frame),
            None => false,
        }
    }

    /// Deliver a successful reply for `id`. False if nothing is open.
    pub fn reply_ok(&self, id: &CorrelationId, result: Value) -> bool {
        self.deliver(InboundFrame::reply_ok(id.clone(), result))
    }

    /// Deliver an error reply for `id`. False if nothing is open.
    pub fn reply_err(&self, id: &CorrelationId, code: i64, message: &str) -> bool {
        self.deliver(InboundFrame::reply_err(id.clone(), code, message))
    }

    /// Deliver a push event. False if nothing is open.
    pub fn push(&self, event_type: &str, data: Value, source: &str) -> bool {
        self.deliver(InboundFrame::push(event_type, data, source))
    }

    /// Simulate an unsolicited connection loss.
    pub fn drop_connection(&self, reason: &str) -> bool {
        let sink = self.shared.state().sink.take();
        match sink {
            Some(sink) => sink.connection_lost(reason),
            None => false,
        }
    }
}
