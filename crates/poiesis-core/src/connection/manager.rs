//! Connection lifecycle, reconnection, and request/response correlation.
//!
//! # Sessions
//!
//! Every `connect()`, `disconnect()`, and `shutdown()` starts a new session.
//! Background work (the inbound pump, reconnect loop, in-flight opens) is
//! tagged with the session it belongs to and stops acting as soon as the
//! session moves on, so a stale task can never resolve a request or change the
//! state after the caller disconnected.
//!
//! # Thread Safety
//!
//! Mutable state lives behind one `std::sync::Mutex` that is never held across
//! an `.await` or while user code (event handlers, reply consumers) runs.
//! Requests are resolved and events emitted after the lock is released.

use super::backoff::ReconnectPolicy;
use super::correlation::CorrelationIdGenerator;
use super::pending::{PendingRequest, PendingRequestInfo, PendingTable};
use super::{ConnectionState, CorrelationId, DisconnectReason};
use crate::config::ClientConfig;
use crate::error::{PoiesisError, Result};
use crate::events::{topics, EventBus};
use crate::transport::{
    Credentials, InboundFrame, InboundSink, OutboundRequest, Transport, TransportError,
    TransportEvent,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
struct StateChange {
    from: ConnectionState,
    to: ConnectionState,
}

struct Shared {
    state: ConnectionState,
    session: u64,
    reconnect_attempts: u32,
    pending: PendingTable,
    reconnect_task: Option<JoinHandle<()>>,
}

struct Inner {
    config: ClientConfig,
    policy: ReconnectPolicy,
    credentials: Option<Credentials>,
    transport: Arc<dyn Transport>,
    events: EventBus,
    ids: CorrelationIdGenerator,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
    session_tx: watch::Sender<u64>,
    /// Serializes explicit `connect()` calls.
    connect_serial: tokio::sync::Mutex<()>,
    orphaned_replies: AtomicU64,
}

/// Client for connecting to Poiesis services.
///
/// Owns the connection state machine and the correlation table. Cloning
/// yields another handle to the same connection, which is how event handlers
/// get hold of the manager to issue follow-up requests.
///
/// # Example
///
/// ```rust,ignore
/// use poiesis_core::{ClientConfig, ConnectionManager, TcpTransport};
/// use std::sync::Arc;
///
/// let config = ClientConfig::new("tcp://127.0.0.1:7400");
/// let transport = Arc::new(TcpTransport::from_config(&config));
/// let manager = ConnectionManager::new(config, transport)?;
///
/// manager.connect().await?;
/// let status = manager.request("getStatus", Default::default()).await?;
/// manager.disconnect().await;
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager with its own event bus sized by `config.max_history`.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let events = EventBus::new(config.max_history);
        Self::with_event_bus(config, transport, events)
    }

    /// Create a manager that publishes push and status events on `events`.
    pub fn with_event_bus(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        events: EventBus,
    ) -> Result<Self> {
        config.validate()?;

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (session_tx, _) = watch::channel(0);

        Ok(Self {
            inner: Arc::new(Inner {
                policy: ReconnectPolicy::from_config(&config),
                credentials: config.api_key.as_deref().map(Credentials::new),
                config,
                transport,
                events,
                ids: CorrelationIdGenerator::new(),
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    session: 0,
                    reconnect_attempts: 0,
                    pending: PendingTable::new(),
                    reconnect_task: None,
                }),
                state_tx,
                session_tx,
                connect_serial: tokio::sync::Mutex::new(()),
                orphaned_replies: AtomicU64::new(0),
            }),
        })
    }

    /// Connect to the service endpoint.
    ///
    /// Retries with the configured backoff until the transport opens or
    /// `max_reconnect_attempts` failures accumulate, in which case the state
    /// returns to `Disconnected` and `ReconnectExhausted` is returned. A no-op
    /// when already connected. Takes over from a background reconnect loop.
    pub async fn connect(&self) -> Result<()> {
        let _serial = self.inner.connect_serial.lock().await;

        let (session, change) = {
            let mut shared = self.inner.shared();
            if !shared.state.can_connect() {
                if shared.state.is_terminal() {
                    return Err(PoiesisError::InvalidState {
                        operation: "connect",
                        state: shared.state,
                    });
                }
                return Ok(());
            }
            if let Some(task) = shared.reconnect_task.take() {
                task.abort();
            }
            shared.reconnect_attempts = 0;
            // Leave `Disconnected` in the same step so a concurrent
            // `disconnect()` cannot mistake this attempt for idle.
            let session = self.inner.begin_session(&mut shared);
            let change = self.inner.set_state(&mut shared, ConnectionState::Connecting);
            (session, change)
        };
        self.inner.publish(change);

        Inner::establish(&self.inner, session).await
    }

    /// Disconnect from the service.
    ///
    /// Every request pending at call time is rejected with
    /// `Disconnected(ClientDisconnected)` before the first suspension point.
    /// Cancels any reconnect backoff and in-progress connect. Idempotent.
    pub async fn disconnect(&self) {
        self.inner
            .close_down(
                ConnectionState::Disconnected,
                DisconnectReason::ClientDisconnected,
            )
            .await;
    }

    /// Disconnect and move to the terminal `Closed` state.
    pub async fn shutdown(&self) {
        self.inner
            .close_down(ConnectionState::Closed, DisconnectReason::Shutdown)
            .await;
    }

    /// Send a request and await the reply.
    ///
    /// Fails immediately with `InvalidState` unless connected; nothing is
    /// queued. The returned future resolves exactly once: with the reply, a
    /// remote error, a timeout, or a disconnect.
    pub async fn request(&self, method: &str, params: Map<String, Value>) -> Result<Value> {
        let inner = &self.inner;
        let timeout = inner.config.timeout();

        let (id, completion) = {
            let mut shared = inner.shared();
            if shared.state != ConnectionState::Connected {
                return Err(PoiesisError::InvalidState {
                    operation: "send request",
                    state: shared.state,
                });
            }

            let id = inner.ids.next_id();
            let (mut pending, completion) =
                PendingRequest::new(id.clone(), method, params.clone(), timeout);
            pending.set_timer(tokio::spawn(Inner::expire_after(
                Arc::downgrade(inner),
                id.clone(),
                timeout,
            )));
            shared.pending.insert(pending);
            (id, completion)
        };

        debug!("Sending {} ({})", method, id);
        let request = OutboundRequest {
            id: id.clone(),
            method: method.to_string(),
            params,
        };

        if let Err(err) = inner.transport.send(request).await {
            let pending = inner.shared().pending.remove(&id);
            if let Some(pending) = pending {
                pending.cancel();
                return Err(PoiesisError::transport(
                    format!("request '{}' ({})", method, id),
                    err,
                ));
            }
            // Already settled by a flush or timeout; report that outcome.
            debug!("Send of {} failed after it was settled: {}", id, err);
        }

        match completion.await {
            Ok(outcome) => outcome,
            Err(_) => Err(PoiesisError::Disconnected {
                reason: DisconnectReason::Shutdown,
            }),
        }
    }

    /// Typed wrapper over [`request`](Self::request).
    ///
    /// `params` must serialize to a JSON object (or unit/`None`, sent as an
    /// empty object).
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = match serde_json::to_value(params)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(PoiesisError::InvalidParams {
                    message: format!(
                        "params for '{}' must serialize to a JSON object, got {}",
                        method,
                        json_kind(&other)
                    ),
                })
            }
        };
        let value = self.request(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.shared().state
    }

    /// Whether requests can be sent right now.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch channel mirroring every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.shared().pending.len()
    }

    /// Outstanding requests, oldest first.
    pub fn pending_requests(&self) -> Vec<PendingRequestInfo> {
        self.inner.shared().pending.snapshot()
    }

    /// Failed connect attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.shared().reconnect_attempts
    }

    /// Replies dropped because no pending request matched their id.
    pub fn orphaned_replies(&self) -> u64 {
        self.inner.orphaned_replies.load(Ordering::Relaxed)
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.inner.config.endpoint
    }

    /// The config this manager was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Bus receiving push events and connection status events.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> u64 {
        self.shared().session
    }

    fn begin_session(&self, shared: &mut Shared) -> u64 {
        shared.session += 1;
        self.session_tx.send_replace(shared.session);
        shared.session
    }

    fn set_state(&self, shared: &mut Shared, to: ConnectionState) -> Option<StateChange> {
        let from = shared.state;
        if from == to {
            return None;
        }
        shared.state = to;
        self.state_tx.send_replace(to);
        Some(StateChange { from, to })
    }

    /// Publish a state change. Must be called without the state lock held.
    fn publish(&self, change: Option<StateChange>) {
        if let Some(StateChange { from, to }) = change {
            info!("Connection to {}: {} -> {}", self.config.endpoint, from, to);
            self.events.emit(
                topics::CONNECTION_STATE,
                json!({ "from": from, "to": to }),
                Some(topics::SOURCE),
            );
        }
    }

    fn superseded(shared: &Shared) -> PoiesisError {
        let reason = if shared.state == ConnectionState::Closed {
            DisconnectReason::Shutdown
        } else {
            DisconnectReason::ClientDisconnected
        };
        PoiesisError::Disconnected { reason }
    }

    /// Open the transport for `session`, retrying with backoff.
    async fn establish(inner: &Arc<Inner>, session: u64) -> Result<()> {
        let mut session_rx = inner.session_tx.subscribe();
        let endpoint = inner.config.endpoint.as_str();

        loop {
            let change = {
                let mut shared = inner.shared();
                if shared.session != session {
                    return Err(Self::superseded(&shared));
                }
                inner.set_state(&mut shared, ConnectionState::Connecting)
            };
            inner.publish(change);

            let (sink, inbound) = InboundSink::channel();
            let opened = tokio::select! {
                result = inner.transport.open(endpoint, inner.credentials.as_ref(), sink) => Some(result),
                _ = session_rx.wait_for(|current| *current != session) => None,
            };
            let Some(opened) = opened else {
                debug!("Connect to {} cancelled mid-open", endpoint);
                let shared = inner.shared();
                return Err(Self::superseded(&shared));
            };

            match opened {
                Ok(()) => {
                    let outcome = {
                        let mut shared = inner.shared();
                        if shared.session != session {
                            Err(Self::superseded(&shared))
                        } else {
                            shared.reconnect_attempts = 0;
                            Ok(inner.set_state(&mut shared, ConnectionState::Connected))
                        }
                    };
                    let change = match outcome {
                        Ok(change) => change,
                        Err(err) => {
                            inner.transport.close().await;
                            return Err(err);
                        }
                    };

                    inner.publish(change);
                    tokio::spawn(Self::pump(Arc::downgrade(inner), session, inbound));
                    return Ok(());
                }
                Err(err) => {
                    let (change, attempts, delay) = {
                        let mut shared = inner.shared();
                        if shared.session != session {
                            return Err(Self::superseded(&shared));
                        }
                        shared.reconnect_attempts += 1;
                        let attempts = shared.reconnect_attempts;
                        if inner.policy.allows_retry(attempts) {
                            let change = inner.set_state(&mut shared, ConnectionState::Reconnecting);
                            (change, attempts, Some(inner.policy.delay_for(attempts)))
                        } else {
                            let change = inner.set_state(&mut shared, ConnectionState::Disconnected);
                            (change, attempts, None)
                        }
                    };
                    inner.publish(change);

                    let Some(delay) = delay else {
                        return Err(inner.reconnect_exhausted(attempts, &err));
                    };

                    warn!(
                        "Connect attempt {}/{} to {} failed: {}. Retrying in {:?}",
                        attempts, inner.policy.max_attempts, endpoint, err, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = session_rx.wait_for(|current| *current != session) => {}
                    }
                }
            }
        }
    }

    fn reconnect_exhausted(&self, attempts: u32, err: &TransportError) -> PoiesisError {
        warn!(
            "All {} connect attempts to {} exhausted. Last error: {}",
            attempts, self.config.endpoint, err
        );
        self.events.emit(
            topics::RECONNECT_FAILED,
            json!({ "attempts": attempts, "error": err.to_string() }),
            Some(topics::SOURCE),
        );
        PoiesisError::ReconnectExhausted {
            attempts,
            last_error: err.to_string(),
        }
    }

    /// Drain inbound transport events for one session.
    async fn pump(
        weak: Weak<Inner>,
        session: u64,
        mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let reason = loop {
            let Some(event) = inbound.recv().await else {
                break "transport closed".to_string();
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.session() != session {
                return;
            }
            match event {
                TransportEvent::Frame(frame) => inner.handle_frame(frame),
                TransportEvent::Lost(reason) => break reason,
            }
        };

        if let Some(inner) = weak.upgrade() {
            Self::handle_loss(&inner, session, reason);
        }
    }

    fn handle_frame(&self, frame: InboundFrame) {
        match frame {
            InboundFrame::Reply { id, outcome } => {
                let pending = self.shared().pending.remove(&id);
                let Some(pending) = pending else {
                    self.orphaned_replies.fetch_add(1, Ordering::Relaxed);
                    warn!("Dropping orphan reply {}", id);
                    return;
                };

                debug!(
                    "Reply for {} ({}) after {:?}",
                    id,
                    pending.method,
                    pending.elapsed()
                );
                let outcome = outcome.map_err(|remote| PoiesisError::Remote {
                    method: pending.method.clone(),
                    id: id.clone(),
                    code: remote.code,
                    message: remote.message,
                    data: remote.data,
                });
                pending.resolve(outcome);
            }
            InboundFrame::Push {
                event_type,
                data,
                source,
            } => {
                debug!("Push event '{}' from {}", event_type, source);
                self.events.emit(&event_type, data, Some(&source));
            }
        }
    }

    /// React to an unsolicited transport loss during `session`.
    fn handle_loss(inner: &Arc<Inner>, session: u64, reason: String) {
        let (change, flushed, retry_session) = {
            let mut shared = inner.shared();
            if shared.session != session || shared.state != ConnectionState::Connected {
                return;
            }
            let retry_session = inner.begin_session(&mut shared);
            let change = inner.set_state(&mut shared, ConnectionState::Reconnecting);
            (change, shared.pending.drain(), retry_session)
        };

        let failed = flushed.len();
        for pending in flushed {
            pending.resolve(Err(PoiesisError::Disconnected {
                reason: DisconnectReason::ConnectionLost(reason.clone()),
            }));
        }
        warn!(
            "Connection to {} lost ({}); failed {} pending requests",
            inner.config.endpoint, reason, failed
        );

        inner.publish(change);
        inner.events.emit(
            topics::CONNECTION_LOST,
            json!({ "reason": reason, "failed_requests": failed }),
            Some(topics::SOURCE),
        );

        Self::schedule_reconnect(inner, retry_session);
    }

    fn schedule_reconnect(inner: &Arc<Inner>, session: u64) {
        let delay = inner.policy.delay_for(0);
        let task_inner = inner.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = Self::establish(&task_inner, session).await {
                debug!("Background reconnect ended: {}", err);
            }
        });

        // The task may already have moved past `Reconnecting`; only the
        // session decides whether it is still wanted.
        let mut shared = inner.shared();
        if shared.session == session {
            info!(
                "Reconnecting to {} in {:?}",
                inner.config.endpoint, delay
            );
            if let Some(previous) = shared.reconnect_task.replace(task) {
                previous.abort();
            }
        } else {
            task.abort();
        }
    }

    /// Timeout timer for one request.
    async fn expire_after(weak: Weak<Inner>, id: CorrelationId, timeout: Duration) {
        tokio::time::sleep(timeout).await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let pending = inner.shared().pending.remove(&id);
        if let Some(pending) = pending {
            warn!(
                "Request {} ({}) timed out after {:?}",
                id, pending.method, timeout
            );
            let method = pending.method.clone();
            pending.resolve_expired(Err(PoiesisError::Timeout {
                method,
                id,
                timeout,
            }));
        }
    }

    async fn close_down(&self, target: ConnectionState, reason: DisconnectReason) {
        let (change, flushed, reconnect_task) = {
            let mut shared = self.shared();
            if shared.state.is_terminal() || shared.state == target {
                return;
            }
            self.begin_session(&mut shared);
            let task = shared.reconnect_task.take();
            let change = self.set_state(&mut shared, target);
            (change, shared.pending.drain(), task)
        };

        if let Some(task) = reconnect_task {
            task.abort();
        }
        let rejected = flushed.len();
        for pending in flushed {
            pending.resolve(Err(PoiesisError::Disconnected {
                reason: reason.clone(),
            }));
        }
        info!(
            "Disconnected from {} ({}); rejected {} pending requests",
            self.config.endpoint, reason, rejected
        );

        self.publish(change);
        self.transport.close().await;
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
