//! Correlation table of requests awaiting a reply.
//!
//! Every exit path (reply, timeout, send failure, flush) goes through
//! [`PendingTable::remove`] or [`PendingTable::drain`], so whichever path takes
//! the entry out of the table is the only one that can resolve it.

use super::CorrelationId;
use crate::error::Result;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Receiving end of a pending request's single-resolution slot.
pub(crate) type Completion = oneshot::Receiver<Result<Value>>;

/// A request awaiting its reply.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) id: CorrelationId,
    pub(crate) method: String,
    pub(crate) params: Map<String, Value>,
    pub(crate) sent_at: Instant,
    pub(crate) deadline: Instant,
    completion: oneshot::Sender<Result<Value>>,
    timer: Option<JoinHandle<()>>,
}

impl PendingRequest {
    pub(crate) fn new(
        id: CorrelationId,
        method: &str,
        params: Map<String, Value>,
        timeout: Duration,
    ) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let sent_at = Instant::now();
        (
            Self {
                id,
                method: method.to_string(),
                params,
                sent_at,
                deadline: sent_at + timeout,
                completion: tx,
                timer: None,
            },
            rx,
        )
    }

    pub(crate) fn set_timer(&mut self, timer: JoinHandle<()>) {
        self.timer = Some(timer);
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.sent_at.elapsed()
    }

    /// Resolve the request and cancel its timeout timer.
    ///
    /// Returns false if the caller already dropped its future.
    pub(crate) fn resolve(mut self, outcome: Result<Value>) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.completion.send(outcome).is_ok()
    }

    /// Resolve from inside the timeout timer itself.
    pub(crate) fn resolve_expired(mut self, outcome: Result<Value>) -> bool {
        self.timer = None;
        self.completion.send(outcome).is_ok()
    }

    /// Drop the request without resolving it (the caller gets the error
    /// directly instead).
    pub(crate) fn cancel(mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Outstanding requests keyed by correlation id.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    entries: HashMap<CorrelationId, PendingRequest>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a request. Ids come from a monotonic counter, so a collision
    /// means a bug in the caller.
    pub(crate) fn insert(&mut self, request: PendingRequest) {
        debug_assert!(
            !self.entries.contains_key(&request.id),
            "correlation id {} reused while pending",
            request.id
        );
        self.entries.insert(request.id.clone(), request);
    }

    pub(crate) fn remove(&mut self, id: &CorrelationId) -> Option<PendingRequest> {
        self.entries.remove(id)
    }

    /// Take every entry out of the table, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<PendingRequest> {
        let mut drained: Vec<PendingRequest> = self.entries.drain().map(|(_, r)| r).collect();
        drained.sort_by_key(|r| r.sent_at);
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Read-only view of every entry, oldest first.
    pub(crate) fn snapshot(&self) -> Vec<PendingRequestInfo> {
        let mut infos: Vec<PendingRequestInfo> = self
            .entries
            .values()
            .map(|r| PendingRequestInfo {
                id: r.id.clone(),
                method: r.method.clone(),
                params: r.params.clone(),
                elapsed: r.elapsed(),
                remaining: r.deadline.saturating_duration_since(Instant::now()),
            })
            .collect();
        infos.sort_by(|a, b| b.elapsed.cmp(&a.elapsed));
        infos
    }
}

/// Snapshot of one outstanding request.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequestInfo {
    pub id: CorrelationId,
    pub method: String,
    pub params: Map<String, Value>,
    /// Time since the request was registered.
    pub elapsed: Duration,
    /// Time left before it times out.
    pub remaining: Duration,
}
