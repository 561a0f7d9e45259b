//! Event payload wrapper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload wrapper for every event passing through an
/// [`EventBus`](super::EventBus).
///
/// Subscribers and the history each hold their own clone, so a subscriber that
/// mutates the payload it received cannot affect anyone else's copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload<T = serde_json::Value> {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: T,
    pub timestamp: DateTime<Utc>,
    /// Emission order within the bus that produced the payload.
    pub sequence: u64,
    pub source: String,
}

impl<T> EventPayload<T> {
    pub(crate) fn new(event_type: &str, data: T, source: &str, sequence: u64) -> Self {
        Self {
            event_type: event_type.to_string(),
            data,
            timestamp: Utc::now(),
            sequence,
            source: source.to_string(),
        }
    }

    /// Whether this payload carries `event_type`.
    pub fn is_type(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }
}
