//! Correlation ids linking requests to their replies.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque token that links a request to its eventual reply.
///
/// Rendered as `req-` followed by a zero-padded six digit counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub const PREFIX: &'static str = "req-";

    /// Render the token for a counter value.
    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!("{}{:06}", Self::PREFIX, sequence))
    }

    /// Wrap a token received from the wire without reformatting it.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The id as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(raw: &str) -> Self {
        Self::from_raw(raw)
    }
}

/// Monotonic id source owned by a single manager instance.
///
/// The counter is never reset, so an id cannot be reissued while an earlier
/// request carrying it could still receive a reply.
#[derive(Debug)]
pub(crate) struct CorrelationIdGenerator {
    next: AtomicU64,
}

impl CorrelationIdGenerator {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> CorrelationId {
        CorrelationId::from_sequence(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_fixed_width() {
        assert_eq!(CorrelationId::from_sequence(1).as_str(), "req-000001");
        assert_eq!(CorrelationId::from_sequence(123456).as_str(), "req-123456");
        assert_eq!(CorrelationId::from_sequence(1234567).as_str(), "req-1234567");
    }

    #[test]
    fn test_generator_is_monotonic() {
        let ids = CorrelationIdGenerator::new();
        assert_eq!(ids.next_id().as_str(), "req-000001");
        assert_eq!(ids.next_id().as_str(), "req-000002");
        assert_eq!(ids.next_id().as_str(), "req-000003");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&CorrelationId::from_sequence(7)).unwrap();
        assert_eq!(json, "\"req-000007\"");
    }
}
