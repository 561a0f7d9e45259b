//! Bounded FIFO of emitted payloads.

use super::EventPayload;
use std::collections::VecDeque;

/// Event history with a fixed capacity.
///
/// `len() <= capacity()` always holds; once full, each push evicts the oldest
/// entry. A capacity of zero stores nothing.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    entries: VecDeque<EventPayload<T>>,
    capacity: usize,
}

impl<T> HistoryBuffer<T> {
    /// Create an empty buffer holding at most `capacity` payloads.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a payload, evicting the oldest entries past capacity.
    pub fn push(&mut self, payload: EventPayload<T>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(payload);
    }

    /// Number of stored payloads.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no payload is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of payloads kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every stored payload.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone> HistoryBuffer<T> {
    /// Clones of the stored payloads in emission order, optionally filtered.
    pub fn snapshot(&self, event_type: Option<&str>) -> Vec<EventPayload<T>> {
        match event_type {
            Some(event_type) => self
                .entries
                .iter()
                .filter(|payload| payload.is_type(event_type))
                .cloned()
                .collect(),
            None => self.entries.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(event_type: &str, data: i32, sequence: u64) -> EventPayload<i32> {
        EventPayload::new(event_type, data, "test", sequence)
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut history = HistoryBuffer::new(3);
        for (seq, data) in [1, 2, 3, 4].into_iter().enumerate() {
            history.push(payload("x", data, seq as u64));
        }

        let data: Vec<i32> = history.snapshot(None).into_iter().map(|p| p.data).collect();
        assert_eq!(data, vec![2, 3, 4]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut history = HistoryBuffer::new(0);
        history.push(payload("x", 1, 0));
        assert!(history.is_empty());
    }

    #[test]
    fn test_snapshot_filters_by_type() {
        let mut history = HistoryBuffer::new(10);
        history.push(payload("a", 1, 0));
        history.push(payload("b", 2, 1));
        history.push(payload("a", 3, 2));

        let a: Vec<i32> = history.snapshot(Some("a")).into_iter().map(|p| p.data).collect();
        assert_eq!(a, vec![1, 3]);
        assert!(history.snapshot(Some("c")).is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut history = HistoryBuffer::new(2);
        history.push(payload("a", 1, 0));

        let mut copy = history.snapshot(None);
        copy[0].data = 99;

        assert_eq!(history.snapshot(None)[0].data, 1);
    }
}
