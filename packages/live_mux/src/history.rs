//! Bounded history of inbound frames.
//!
//! Every parsed frame lands here whether or not anyone is subscribed to its
//! topic, so late-mounting consumers can render recent activity.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::DataFrame;

/// Default maximum number of retained frames.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub frame: DataFrame,
    pub received_at: DateTime<Utc>,
}

/// Newest-first ring of recent frames.
#[derive(Debug)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(1024)),
            limit,
        }
    }

    /// Record a frame as the newest entry, evicting the oldest on overflow.
    pub fn push(&mut self, frame: DataFrame) {
        self.entries.push_front(HistoryEntry {
            frame,
            received_at: Utc::now(),
        });
        self.entries.truncate(self.limit);
    }

    /// Snapshot of the entries, newest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(n: u64) -> DataFrame {
        DataFrame::new("tasks", json!({ "id": n }))
    }

    #[test]
    fn newest_first() {
        let mut h = History::default();
        h.push(frame(1));
        h.push(frame(2));
        h.push(frame(3));

        let ids: Vec<_> = h.entries().iter().map(|e| e.frame.data["id"].clone()).collect();
        assert_eq!(ids, vec![json!(3), json!(2), json!(1)]);
        assert_eq!(h.latest().unwrap().frame, frame(3));
    }

    #[test]
    fn capacity_eviction() {
        let mut h = History::new(3);
        for n in 1..=5 {
            h.push(frame(n));
        }

        assert_eq!(h.len(), 3);
        let ids: Vec<_> = h.entries().iter().map(|e| e.frame.data["id"].clone()).collect();
        // Oldest (1, 2) were evicted
        assert_eq!(ids, vec![json!(5), json!(4), json!(3)]);
    }

    #[test]
    fn zero_limit_retains_nothing() {
        let mut h = History::new(0);
        h.push(frame(1));
        assert!(h.is_empty());
    }
}
