//! Client-side counters for the live connection.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LiveMetrics {
    /// Sockets that reached the open state
    pub connections_opened: AtomicU64,
    /// Close events observed for the current socket
    pub connections_closed: AtomicU64,
    /// Reconnect timers started
    pub reconnects_scheduled: AtomicU64,
    /// Subscribe/unsubscribe frames written
    pub control_frames_sent: AtomicU64,
    /// Data frames parsed successfully
    pub frames_received: AtomicU64,
    /// Inbound frames dropped as malformed
    pub frames_dropped: AtomicU64,
    /// Handlers that panicked during dispatch
    pub handler_panics: AtomicU64,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn control_frame_sent(&self) {
        self.control_frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_panicked(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LiveMetricsSnapshot {
        LiveMetricsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            control_frames_sent: self.control_frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of live metrics (for serialization/logging)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveMetricsSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub reconnects_scheduled: u64,
    pub control_frames_sent: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub handler_panics: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let m = LiveMetrics::new();
        m.connection_opened();
        m.frame_received();
        m.frame_received();
        m.frame_dropped();
        m.handler_panicked();

        let s = m.snapshot();
        assert_eq!(s.connections_opened, 1);
        assert_eq!(s.frames_received, 2);
        assert_eq!(s.frames_dropped, 1);
        assert_eq!(s.handler_panics, 1);
        assert_eq!(s.reconnects_scheduled, 0);
    }
}
