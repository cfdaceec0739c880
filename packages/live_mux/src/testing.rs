//! In-memory [`Transport`] and [`Clock`] for tests.
//!
//! Both are cheap handles over shared state: give one clone to the driver
//! and keep another to inspect what the driver asked for. Nothing happens on
//! its own; the test decides when sockets open or close and when timers fire
//! by feeding the matching [`Event`](crate::Event)s back in.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::driver::{Clock, SocketId, TimerId, Transport};
use crate::error::TransportError;
use crate::protocol::ControlFrame;

#[derive(Debug, Default)]
struct TransportLog {
    opened: Vec<(SocketId, String)>,
    sent: Vec<(SocketId, String)>,
    closed: Vec<SocketId>,
    fail_next_open: bool,
}

/// Records every open/send/close request.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, TransportLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `open` fail as if the endpoint were malformed.
    pub fn fail_next_open(&self) {
        self.log().fail_next_open = true;
    }

    pub fn opened(&self) -> Vec<(SocketId, String)> {
        self.log().opened.clone()
    }

    pub fn last_opened(&self) -> Option<SocketId> {
        self.log().opened.last().map(|(id, _)| *id)
    }

    pub fn sent(&self) -> Vec<(SocketId, String)> {
        self.log().sent.clone()
    }

    /// Control frames written to one socket, decoded.
    pub fn control_frames(&self, id: SocketId) -> Vec<ControlFrame> {
        self.log()
            .sent
            .iter()
            .filter(|(sock, _)| *sock == id)
            .filter_map(|(_, text)| serde_json::from_str(text).ok())
            .collect()
    }

    pub fn closed(&self) -> Vec<SocketId> {
        self.log().closed.clone()
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, id: SocketId, url: &str) -> Result<(), TransportError> {
        let mut log = self.log();
        if std::mem::take(&mut log.fail_next_open) {
            return Err(TransportError::InvalidEndpoint {
                url: url.to_string(),
                reason: "rejected by test transport".to_string(),
            });
        }
        log.opened.push((id, url.to_string()));
        Ok(())
    }

    fn send(&mut self, id: SocketId, text: String) -> Result<(), TransportError> {
        self.log().sent.push((id, text));
        Ok(())
    }

    fn close(&mut self, id: SocketId) {
        self.log().closed.push(id);
    }
}

#[derive(Debug, Default)]
struct ClockLog {
    pending: VecDeque<(TimerId, Duration)>,
    cancelled: Vec<TimerId>,
}

/// Timers that only fire when the test says so.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    log: Arc<Mutex<ClockLog>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, ClockLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delays of the timers still pending, oldest first.
    pub fn pending(&self) -> Vec<Duration> {
        self.log().pending.iter().map(|(_, d)| *d).collect()
    }

    pub fn pending_ids(&self) -> Vec<TimerId> {
        self.log().pending.iter().map(|(id, _)| *id).collect()
    }

    pub fn cancelled(&self) -> Vec<TimerId> {
        self.log().cancelled.clone()
    }

    /// Pop the oldest pending timer. The caller delivers
    /// `Event::TimerFired` with the returned id.
    pub fn fire_next(&self) -> Option<TimerId> {
        self.log().pending.pop_front().map(|(id, _)| id)
    }
}

impl Clock for ManualClock {
    fn start(&mut self, id: TimerId, delay: Duration) {
        self.log().pending.push_back((id, delay));
    }

    fn cancel(&mut self, id: TimerId) {
        let mut log = self.log();
        log.pending.retain(|(pending, _)| *pending != id);
        log.cancelled.push(id);
    }
}
