//! Connection Driver
//!
//! An explicit state machine owning the single live socket:
//!
//! ```text
//! Absent ──ensure_connected──▶ Connecting ──Opened──▶ Open
//!   ▲                              │                    │
//!   └────────────Closed────────────┴────────────────────┘
//!                 (teardown passes through Closing)
//! ```
//!
//! The driver never blocks and never touches an async runtime directly. It
//! talks to the outside world through [`Transport`] (the socket) and
//! [`Clock`] (one-shot timers), and is advanced by feeding it [`Event`]s.
//! Every event carries the id of the socket or timer that produced it;
//! events from a socket or timer the driver no longer tracks are ignored,
//! so nothing that was torn down or cancelled can revive a connection.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::LiveConfig;
use crate::dispatch::{self, Delivery};
use crate::error::TransportError;
use crate::history::{History, HistoryEntry};
use crate::lifecycle::RefCount;
use crate::metrics::LiveMetrics;
use crate::protocol::ControlFrame;
use crate::registry::{Handler, HandlerId, TopicRegistry};

/// Identifier for one socket attempt.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct SocketId(pub u64);

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

/// Identifier for one scheduled reconnect timer.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct TimerId(pub u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Connection state as seen by consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Absent,
    Connecting,
    Open,
    Closing,
}

/// Socket facility. Implementations report progress back through
/// [`Event`]s tagged with the `SocketId` they were given.
pub trait Transport: Send {
    /// Start opening a socket. An `Err` means the socket could not even be
    /// constructed; no events will follow for `id`.
    fn open(&mut self, id: SocketId, url: &str) -> Result<(), TransportError>;

    /// Write one text frame.
    fn send(&mut self, id: SocketId, text: String) -> Result<(), TransportError>;

    /// Force the socket closed. A `Closed` event follows unless the socket
    /// was already gone.
    fn close(&mut self, id: SocketId);
}

/// One-shot timer facility. A started timer reports `Event::TimerFired`.
pub trait Clock: Send {
    fn start(&mut self, id: TimerId, delay: Duration);
    fn cancel(&mut self, id: TimerId);
}

/// Discrete inputs that advance the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Opened(SocketId),
    Message(SocketId, String),
    Errored(SocketId),
    Closed(SocketId),
    TimerFired(TimerId),
}

#[derive(Debug, Clone, Copy)]
struct Socket {
    id: SocketId,
    state: ConnectionState,
}

#[derive(Debug, Default)]
struct ReconnectState {
    attempt: u32,
    pending: Option<TimerId>,
    last_delay: Option<Duration>,
}

pub struct Driver {
    url: String,
    transport: Box<dyn Transport>,
    clock: Box<dyn Clock>,
    backoff: Backoff,
    socket: Option<Socket>,
    registry: TopicRegistry,
    history: History,
    reconnect: ReconnectState,
    consumers: RefCount,
    metrics: Arc<LiveMetrics>,
    next_socket: u64,
    next_timer: u64,
    next_handler: u64,
}

impl Driver {
    pub fn new(
        config: &LiveConfig,
        url: impl Into<String>,
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            url: url.into(),
            transport,
            clock,
            backoff: Backoff::from_config(&config.reconnect),
            socket: None,
            registry: TopicRegistry::new(),
            history: History::new(config.history_limit),
            reconnect: ReconnectState::default(),
            consumers: RefCount::new(),
            metrics: Arc::new(LiveMetrics::new()),
            next_socket: 1,
            next_timer: 1,
            next_handler: 1,
        }
    }

    // === Connection ===

    /// Open a socket unless one is already open or connecting.
    pub fn ensure_connected(&mut self) {
        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            return;
        }

        let id = SocketId(self.next_socket);
        self.next_socket += 1;

        match self.transport.open(id, &self.url) {
            Ok(()) => {
                debug!(socket = %id, url = %self.url, "opening live socket");
                self.socket = Some(Socket {
                    id,
                    state: ConnectionState::Connecting,
                });
            }
            Err(e) => {
                // Same as an immediate close
                warn!(url = %self.url, error = %e, "failed to construct live socket");
                self.socket = None;
                if self.consumers.is_active() {
                    self.schedule_reconnect();
                }
            }
        }
    }

    /// Start the reconnect timer unless one is already pending.
    pub fn schedule_reconnect(&mut self) {
        if self.reconnect.pending.is_some() {
            return;
        }

        let delay = self.backoff.delay(self.reconnect.attempt);
        self.reconnect.attempt = self.reconnect.attempt.saturating_add(1);
        self.reconnect.last_delay = Some(delay);

        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.clock.start(id, delay);
        self.reconnect.pending = Some(id);
        self.metrics.reconnect_scheduled();

        info!(
            attempt = self.reconnect.attempt,
            delay_ms = delay.as_millis() as u64,
            "live socket reconnect scheduled"
        );
    }

    /// Cancel any pending reconnect, reset backoff and close the socket.
    pub fn teardown(&mut self) {
        if let Some(timer) = self.reconnect.pending.take() {
            self.clock.cancel(timer);
        }
        self.reconnect.attempt = 0;
        self.reconnect.last_delay = None;

        if let Some(socket) = self.socket.as_mut() {
            if matches!(
                socket.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) {
                socket.state = ConnectionState::Closing;
                self.transport.close(socket.id);
                info!(socket = %socket.id, "live socket torn down");
            }
        }
    }

    // === Lifecycle ===

    /// Register a consumer; the first one brings the connection up.
    pub fn acquire(&mut self) {
        if self.consumers.acquire() {
            self.ensure_connected();
        }
    }

    /// Unregister a consumer; the last one tears the connection down.
    pub fn release(&mut self) {
        if self.consumers.get() == 0 {
            debug!("release with no active consumers ignored");
            return;
        }
        if self.consumers.release() {
            self.teardown();
        }
    }

    // === Topics ===

    pub fn add_handler(&mut self, topic: &str, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_handler);
        self.next_handler += 1;

        if self.registry.insert(topic, id, handler) && self.is_connected() {
            self.send_control(ControlFrame::subscribe(topic));
        }
        id
    }

    pub fn remove_handler(&mut self, topic: &str, id: HandlerId) {
        if self.registry.remove(topic, id) && self.is_connected() {
            self.send_control(ControlFrame::unsubscribe(topic));
        }
    }

    // === Events ===

    /// Advance the state machine. A returned [`Delivery`] must be run by the
    /// caller once it no longer holds any lock around the driver.
    pub fn handle(&mut self, event: Event) -> Option<Delivery> {
        match event {
            Event::Opened(id) => {
                self.on_open(id);
                None
            }
            Event::Message(id, text) => self.on_message(id, &text),
            Event::Errored(id) => {
                if self.is_current(id) {
                    // The close that follows drives recovery
                    debug!(socket = %id, "live socket error, forcing close");
                    self.transport.close(id);
                }
                None
            }
            Event::Closed(id) => {
                self.on_close(id);
                None
            }
            Event::TimerFired(id) => {
                self.on_timer(id);
                None
            }
        }
    }

    fn on_open(&mut self, id: SocketId) {
        let Some(socket) = self.socket.as_mut().filter(|s| s.id == id) else {
            debug!(socket = %id, "open event for stale socket ignored");
            return;
        };
        if socket.state != ConnectionState::Connecting {
            return;
        }

        socket.state = ConnectionState::Open;
        self.reconnect.attempt = 0;
        self.reconnect.last_delay = None;
        self.metrics.connection_opened();
        info!(socket = %id, "live socket open");

        // The server forgets subscriptions across reconnects
        let topics: Vec<String> = self.registry.topics().map(str::to_string).collect();
        for topic in topics {
            self.send_control(ControlFrame::subscribe(topic));
        }
    }

    fn on_message(&mut self, id: SocketId, text: &str) -> Option<Delivery> {
        if !self
            .socket
            .is_some_and(|s| s.id == id && s.state == ConnectionState::Open)
        {
            debug!(socket = %id, "frame from inactive socket ignored");
            return None;
        }
        dispatch::prepare(text, &self.registry, &mut self.history, &self.metrics)
    }

    fn on_close(&mut self, id: SocketId) {
        if !self.is_current(id) {
            debug!(socket = %id, "close event for stale socket ignored");
            return;
        }

        self.socket = None;
        self.metrics.connection_closed();
        info!(socket = %id, consumers = self.consumers.get(), "live socket closed");

        if self.consumers.is_active() {
            self.schedule_reconnect();
        }
    }

    fn on_timer(&mut self, id: TimerId) {
        if self.reconnect.pending != Some(id) {
            debug!(timer = %id, "stale reconnect timer ignored");
            return;
        }
        self.reconnect.pending = None;
        if self.consumers.is_active() {
            self.ensure_connected();
        }
    }

    fn send_control(&mut self, frame: ControlFrame) {
        let Some(socket) = self.socket.filter(|s| s.state == ConnectionState::Open) else {
            return;
        };
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(topic = %frame.topic, error = %e, "failed to encode control frame");
                return;
            }
        };
        match self.transport.send(socket.id, text) {
            Ok(()) => {
                self.metrics.control_frame_sent();
                debug!(socket = %socket.id, action = ?frame.action, topic = %frame.topic, "control frame sent");
            }
            Err(e) => warn!(socket = %socket.id, error = %e, "failed to send control frame"),
        }
    }

    fn is_current(&self, id: SocketId) -> bool {
        self.socket.is_some_and(|s| s.id == id)
    }

    // === Accessors ===

    pub fn state(&self) -> ConnectionState {
        self.socket.map_or(ConnectionState::Absent, |s| s.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.get()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect.attempt
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.pending.is_some()
    }

    /// Delay of the most recently scheduled reconnect since the last open.
    pub fn last_reconnect_delay(&self) -> Option<Duration> {
        self.reconnect.last_delay
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.entries()
    }

    pub fn metrics(&self) -> Arc<LiveMetrics> {
        self.metrics.clone()
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("url", &self.url)
            .field("state", &self.state())
            .field("consumers", &self.consumers.get())
            .field("registry", &self.registry)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}
