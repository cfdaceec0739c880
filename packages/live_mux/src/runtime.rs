//! Tokio-backed [`Transport`] and [`Clock`].
//!
//! Each socket and each timer runs as its own task and reports back through
//! a single event channel, so the driver sees everything in one ordered
//! stream and never blocks on I/O.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::driver::{Clock, Event, SocketId, TimerId, Transport};
use crate::error::TransportError;

/// Upper bound on the TCP, TLS and upgrade handshake of one socket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a closing socket may spend sending its close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

struct SocketTask {
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<String>,
}

/// WebSocket transport over `tokio-tungstenite`.
pub struct TungsteniteTransport {
    runtime: Handle,
    events: mpsc::UnboundedSender<Event>,
    sockets: HashMap<SocketId, SocketTask>,
    connect_timeout: Duration,
}

impl TungsteniteTransport {
    pub fn new(runtime: Handle, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            runtime,
            events,
            sockets: HashMap::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// A socket still handshaking after `timeout` reports an error and closes.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Transport for TungsteniteTransport {
    fn open(&mut self, id: SocketId, url: &str) -> Result<(), TransportError> {
        let request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        match request.uri().scheme_str() {
            Some("ws" | "wss") => {}
            other => {
                return Err(TransportError::UnsupportedScheme(
                    other.unwrap_or_default().to_string(),
                ));
            }
        }

        // Tasks that already finished leave a closed channel behind
        self.sockets.retain(|_, task| !task.outbound.is_closed());

        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        self.runtime.spawn(run_socket(
            id,
            request,
            self.connect_timeout,
            cancel.clone(),
            outbound_rx,
            self.events.clone(),
        ));
        self.sockets.insert(id, SocketTask { cancel, outbound });
        Ok(())
    }

    fn send(&mut self, id: SocketId, text: String) -> Result<(), TransportError> {
        self.sockets
            .get(&id)
            .and_then(|task| task.outbound.send(text).ok())
            .ok_or(TransportError::NotWritable(id.0))
    }

    fn close(&mut self, id: SocketId) {
        if let Some(task) = self.sockets.remove(&id) {
            task.cancel.cancel();
        }
    }
}

impl Drop for TungsteniteTransport {
    fn drop(&mut self) {
        for task in self.sockets.values() {
            task.cancel.cancel();
        }
    }
}

async fn run_socket(
    id: SocketId,
    request: Request,
    connect_timeout: Duration,
    cancel: CancellationToken,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<Event>,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = events.send(Event::Closed(id));
            return;
        }
        result = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(request)) => result,
    };

    let stream = match connected {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            warn!(socket = %id, error = %e, "live socket failed to connect");
            let _ = events.send(Event::Errored(id));
            let _ = events.send(Event::Closed(id));
            return;
        }
        Err(_) => {
            warn!(socket = %id, timeout = ?connect_timeout, "live socket connect timed out");
            let _ = events.send(Event::Errored(id));
            let _ = events.send(Event::Closed(id));
            return;
        }
    };
    let _ = events.send(Event::Opened(id));

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // A peer that stopped reading must not hold the close open
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, write.send(Message::Close(None))).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(text) = frame else { break };
                let sent = tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = write.send(Message::Text(text.into())) => sent,
                };
                if let Err(e) = sent {
                    debug!(socket = %id, error = %e, "live socket write failed");
                    let _ = events.send(Event::Errored(id));
                    break;
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(Event::Message(id, text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Pings are answered by tungstenite; binary frames carry nothing for us
                Some(Ok(_)) => {}
                Some(Err(tungstenite::Error::ConnectionClosed)) => break,
                Some(Err(e)) => {
                    debug!(socket = %id, error = %e, "live socket read failed");
                    let _ = events.send(Event::Errored(id));
                    break;
                }
            }
        }
    }

    let _ = events.send(Event::Closed(id));
}

/// Timers as sleeping Tokio tasks.
pub struct TokioClock {
    runtime: Handle,
    events: mpsc::UnboundedSender<Event>,
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioClock {
    pub fn new(runtime: Handle, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            runtime,
            events,
            timers: HashMap::new(),
        }
    }
}

impl Clock for TokioClock {
    fn start(&mut self, id: TimerId, delay: Duration) {
        self.timers.retain(|_, handle| !handle.is_finished());

        let events = self.events.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::TimerFired(id));
        });
        self.timers.insert(id, handle);
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
        }
    }
}

impl Drop for TokioClock {
    fn drop(&mut self) {
        for handle in self.timers.values() {
            handle.abort();
        }
    }
}
