//! Development push hub.
//!
//! Serves `/ws/live` for live_mux clients and relays anything posted to
//! `/api/live/{topic}` to the connections interested in that topic. It knows
//! nothing about what topics mean.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use live_mux::protocol::{Action, DataFrame, parse_control_frame};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct Connection {
    /// Empty means "everything"
    topics: HashSet<String>,
    tx: mpsc::Sender<String>,
}

impl Connection {
    fn wants(&self, topic: &str) -> bool {
        self.topics.is_empty() || self.topics.contains(topic)
    }
}

/// Connection manager: which socket wants which topics.
pub struct Hub {
    connections: RwLock<HashMap<Uuid, Connection>>,
    queue_size: usize,
}

impl Hub {
    pub fn new(queue_size: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            queue_size: queue_size.max(1),
        }
    }

    /// Register a connection. Frames for it arrive on the returned receiver.
    pub async fn connect(&self) -> (Uuid, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.queue_size);
        let mut connections = self.connections.write().await;
        connections.insert(
            id,
            Connection {
                topics: HashSet::new(),
                tx,
            },
        );
        info!(connection = %id, total = connections.len(), "live connection registered");
        (id, rx)
    }

    pub async fn disconnect(&self, id: Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(&id).is_some() {
            info!(connection = %id, total = connections.len(), "live connection removed");
        }
    }

    pub async fn subscribe(&self, id: Uuid, topic: &str) {
        if let Some(conn) = self.connections.write().await.get_mut(&id) {
            conn.topics.insert(topic.to_string());
            debug!(connection = %id, topic, "subscribed");
        }
    }

    pub async fn unsubscribe(&self, id: Uuid, topic: &str) {
        if let Some(conn) = self.connections.write().await.get_mut(&id) {
            conn.topics.remove(topic);
            debug!(connection = %id, topic, "unsubscribed");
        }
    }

    /// Apply one inbound control frame. Anything unparseable is ignored.
    pub async fn apply(&self, id: Uuid, text: &str) {
        match parse_control_frame(text) {
            Ok(frame) => match frame.action {
                Action::Subscribe => self.subscribe(id, &frame.topic).await,
                Action::Unsubscribe => self.unsubscribe(id, &frame.topic).await,
            },
            Err(e) => debug!(connection = %id, error = %e, "ignoring client frame"),
        }
    }

    /// Send `data` on `topic` to every interested connection. Connections
    /// whose queue is full or closed are disconnected. Returns how many
    /// connections the frame was queued for.
    pub async fn broadcast(&self, topic: &str, data: Value) -> usize {
        let text = match DataFrame::new(topic, data).encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(topic, error = %e, "failed to encode live frame");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let connections = self.connections.read().await;
            for (id, conn) in connections.iter().filter(|(_, c)| c.wants(topic)) {
                match conn.tx.try_send(text.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!(connection = %id, error = %e, "dropping live connection");
                        failed.push(*id);
                    }
                }
            }
        }
        for id in failed {
            self.disconnect(id).await;
        }

        debug!(topic, delivered, "broadcast");
        delivered
    }

    /// Drop every connection. Their sockets close; clients are expected to
    /// reconnect.
    pub async fn kick_all(&self) -> usize {
        let mut connections = self.connections.write().await;
        let count = connections.len();
        connections.clear();
        info!(count, "all live connections dropped");
        count
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Connections that explicitly asked for `topic`.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.topics.contains(topic))
            .count()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Pump one upgraded socket until either side goes away.
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (id, mut outbound) = hub.connect().await;
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // Hub dropped us
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => hub.apply(id, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection = %id, error = %e, "live socket read failed");
                    break;
                }
            }
        }
    }

    hub.disconnect(id).await;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub delivered: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
}

async fn live_socket(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn publish(
    State(hub): State<Arc<Hub>>,
    Path(topic): Path<String>,
    Json(data): Json<Value>,
) -> Json<PublishResponse> {
    let delivered = hub.broadcast(&topic, data).await;
    Json(PublishResponse { delivered })
}

async fn health(State(hub): State<Arc<Hub>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connections: hub.connection_count().await,
    })
}

pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route(live_mux::LIVE_PATH, get(live_socket))
        .route("/api/live/{topic}", post(publish))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

/// Serve the hub on an already-bound listener.
pub async fn serve(listener: TcpListener, hub: Arc<Hub>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("live hub listening on http://{addr}");
    }
    axum::serve(listener, router(hub)).await
}
