//! Live Mux - one shared WebSocket, many topic subscribers
//!
//! This crate multiplexes a single duplex socket across any number of
//! independent consumers. Each consumer subscribes to the topics it cares
//! about; the connection is opened when the first consumer appears, survives
//! drops through exponential-backoff reconnection, and is torn down when the
//! last consumer goes away.
//!
//! It has no UI or HTTP-server dependencies and no knowledge of what a topic
//! means to the application.
//!
//! # Example
//!
//! ```no_run
//! use live_mux::{LiveClient, LiveConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = LiveClient::connect(LiveConfig::default(), "ws://127.0.0.1:5055/ws/live");
//!
//!     let live = client.consumer();
//!     let _tasks = live.subscribe("tasks", |data| {
//!         println!("task update: {data}");
//!     });
//!
//!     let mut connectivity = live.connectivity();
//!     while connectivity.changed().await.is_ok() {
//!         println!("connected: {}", *connectivity.borrow());
//!     }
//! }
//! ```

mod backoff;
mod client;
mod config;
mod dispatch;
mod driver;
pub mod endpoint;
mod error;
mod history;
mod lifecycle;
mod metrics;
pub mod protocol;
mod registry;
pub mod runtime;
pub mod testing;

pub use backoff::Backoff;
pub use client::{LiveClient, LiveHandle, Subscription};
pub use config::{LiveConfig, ReconnectConfig};
pub use dispatch::Delivery;
pub use driver::{Clock, ConnectionState, Driver, Event, SocketId, TimerId, Transport};
pub use endpoint::{LIVE_PATH, PageOrigin, live_endpoint};
pub use error::{EndpointError, ProtocolError, TransportError};
pub use history::{History, HistoryEntry};
pub use lifecycle::RefCount;
pub use metrics::{LiveMetrics, LiveMetricsSnapshot};
pub use protocol::{Action, ControlFrame, DataFrame};
pub use registry::{Handler, HandlerId, RegisteredHandler, TopicRegistry};
