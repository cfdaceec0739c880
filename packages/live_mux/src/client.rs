//! Shared live context and the per-consumer facade.
//!
//! One [`LiveClient`] owns the driver, the topic registry and the history
//! buffer for the whole process. Everything that wants live updates takes a
//! [`LiveHandle`] from it; the handle's lifetime is what the connection's
//! lifetime is counted against.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::config::LiveConfig;
use crate::driver::{Clock, ConnectionState, Driver, Event, Transport};
use crate::history::HistoryEntry;
use crate::metrics::LiveMetricsSnapshot;
use crate::registry::HandlerId;
use crate::runtime::{TokioClock, TungsteniteTransport};

struct Shared {
    driver: Mutex<Driver>,
    connected: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Driver> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the driver, then publish connectivity if it changed.
    fn with_driver<R>(&self, f: impl FnOnce(&mut Driver) -> R) -> R {
        let mut driver = self.lock();
        let result = f(&mut driver);
        let now = driver.is_connected();
        self.connected.send_if_modified(|was| {
            if *was == now {
                return false;
            }
            *was = now;
            true
        });
        result
    }

    fn handle_event(&self, event: Event) {
        // Handlers run after the lock is released
        if let Some(delivery) = self.with_driver(|d| d.handle(event)) {
            delivery.deliver();
        }
    }
}

/// Process-wide live connection context. Cheap to clone.
#[derive(Clone)]
pub struct LiveClient {
    shared: Arc<Shared>,
}

impl LiveClient {
    /// Build a client on the Tokio runtime with a real WebSocket transport.
    ///
    /// Nothing connects until the first [`consumer`](Self::consumer) is
    /// taken.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn connect(config: LiveConfig, url: impl Into<String>) -> Self {
        let runtime = tokio::runtime::Handle::current();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let transport = TungsteniteTransport::new(runtime.clone(), events_tx.clone());
        let clock = TokioClock::new(runtime.clone(), events_tx);
        let client = Self::with_parts(&config, url, Box::new(transport), Box::new(clock));

        runtime.spawn(pump(Arc::downgrade(&client.shared), events_rx));
        client
    }

    /// Build a client over any transport and clock. Events those produce
    /// must be fed back through [`handle_event`](Self::handle_event).
    pub fn with_parts(
        config: &LiveConfig,
        url: impl Into<String>,
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                driver: Mutex::new(Driver::new(config, url, transport, clock)),
                connected,
            }),
        }
    }

    /// Acquire a consumer handle. The first live handle opens the
    /// connection; dropping the last one tears it down.
    pub fn consumer(&self) -> LiveHandle {
        self.shared.with_driver(Driver::acquire);
        LiveHandle {
            shared: self.shared.clone(),
        }
    }

    /// Feed a socket or timer event into the driver and run any handlers
    /// it produces.
    pub fn handle_event(&self, event: Event) {
        self.shared.handle_event(event);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().is_connected()
    }

    pub fn reference_count(&self) -> usize {
        self.shared.lock().consumer_count()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.shared.lock().reconnect_pending()
    }

    /// Topics that currently hold at least one handler.
    pub fn active_topics(&self) -> Vec<String> {
        self.shared
            .lock()
            .registry()
            .topics()
            .map(str::to_string)
            .collect()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.shared.lock().history()
    }

    pub fn metrics(&self) -> LiveMetricsSnapshot {
        self.shared.lock().metrics().snapshot()
    }
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LiveClient").field(&*self.shared.lock()).finish()
    }
}

/// Drain transport and timer events into the driver, in arrival order.
async fn pump(shared: Weak<Shared>, mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle_event(event);
    }
    debug!("live event pump stopped");
}

/// Per-consumer view of the shared live connection.
///
/// Holding a handle keeps the connection (and its reconnection) alive.
/// Dropping it, or calling [`dispose`](Self::dispose), releases it exactly
/// once.
pub struct LiveHandle {
    shared: Arc<Shared>,
}

impl LiveHandle {
    /// Register `handler` for frames on `topic`.
    ///
    /// The returned [`Subscription`] removes the handler when dropped or
    /// when [`Subscription::unsubscribe`] is called, whichever comes first.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self
            .shared
            .with_driver(|d| d.add_handler(&topic, Arc::new(handler)));
        Subscription {
            shared: self.shared.clone(),
            topic,
            id,
            active: AtomicBool::new(true),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    /// Watch connectivity changes.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.shared.connected.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state()
    }

    /// Shared history, newest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.shared.lock().history()
    }

    pub fn dispose(self) {
        drop(self);
    }
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        self.shared.with_driver(Driver::release);
    }
}

impl std::fmt::Debug for LiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveHandle")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// A registered topic handler.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    shared: Arc<Shared>,
    topic: String,
    id: HandlerId,
    active: AtomicBool,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the handler. Calling this more than once is harmless.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.shared
                .with_driver(|d| d.remove_handler(&self.topic, self.id));
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
