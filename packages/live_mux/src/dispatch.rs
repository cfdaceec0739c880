//! Inbound frame dispatch.
//!
//! Parsing, history recording and handler lookup happen while the driver is
//! locked; the handlers themselves run afterwards through [`Delivery`], so a
//! handler is free to subscribe or unsubscribe from inside its callback.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::history::History;
use crate::metrics::LiveMetrics;
use crate::protocol::parse_data_frame;
use crate::registry::{RegisteredHandler, TopicRegistry};

/// A parsed frame paired with the handlers that should see it.
pub struct Delivery {
    topic: String,
    payload: Value,
    handlers: Vec<RegisteredHandler>,
    metrics: Arc<LiveMetrics>,
}

impl Delivery {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Invoke every handler in registration order. Handlers unsubscribed
    /// since the frame was prepared (including by an earlier handler for
    /// this same frame) are skipped. A panicking handler is logged and
    /// skipped; the rest still run. Returns how many completed.
    pub fn deliver(self) -> usize {
        let mut completed = 0;
        for handler in &self.handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.call(&self.payload))) {
                Ok(true) => completed += 1,
                Ok(false) => {
                    debug!(topic = %self.topic, handler = %handler.id(), "skipping unsubscribed handler");
                }
                Err(panic) => {
                    self.metrics.handler_panicked();
                    warn!(
                        topic = %self.topic,
                        reason = panic_message(&*panic),
                        "live handler panicked"
                    );
                }
            }
        }
        completed
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("payload", &self.payload)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Turn one inbound text frame into a delivery.
///
/// Malformed frames are dropped and yield `None`. Every parsed frame is
/// recorded in `history`, subscribed or not; `None` is also returned when no
/// handler is registered for its topic.
pub(crate) fn prepare(
    text: &str,
    registry: &TopicRegistry,
    history: &mut History,
    metrics: &Arc<LiveMetrics>,
) -> Option<Delivery> {
    let frame = match parse_data_frame(text) {
        Ok(frame) => frame,
        Err(e) => {
            metrics.frame_dropped();
            debug!(error = %e, "dropping malformed live frame");
            return None;
        }
    };
    metrics.frame_received();

    let handlers = registry.handlers(&frame.topic);
    history.push(frame.clone());
    if handlers.is_empty() {
        return None;
    }

    Some(Delivery {
        topic: frame.topic,
        payload: frame.data,
        handlers,
        metrics: metrics.clone(),
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Handler, HandlerId};
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Handler {
        let log = log.clone();
        Arc::new(move |data: &Value| log.lock().unwrap().push(format!("{name}:{data}")))
    }

    fn exploding(_: &Value) {
        panic!("boom");
    }

    #[test]
    fn delivers_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TopicRegistry::new();
        registry.insert("tasks", HandlerId(1), recorder(&log, "a"));
        registry.insert("tasks", HandlerId(2), recorder(&log, "b"));
        let mut history = History::default();
        let metrics = Arc::new(LiveMetrics::new());

        let delivery = prepare(
            r#"{"topic":"tasks","data":{"id":1}}"#,
            &registry,
            &mut history,
            &metrics,
        )
        .unwrap();
        assert_eq!(delivery.handler_count(), 2);
        assert_eq!(delivery.deliver(), 2);

        assert_eq!(
            *log.lock().unwrap(),
            vec![r#"a:{"id":1}"#.to_string(), r#"b:{"id":1}"#.to_string()]
        );
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn unsubscribed_topic_still_recorded() {
        let registry = TopicRegistry::new();
        let mut history = History::default();
        let metrics = Arc::new(LiveMetrics::new());

        let delivery = prepare(r#"{"topic":"agents","data":{}}"#, &registry, &mut history, &metrics);
        assert!(delivery.is_none());
        assert_eq!(history.latest().unwrap().frame.topic, "agents");
        assert_eq!(metrics.snapshot().frames_received, 1);
    }

    #[test]
    fn malformed_frame_dropped() {
        let registry = TopicRegistry::new();
        let mut history = History::default();
        let metrics = Arc::new(LiveMetrics::new());

        assert!(prepare("{nope", &registry, &mut history, &metrics).is_none());
        assert!(history.is_empty());
        assert_eq!(metrics.snapshot().frames_dropped, 1);
    }

    #[test]
    fn handler_removed_after_prepare_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TopicRegistry::new();
        registry.insert("tasks", HandlerId(1), recorder(&log, "a"));
        registry.insert("tasks", HandlerId(2), recorder(&log, "b"));
        let mut history = History::default();
        let metrics = Arc::new(LiveMetrics::new());

        let delivery = prepare(r#"{"topic":"tasks","data":1}"#, &registry, &mut history, &metrics)
            .unwrap();
        registry.remove("tasks", HandlerId(2));

        assert_eq!(delivery.deliver(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["a:1".to_string()]);
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TopicRegistry::new();
        registry.insert("tasks", HandlerId(1), Arc::new(exploding));
        registry.insert("tasks", HandlerId(2), recorder(&log, "ok"));
        let mut history = History::default();
        let metrics = Arc::new(LiveMetrics::new());

        let delivery = prepare(r#"{"topic":"tasks","data":2}"#, &registry, &mut history, &metrics)
            .unwrap();
        assert_eq!(delivery.deliver(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["ok:2".to_string()]);
        assert_eq!(metrics.snapshot().handler_panics, 1);

        // Later frames still flow
        let delivery = prepare(r#"{"topic":"tasks","data":3}"#, &registry, &mut history, &metrics)
            .unwrap();
        delivery.deliver();
        assert_eq!(log.lock().unwrap().len(), 2);
    }
}
