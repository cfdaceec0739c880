//! Topic → handler registry.
//!
//! The registry is the only thing that decides when a topic becomes active or
//! inactive, which is what keeps subscribe/unsubscribe traffic on the wire
//! free of duplicates.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

/// Callback invoked with the payload of each frame on a subscribed topic.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identity of one registered handler (one per `subscribe` call).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct HandlerId(pub u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// A handler as handed out for dispatch. Stops answering once its
/// registration is removed, even if a copy is still in flight.
#[derive(Clone)]
pub struct RegisteredHandler {
    id: HandlerId,
    handler: Handler,
    live: Arc<AtomicBool>,
}

impl RegisteredHandler {
    fn new(id: HandlerId, handler: Handler) -> Self {
        Self {
            id,
            handler,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Invoke the handler unless it has been removed. Returns whether it ran.
    pub fn call(&self, payload: &Value) -> bool {
        if !self.is_live() {
            return false;
        }
        (self.handler)(payload);
        true
    }

    fn retire(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}

#[derive(Default)]
pub struct TopicRegistry {
    // Vec keeps registration order for dispatch
    topics: BTreeMap<String, Vec<RegisteredHandler>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Returns `true` when the topic went from no
    /// handlers to one (the caller owes the server a `subscribe`).
    pub fn insert(&mut self, topic: &str, id: HandlerId, handler: Handler) -> bool {
        let created = !self.topics.contains_key(topic);
        let handlers = self.topics.entry(topic.to_string()).or_default();
        if !handlers.iter().any(|existing| existing.id == id) {
            handlers.push(RegisteredHandler::new(id, handler));
        }
        created
    }

    /// Remove a handler. Returns `true` when that emptied the topic (the
    /// caller owes the server an `unsubscribe`). Unknown ids are a no-op.
    ///
    /// Copies of the handler already taken for dispatch are retired too;
    /// any that have not run yet skip it.
    pub fn remove(&mut self, topic: &str, id: HandlerId) -> bool {
        let Some(handlers) = self.topics.get_mut(topic) else {
            return false;
        };
        let Some(pos) = handlers.iter().position(|existing| existing.id == id) else {
            return false;
        };
        handlers.remove(pos).retire();
        if handlers.is_empty() {
            self.topics.remove(topic);
            return true;
        }
        false
    }

    /// Handlers for a topic in registration order.
    pub fn handlers(&self, topic: &str) -> Vec<RegisteredHandler> {
        self.topics.get(topic).cloned().unwrap_or_default()
    }

    /// Topics holding at least one handler.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl std::fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.topics.iter().map(|(t, h)| (t, h.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Handler {
        Arc::new(|_: &Value| {})
    }

    #[test]
    fn first_handler_activates_topic() {
        let mut r = TopicRegistry::new();
        assert!(r.insert("tasks", HandlerId(1), noop()));
        assert!(!r.insert("tasks", HandlerId(2), noop()));
        assert_eq!(r.handler_count("tasks"), 2);
    }

    #[test]
    fn same_id_registered_once() {
        let mut r = TopicRegistry::new();
        r.insert("tasks", HandlerId(1), noop());
        r.insert("tasks", HandlerId(1), noop());
        assert_eq!(r.handler_count("tasks"), 1);
    }

    #[test]
    fn last_handler_deactivates_topic() {
        let mut r = TopicRegistry::new();
        r.insert("tasks", HandlerId(1), noop());
        r.insert("tasks", HandlerId(2), noop());

        assert!(!r.remove("tasks", HandlerId(1)));
        assert!(r.contains("tasks"));
        assert!(r.remove("tasks", HandlerId(2)));
        assert!(!r.contains("tasks"));
        assert!(r.is_empty());
    }

    #[test]
    fn removing_unknown_is_noop() {
        let mut r = TopicRegistry::new();
        assert!(!r.remove("tasks", HandlerId(1)));

        r.insert("tasks", HandlerId(1), noop());
        assert!(!r.remove("tasks", HandlerId(9)));
        assert!(!r.remove("agents", HandlerId(1)));
        assert!(r.remove("tasks", HandlerId(1)));
        // Second removal of the same id does nothing
        assert!(!r.remove("tasks", HandlerId(1)));
    }

    #[test]
    fn removed_handler_copy_stops_answering() {
        let mut r = TopicRegistry::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        r.insert(
            "tasks",
            HandlerId(1),
            Arc::new(move |_: &Value| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let taken = r.handlers("tasks");
        assert!(taken[0].call(&Value::Null));
        r.remove("tasks", HandlerId(1));

        assert!(!taken[0].is_live());
        assert!(!taken[0].call(&Value::Null));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn topics_lists_active_only() {
        let mut r = TopicRegistry::new();
        r.insert("tasks", HandlerId(1), noop());
        r.insert("agents", HandlerId(2), noop());
        r.remove("tasks", HandlerId(1));
        assert_eq!(r.topics().collect::<Vec<_>>(), vec!["agents"]);
    }
}
