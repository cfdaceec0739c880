use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::{Value, json};

use live_mux::testing::{ManualClock, MemoryTransport};
use live_mux::{
    Action, Backoff, ConnectionState, DataFrame, Driver, Event, HandlerId, History, LiveConfig,
};

// --- Backoff ---

proptest! {
    #[test]
    fn backoff_never_exceeds_max(base_ms in 1u64..5_000, max_ms in 1u64..120_000, attempt in 0u32..200) {
        let backoff = Backoff::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms));
        prop_assert!(backoff.delay(attempt) <= backoff.max());
        prop_assert!(backoff.delay(attempt) >= Duration::from_millis(base_ms).min(backoff.max()));
    }

    #[test]
    fn backoff_is_monotonic(attempt in 0u32..100) {
        let backoff = Backoff::default();
        prop_assert!(backoff.delay(attempt) <= backoff.delay(attempt + 1));
    }
}

// --- History ---

proptest! {
    #[test]
    fn history_is_bounded_and_newest_first(limit in 1usize..20, count in 0usize..60) {
        let mut history = History::new(limit);
        for i in 0..count {
            history.push(DataFrame::new("t", json!(i)));
        }
        let entries = history.entries();
        prop_assert_eq!(entries.len(), count.min(limit));
        for (offset, entry) in entries.iter().enumerate() {
            prop_assert_eq!(&entry.frame.data, &json!(count - 1 - offset));
        }
    }
}

// --- Driver lifecycle ---

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    Release,
    Open,
    Close,
    Error,
    FireTimer,
    Subscribe(usize),
    Unsubscribe(usize),
}

const TOPICS: [&str; 3] = ["tasks", "agents", "memory"];

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Acquire),
        Just(Op::Release),
        Just(Op::Open),
        Just(Op::Close),
        Just(Op::Error),
        Just(Op::FireTimer),
        (0..TOPICS.len()).prop_map(Op::Subscribe),
        (0..TOPICS.len()).prop_map(Op::Unsubscribe),
    ]
}

fn noop(_: &Value) {}

proptest! {
    #[test]
    fn driver_invariants_hold(ops in prop::collection::vec(arb_op(), 1..80)) {
        let transport = MemoryTransport::new();
        let clock = ManualClock::new();
        let mut driver = Driver::new(
            &LiveConfig::default(),
            "ws://localhost:5055/ws/live",
            Box::new(transport.clone()),
            Box::new(clock.clone()),
        );
        let mut consumers = 0usize;
        let mut handlers: HashMap<&str, Vec<HandlerId>> = HashMap::new();

        for op in ops {
            match op {
                Op::Acquire => {
                    consumers += 1;
                    driver.acquire();
                }
                Op::Release => {
                    consumers = consumers.saturating_sub(1);
                    driver.release();
                }
                Op::Open => {
                    if let Some(id) = transport.last_opened() {
                        driver.handle(Event::Opened(id));
                    }
                }
                Op::Close => {
                    if let Some(id) = transport.last_opened() {
                        driver.handle(Event::Closed(id));
                    }
                }
                Op::Error => {
                    if let Some(id) = transport.last_opened() {
                        driver.handle(Event::Errored(id));
                    }
                }
                Op::FireTimer => {
                    if let Some(id) = clock.fire_next() {
                        driver.handle(Event::TimerFired(id));
                    }
                }
                Op::Subscribe(i) => {
                    let id = driver.add_handler(TOPICS[i], Arc::new(noop));
                    handlers.entry(TOPICS[i]).or_default().push(id);
                }
                Op::Unsubscribe(i) => {
                    if let Some(id) = handlers.get_mut(TOPICS[i]).and_then(Vec::pop) {
                        driver.remove_handler(TOPICS[i], id);
                    }
                }
            }

            prop_assert_eq!(driver.consumer_count(), consumers);
            prop_assert!(clock.pending().len() <= 1);

            let live = matches!(driver.state(), ConnectionState::Connecting | ConnectionState::Open);
            if consumers == 0 {
                prop_assert!(!live);
                prop_assert!(!driver.reconnect_pending());
            } else {
                prop_assert!(live || driver.reconnect_pending());
            }

            for topic in TOPICS {
                let registered = handlers.get(topic).map_or(0, Vec::len);
                prop_assert_eq!(driver.registry().handler_count(topic), registered);
            }
        }

        // Per socket, subscribe and unsubscribe for a topic strictly alternate
        for (socket, _) in transport.opened() {
            let mut subscribed: HashMap<String, bool> = HashMap::new();
            for frame in transport.control_frames(socket) {
                let was = subscribed.insert(frame.topic.clone(), frame.action == Action::Subscribe);
                prop_assert_ne!(was, Some(frame.action == Action::Subscribe));
                if was.is_none() {
                    prop_assert_eq!(frame.action, Action::Subscribe);
                }
            }
        }
    }
}
