//! Topic subscriptions keyed by the envelope `type`.
//!
//! Handlers for a topic are called in registration order with the frame's
//! payload. Handlers for other topics never see it.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use scc::hash_map::Entry;
use serde_json::Value;

/// Callback invoked with the payload of every frame on its topic.
pub type MessageHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    next_id: AtomicU64,
    topics: scc::HashMap<String, Vec<(u64, MessageHandler)>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn add(&self, topic: &str, handler: MessageHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.topics.entry_sync(topic.to_string()) {
            Entry::Occupied(mut entry) => entry.get_mut().push((id, handler)),
            Entry::Vacant(entry) => {
                entry.insert_entry(vec![(id, handler)]);
            }
        }
        id
    }

    /// Remove one handler. Returns `true` if it was registered.
    ///
    /// The topic entry is dropped in the same locked step once its last
    /// handler is gone, so a concurrent `add` is never discarded.
    fn remove(&self, topic: &str, id: u64) -> bool {
        let mut removed = false;
        self.topics.remove_if_sync(topic, |handlers| {
            let before = handlers.len();
            handlers.retain(|(handler_id, _)| *handler_id != id);
            removed = handlers.len() != before;
            handlers.is_empty()
        });
        removed
    }

    /// Invoke every handler registered for `topic`. Returns how many ran.
    pub(crate) fn dispatch(&self, topic: &str, payload: &Value) -> usize {
        // Snapshot the handlers so none runs while the map entry is locked.
        let handlers: Vec<MessageHandler> = self
            .topics
            .update_sync(topic, |_, handlers| {
                handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
            })
            .unwrap_or_default();

        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    pub(crate) fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .update_sync(topic, |_, handlers| handlers.len())
            .unwrap_or(0)
    }

    pub(crate) fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

/// Registers `handler` on `topic` and returns the guard that owns it.
pub(crate) fn subscribe(
    registry: &Arc<SubscriptionRegistry>,
    topic: impl Into<String>,
    handler: MessageHandler,
) -> Subscription {
    let topic = topic.into();
    let id = registry.add(&topic, handler);
    tracing::debug!(topic = %topic, id, "Subscribed");
    Subscription {
        registry: Arc::clone(registry),
        topic,
        id,
        active: true,
    }
}

/// Handle to a registered handler.
///
/// Dropping the guard unsubscribes. Use [`Subscription::detach`] to keep the
/// handler for the lifetime of the session.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    registry: Arc<SubscriptionRegistry>,
    topic: String,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop delivery to this handler.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the handler registered after the guard is gone.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn release(&mut self) {
        if self.active {
            self.active = false;
            if self.registry.remove(&self.topic, self.id) {
                tracing::debug!(topic = %self.topic, id = self.id, "Unsubscribed");
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> MessageHandler {
        let log = Arc::clone(log);
        Arc::new(move |payload: &Value| log.lock().push(format!("{tag}:{payload}")))
    }

    #[test]
    fn test_dispatch_only_to_matching_topic() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = subscribe(&registry, "agent_update", recorder(&log, "a"));
        let _b = subscribe(&registry, "chat", recorder(&log, "b"));

        assert_eq!(registry.dispatch("agent_update", &json!(1)), 1);
        assert_eq!(registry.dispatch("unknown", &json!(2)), 0);
        assert_eq!(*log.lock(), vec!["a:1".to_string()]);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let _first = subscribe(&registry, "t", recorder(&log, "first"));
        let _second = subscribe(&registry, "t", recorder(&log, "second"));

        registry.dispatch("t", &json!(0));
        assert_eq!(*log.lock(), vec!["first:0", "second:0"]);
    }

    #[test]
    fn test_unsubscribe_and_drop() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let kept = subscribe(&registry, "t", recorder(&log, "kept"));
        let dropped = subscribe(&registry, "t", recorder(&log, "dropped"));
        assert_eq!(registry.subscriber_count("t"), 2);

        drop(dropped);
        registry.dispatch("t", &json!(1));
        assert_eq!(*log.lock(), vec!["kept:1"]);

        kept.unsubscribe();
        assert_eq!(registry.subscriber_count("t"), 0);
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_detach_keeps_handler() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        subscribe(&registry, "t", recorder(&log, "x")).detach();
        assert_eq!(registry.dispatch("t", &json!(null)), 1);
    }

    #[test]
    fn test_resubscribe_races_last_unsubscribe() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        for round in 0..500 {
            let last = subscribe(&registry, "t", recorder(&log, "old"));
            let barrier = std::sync::Barrier::new(2);

            let fresh = std::thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    drop(last);
                });
                let fresh = scope.spawn(|| {
                    barrier.wait();
                    subscribe(&registry, "t", recorder(&log, "new"))
                });
                fresh.join().unwrap()
            });

            assert_eq!(registry.subscriber_count("t"), 1, "round {round}");
            log.lock().clear();
            assert_eq!(registry.dispatch("t", &json!(round)), 1);
            assert_eq!(*log.lock(), vec![format!("new:{round}")]);
            fresh.unsubscribe();
            assert_eq!(registry.topic_count(), 0);
        }
    }
}
