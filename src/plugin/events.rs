//! Lifecycle event bus.
//!
//! Dispatch is synchronous and runs handlers in subscription order. A
//! handler that panics is logged and skipped; the remaining handlers still
//! see the event.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::PluginStatus;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginEventKind {
    Loaded,
    Activated,
    Deactivated,
    Unloaded,
    /// A lifecycle hook failed and the plugin moved to `error`.
    Error,
    Enabled,
    Disabled,
}

impl PluginEventKind {
    /// Short name, e.g. `loaded`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Activated => "activated",
            Self::Deactivated => "deactivated",
            Self::Unloaded => "unloaded",
            Self::Error => "error",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for PluginEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin:{}", self.as_str())
    }
}

/// A published lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct PluginEvent {
    pub kind: PluginEventKind,
    pub plugin_id: String,
    pub version: String,
    /// Plugin status after the transition.
    pub status: PluginStatus,
    /// Failure message for [`PluginEventKind::Error`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PluginEvent {
    pub fn new(kind: PluginEventKind, plugin_id: &str, version: &str, status: PluginStatus) -> Self {
        Self {
            kind,
            plugin_id: plugin_id.to_string(),
            version: version.to_string(),
            status,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

type Handler = Arc<dyn Fn(&PluginEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: Option<PluginEventKind>,
    handler: Handler,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    list: Vec<Subscriber>,
}

/// Synchronous publish/subscribe bus for [`PluginEvent`]s.
///
/// Cloning yields another handle to the same subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Subscribers>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").field("subscribers", &self.subscriber_count()).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&PluginEvent) + Send + Sync + 'static,
    {
        self.add(None, Arc::new(handler))
    }

    /// Receive events of one kind.
    pub fn subscribe_to<F>(&self, kind: PluginEventKind, handler: F) -> Subscription
    where
        F: Fn(&PluginEvent) + Send + Sync + 'static,
    {
        self.add(Some(kind), Arc::new(handler))
    }

    fn add(&self, filter: Option<PluginEventKind>, handler: Handler) -> Subscription {
        let mut subscribers = self.subscribers.write();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.list.push(Subscriber { id, filter, handler });
        Subscription { id, subscribers: Arc::downgrade(&self.subscribers) }
    }

    /// Deliver an event to matching subscribers.
    ///
    /// Handlers run outside the lock, so a handler may subscribe or
    /// unsubscribe without deadlocking.
    pub fn emit(&self, event: &PluginEvent) {
        let handlers: Vec<Handler> = self
            .subscribers
            .read()
            .list
            .iter()
            .filter(|s| s.filter.map_or(true, |kind| kind == event.kind))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        tracing::trace!(event = %event.kind, plugin = %event.plugin_id, handlers = handlers.len(), "Emitting event");

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(
                    event = %event.kind,
                    plugin = %event.plugin_id,
                    "Event subscriber panicked"
                );
            }
        }
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.subscribers.write().list.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().list.len()
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle keeps the subscription alive; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    subscribers: Weak<RwLock<Subscribers>>,
}

impl Subscription {
    /// Remove the subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(subscribers) = self.subscribers.upgrade() else {
            return false;
        };
        let mut subscribers = subscribers.write();
        let before = subscribers.list.len();
        subscribers.list.retain(|s| s.id != self.id);
        subscribers.list.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn event(kind: PluginEventKind) -> PluginEvent {
        PluginEvent::new(kind, "md", "1.0.0", PluginStatus::Loaded)
    }

    #[test]
    fn test_event_names() {
        assert_eq!(PluginEventKind::Loaded.to_string(), "plugin:loaded");
        assert_eq!(PluginEventKind::Deactivated.to_string(), "plugin:deactivated");
        assert_eq!(PluginEventKind::Error.as_str(), "error");
    }

    #[test]
    fn test_dispatch_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |_| seen.lock().push(tag));
        }

        bus.emit(&event(PluginEventKind::Loaded));
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_filtered_subscription() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe_to(PluginEventKind::Activated, move |e| sink.lock().push(e.kind));

        bus.emit(&event(PluginEventKind::Loaded));
        bus.emit(&event(PluginEventKind::Activated));
        assert_eq!(*seen.lock(), vec![PluginEventKind::Activated]);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0));

        bus.subscribe(|_| panic!("subscriber bug"));
        let counter = Arc::clone(&seen);
        bus.subscribe(move |_| *counter.lock() += 1);

        bus.emit(&event(PluginEventKind::Loaded));
        bus.emit(&event(PluginEventKind::Unloaded));
        assert_eq!(*seen.lock(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let subscription = bus.subscribe(move |_| *counter.lock() += 1);

        bus.emit(&event(PluginEventKind::Loaded));
        assert!(subscription.unsubscribe());
        bus.emit(&event(PluginEventKind::Loaded));

        assert_eq!(*seen.lock(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_handler_may_subscribe_during_dispatch() {
        let bus = EventBus::new();
        let inner = bus.clone();
        bus.subscribe(move |_| {
            inner.subscribe(|_| {});
        });

        bus.emit(&event(PluginEventKind::Loaded));
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_clear() {
        let bus = EventBus::new();
        let subscription = bus.subscribe(|_| {});
        bus.clear();
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!subscription.unsubscribe());
    }
}
