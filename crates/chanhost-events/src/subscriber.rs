//! Synchronous subscribers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::event::Event;

/// Trait for synchronous event subscribers.
///
/// `on_event` runs on the publishing task, so it should return quickly.
/// Use an [`EventReceiver`](crate::EventReceiver) for heavy work.
pub trait EventSubscriber<E: Event>: Send + Sync {
    /// Called when an event is published.
    fn on_event(&self, event: &E);

    /// Return `true` to receive the event. Accepts everything by default.
    fn accepts(&self, event: &E) -> bool {
        let _ = event;
        true
    }

    /// Optional name for debugging.
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Registration handle for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Registry for managing synchronous event subscribers.
pub struct SubscriberRegistry<E: Event> {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn EventSubscriber<E>>>>,
}

impl<E: Event> std::fmt::Debug for SubscriberRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscriber_count", &self.len())
            .finish()
    }
}

impl<E: Event> Default for SubscriberRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> SubscriberRegistry<E> {
    /// Create a new subscriber registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber.
    ///
    /// Returns a handle that can be used to unregister the subscriber.
    pub fn register(&self, subscriber: Arc<dyn EventSubscriber<E>>) -> SubscriberId {
        let id = SubscriberId::new();
        let name = subscriber.name().to_string();

        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, subscriber);

        debug!(subscriber_name = %name, "Subscriber registered");
        id
    }

    /// Unregister a subscriber.
    ///
    /// Returns `true` if the subscriber was found and removed.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();

        if removed {
            debug!("Subscriber unregistered");
        }
        removed
    }

    /// Notify all subscribers of an event.
    ///
    /// A panicking subscriber is logged and does not affect the others.
    pub fn notify(&self, event: &E) {
        let subs = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        for (id, subscriber) in subs.iter() {
            if !subscriber.accepts(event) {
                continue;
            }
            trace!(
                subscriber_name = %subscriber.name(),
                event_type = %event.event_type(),
                "Notifying subscriber"
            );

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber.on_event(event);
            }));

            if result.is_err() {
                warn!(
                    subscriber_id = ?id,
                    subscriber_name = %subscriber.name(),
                    event_type = %event.event_type(),
                    "Subscriber panicked"
                );
            }
        }
    }

    /// Get the number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A subscriber backed by a closure.
pub struct FnSubscriber<F> {
    name: String,
    handler: F,
}

impl<F> FnSubscriber<F> {
    /// Create a new closure subscriber.
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<E, F> EventSubscriber<E> for FnSubscriber<F>
where
    E: Event,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.handler)(event);
    }

    fn name(&self) -> &str {
        &self.name
    }
}
