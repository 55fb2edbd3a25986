//! Event bus for broadcasting events to subscribers.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::event::Event;
use crate::subscriber::SubscriberRegistry;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Event bus for broadcasting events to all subscribers.
///
/// Async receivers get events through a broadcast channel; synchronous
/// subscribers are called inline from [`EventBus::publish`], after the
/// broadcast. Clones share the channel and the subscriber registry.
pub struct EventBus<E: Event> {
    sender: broadcast::Sender<Arc<E>>,
    registry: Arc<SubscriberRegistry<E>>,
    capacity: usize,
}

impl<E: Event> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("receivers", &self.sender.receiver_count())
            .field("registry", &self.registry)
            .finish()
    }
}

impl<E: Event> EventBus<E> {
    /// Create a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified capacity.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            registry: Arc::new(SubscriberRegistry::new()),
            capacity,
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of async receivers that received the event.
    pub fn publish(&self, event: E) -> usize {
        let event = Arc::new(event);

        trace!(event_type = %event.event_type(), "Publishing event");

        let count = if let Ok(c) = self.sender.send(Arc::clone(&event)) {
            debug!(
                event_type = %event.event_type(),
                receiver_count = c,
                "Event published"
            );
            c
        } else {
            trace!(event_type = %event.event_type(), "No receivers for event");
            0
        };

        self.registry.notify(&event);

        count
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver<E> {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Get the synchronous subscriber registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriberRegistry<E> {
        &self.registry
    }

    /// Get the current number of subscribers (async and synchronous).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .receiver_count()
            .saturating_add(self.registry.len())
    }

    /// Get the channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            registry: Arc::clone(&self.registry),
            capacity: self.capacity,
        }
    }
}

/// Receiver for events from the event bus.
pub struct EventReceiver<E: Event> {
    receiver: broadcast::Receiver<Arc<E>>,
}

impl<E: Event> std::fmt::Debug for EventReceiver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReceiver")
            .field("pending", &self.receiver.len())
            .finish()
    }
}

impl<E: Event> EventReceiver<E> {
    /// Receive the next event.
    ///
    /// Lagging receivers skip the dropped events with a warning. Returns
    /// `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Arc<E>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive the next event without blocking.
    pub fn try_recv(&mut self) -> Option<Arc<E>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::FnSubscriber;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq, Eq)]
    struct Note(&'static str);

    impl Event for Note {
        fn event_type(&self) -> &'static str {
            "note"
        }
    }

    #[tokio::test]
    async fn test_event_bus_creation() {
        let bus = EventBus::<Note>::new();
        assert_eq!(bus.capacity(), DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(EventBus::<Note>::with_capacity(0).capacity(), 1);
    }

    #[tokio::test]
    async fn test_publish_and_receive_in_order() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        assert_eq!(bus.publish(Note("first")), 1);
        bus.publish(Note("second"));

        assert_eq!(*receiver.recv().await.unwrap(), Note("first"));
        assert_eq!(*receiver.recv().await.unwrap(), Note("second"));
        assert!(receiver.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_publish_without_receivers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(Note("lost")), 0);
    }

    #[tokio::test]
    async fn test_clone_shares_registry() {
        let bus = EventBus::new();
        let clone = bus.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        clone
            .registry()
            .register(Arc::new(FnSubscriber::new("sync", move |_: &Note| {
                counted.fetch_add(1, Ordering::SeqCst);
            })));

        bus.publish(Note("hello"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_lagged_receiver_skips() {
        let bus = EventBus::with_capacity(2);
        let mut receiver = bus.subscribe();
        bus.publish(Note("a"));
        bus.publish(Note("b"));
        bus.publish(Note("c"));

        assert_eq!(*receiver.recv().await.unwrap(), Note("b"));
        assert_eq!(*receiver.recv().await.unwrap(), Note("c"));
    }

    #[tokio::test]
    async fn test_closed_bus_returns_none() {
        let bus = EventBus::<Note>::new();
        let mut receiver = bus.subscribe();
        drop(bus);
        assert!(receiver.recv().await.is_none());
    }
}
