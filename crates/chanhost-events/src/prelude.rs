//! Prelude module - commonly used types for convenient import.

pub use crate::{
    Event, EventBus, EventMetadata, EventReceiver, EventSubscriber, SubscriberId,
    SubscriberRegistry,
};
