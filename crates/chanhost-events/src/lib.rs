//! Chanhost Events - notification bus for registry changes.
//!
//! This crate provides:
//! - The [`Event`] trait implemented by notification types
//! - Broadcast-based [`EventBus`] for async subscribers
//! - [`SubscriberRegistry`] for synchronous handlers
//!
//! The bus is generic so that the event type can carry domain objects
//! (for example live capability bundles) without this crate knowing
//! about them.
//!
//! # Example
//!
//! ```rust
//! use chanhost_events::{Event, EventBus};
//!
//! #[derive(Debug)]
//! struct Ping;
//!
//! impl Event for Ping {
//!     fn event_type(&self) -> &'static str {
//!         "ping"
//!     }
//! }
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//! bus.publish(Ping);
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_type(), "ping");
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod event;
mod subscriber;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use event::{Event, EventMetadata};
pub use subscriber::{EventSubscriber, FnSubscriber, SubscriberId, SubscriberRegistry};
