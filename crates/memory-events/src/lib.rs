//! # memory-events
//!
//! Event fan-out for memory-mesh.
//!
//! Mutations publish `MemoryEvent`s to subscribers through a `Publisher`
//! trait, so the transport (in-process channel, message queue, broker)
//! is swappable without touching component logic. The in-process bus
//! delivers at-least-once per active subscriber, preserves publish order
//! per subscriber, and never blocks a writer past a bounded timeout:
//! a full or stalled subscriber loses the event and a counter records
//! the drop.

pub mod bus;
pub mod metrics;
pub mod publisher;

pub use bus::{InProcessBus, Subscription, SubscriptionHandle};
pub use metrics::{DeliveryMetrics, DeliveryMetricsSnapshot};
pub use publisher::Publisher;
