//! In-process event transport.
//!
//! One bounded mpsc channel per subscriber: channel order gives FIFO
//! per subscriber, and a bounded send keeps a slow consumer from ever
//! stalling the write path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use memory_types::{MemoryEvent, PublisherConfig};

use crate::metrics::DeliveryMetrics;
use crate::publisher::Publisher;

/// Identifies one subscription for unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: u64,
    pub agent_id: String,
}

/// A live subscription: the handle plus the receiving end of the
/// subscriber's channel.
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub receiver: mpsc::Receiver<MemoryEvent>,
}

struct SubscriberChannel {
    agent_id: String,
    tx: mpsc::Sender<MemoryEvent>,
}

/// In-process publisher backed by per-subscriber bounded channels.
pub struct InProcessBus {
    config: PublisherConfig,
    subscribers: RwLock<HashMap<u64, SubscriberChannel>>,
    next_handle: AtomicU64,
    metrics: Arc<DeliveryMetrics>,
}

impl InProcessBus {
    pub fn new(config: PublisherConfig) -> Self {
        Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(0),
            metrics: Arc::new(DeliveryMetrics::new()),
        }
    }

    /// Get metrics for this bus.
    pub fn metrics(&self) -> Arc<DeliveryMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Register a subscriber for `agent_id`.
    ///
    /// The returned receiver sees every event published after this call,
    /// in publish order, minus any dropped while its channel was full.
    pub fn subscribe(&self, agent_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);

        self.subscribers.write().unwrap().insert(
            id,
            SubscriberChannel {
                agent_id: agent_id.to_string(),
                tx,
            },
        );

        debug!(agent_id, handle = id, "Subscriber registered");
        Subscription {
            handle: SubscriptionHandle {
                id,
                agent_id: agent_id.to_string(),
            },
            receiver: rx,
        }
    }

    /// Remove a subscription. Returns false if the handle was already
    /// gone (idempotent).
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self.subscribers.write().unwrap().remove(&handle.id);
        if removed.is_some() {
            debug!(agent_id = %handle.agent_id, handle = handle.id, "Subscriber removed");
        }
        removed.is_some()
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }
}

#[async_trait]
impl Publisher for InProcessBus {
    async fn publish(&self, event: MemoryEvent) {
        self.metrics.published.fetch_add(1, Ordering::Relaxed);

        // Snapshot senders so publish never holds the registry lock
        // across an await.
        let targets: Vec<(u64, String, mpsc::Sender<MemoryEvent>)> = {
            let subscribers = self.subscribers.read().unwrap();
            subscribers
                .iter()
                .map(|(id, s)| (*id, s.agent_id.clone(), s.tx.clone()))
                .collect()
        };

        let send_budget = Duration::from_millis(self.config.publish_timeout_ms);
        let mut closed = Vec::new();

        for (id, agent_id, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => {
                    self.metrics.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Full(ev)) => {
                    // One bounded wait for a slow consumer, then drop.
                    match timeout(send_budget, tx.send(ev)).await {
                        Ok(Ok(())) => {
                            self.metrics.delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Err(_)) => {
                            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                            closed.push(id);
                        }
                        Err(_) => {
                            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                agent_id = %agent_id,
                                event_id = %event.event_id,
                                timeout_ms = self.config.publish_timeout_ms,
                                "Subscriber channel full, event dropped"
                            );
                        }
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                    closed.push(id);
                }
            }
        }

        // Prune subscribers whose receiver is gone.
        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().unwrap();
            for id in closed {
                if subscribers.remove(&id).is_some() {
                    debug!(handle = id, "Pruned closed subscriber");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use memory_types::MemoryEventType;
    use std::time::Instant;

    fn test_event(n: u64) -> MemoryEvent {
        MemoryEvent::new(
            ulid::Ulid::new().to_string(),
            MemoryEventType::Added,
            format!("mem-{}", n),
            "claude".to_string(),
            Utc::now(),
            None,
        )
    }

    fn test_config() -> PublisherConfig {
        PublisherConfig {
            channel_capacity: 4,
            publish_timeout_ms: 10,
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_publish_order() {
        let bus = InProcessBus::new(test_config());
        let mut sub = bus.subscribe("claude");

        for n in 0..3 {
            bus.publish(test_event(n)).await;
        }

        for n in 0..3 {
            let event = sub.receiver.recv().await.unwrap();
            assert_eq!(event.memory_id, format!("mem-{}", n));
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_a_copy() {
        let bus = InProcessBus::new(test_config());
        let mut a = bus.subscribe("claude");
        let mut b = bus.subscribe("copilot");

        bus.publish(test_event(0)).await;

        assert_eq!(a.receiver.recv().await.unwrap().memory_id, "mem-0");
        assert_eq!(b.receiver.recv().await.unwrap().memory_id, "mem-0");
    }

    #[tokio::test]
    async fn test_stalled_subscriber_does_not_block_publisher() {
        let bus = InProcessBus::new(test_config());
        // Subscription is held but never drained.
        let _stalled = bus.subscribe("stalled");

        let start = Instant::now();
        for n in 0..50 {
            bus.publish(test_event(n)).await;
        }
        let elapsed = start.elapsed();

        // Capacity 4 absorbs the first events; the rest each cost at most
        // one publish timeout.
        assert!(
            elapsed < Duration::from_millis(50 * 10 + 500),
            "publishing took {:?}",
            elapsed
        );

        let metrics = bus.metrics().snapshot();
        assert_eq!(metrics.published, 50);
        assert_eq!(metrics.delivered, 4);
        assert_eq!(metrics.dropped, 46);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = InProcessBus::new(test_config());
        let sub = bus.subscribe("claude");

        assert_eq!(bus.subscriber_count(), 1);
        assert!(bus.unsubscribe(&sub.handle));
        assert!(!bus.unsubscribe(&sub.handle));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let bus = InProcessBus::new(test_config());
        let sub = bus.subscribe("claude");
        drop(sub.receiver);

        bus.publish(test_event(0)).await;
        assert_eq!(bus.subscriber_count(), 0);

        let metrics = bus.metrics().snapshot();
        assert_eq!(metrics.dropped, 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_agent_stops_receiving() {
        let bus = InProcessBus::new(test_config());
        let mut sub = bus.subscribe("claude");

        bus.publish(test_event(0)).await;
        assert!(sub.receiver.recv().await.is_some());

        bus.unsubscribe(&sub.handle);
        bus.publish(test_event(1)).await;

        // Channel closes once the sender side is dropped from the registry.
        assert!(sub.receiver.recv().await.is_none());
    }
}
