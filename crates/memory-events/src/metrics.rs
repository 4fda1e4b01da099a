//! Delivery metrics for the event pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for publish/delivery outcomes.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    /// Events handed to publish()
    pub published: AtomicU64,
    /// Successful per-subscriber deliveries
    pub delivered: AtomicU64,
    /// Per-subscriber drops (full or stalled channel)
    pub dropped: AtomicU64,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all counts as a snapshot.
    pub fn snapshot(&self) -> DeliveryMetricsSnapshot {
        DeliveryMetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of delivery metrics.
#[derive(Debug, Clone)]
pub struct DeliveryMetricsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
}

impl DeliveryMetricsSnapshot {
    /// Delivery attempts (successes plus drops).
    pub fn total_attempts(&self) -> u64 {
        self.delivered + self.dropped
    }
}
