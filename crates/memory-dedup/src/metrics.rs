//! Metrics for duplicate detection.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the dedup write path.
#[derive(Debug, Default)]
pub struct DedupMetrics {
    pub checked: AtomicU64,
    pub accepted_new: AtomicU64,
    pub accepted_related: AtomicU64,
    pub rejected_duplicate: AtomicU64,
    pub merged: AtomicU64,
}

impl DedupMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all counts as a snapshot.
    pub fn snapshot(&self) -> DedupMetricsSnapshot {
        DedupMetricsSnapshot {
            checked: self.checked.load(Ordering::Relaxed),
            accepted_new: self.accepted_new.load(Ordering::Relaxed),
            accepted_related: self.accepted_related.load(Ordering::Relaxed),
            rejected_duplicate: self.rejected_duplicate.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dedup metrics.
#[derive(Debug, Clone)]
pub struct DedupMetricsSnapshot {
    pub checked: u64,
    pub accepted_new: u64,
    pub accepted_related: u64,
    pub rejected_duplicate: u64,
    pub merged: u64,
}

impl DedupMetricsSnapshot {
    /// Writes that produced a record (new or related).
    pub fn total_stored(&self) -> u64 {
        self.accepted_new + self.accepted_related
    }

    /// Writes folded away (rejected or merged).
    pub fn total_deduplicated(&self) -> u64 {
        self.rejected_duplicate + self.merged
    }
}
