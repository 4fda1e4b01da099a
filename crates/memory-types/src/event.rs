//! Memory event type.
//!
//! Events are immutable facts describing accepted mutations. They are
//! created by the publisher after the authoritative storage write has
//! committed and consumed by zero or more subscribers; they are never
//! mutated after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::Memory;

/// Kind of mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryEventType {
    /// A new memory was accepted
    Added,
    /// Content or metadata changed
    Updated,
    /// The memory was removed
    Deleted,
    /// A near-duplicate was folded into this memory
    Merged,
    /// Content was replaced by a summary
    Summarized,
}

impl std::fmt::Display for MemoryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryEventType::Added => write!(f, "added"),
            MemoryEventType::Updated => write!(f, "updated"),
            MemoryEventType::Deleted => write!(f, "deleted"),
            MemoryEventType::Merged => write!(f, "merged"),
            MemoryEventType::Summarized => write!(f, "summarized"),
        }
    }
}

/// An immutable record of an accepted mutation.
///
/// `snapshot` carries the post-mutation state of the memory (`None` after
/// a delete) so subscribers can evaluate visibility without a storage
/// read. Event ids are ULIDs; their lexicographic order is used as the
/// deterministic tie-break for equal timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEvent {
    /// Unique identifier (ULID string)
    pub event_id: String,

    /// Kind of mutation
    pub event_type: MemoryEventType,

    /// Memory the mutation applied to
    pub memory_id: String,

    /// Agent that performed the mutation
    pub agent_id: String,

    /// When the mutation committed
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Post-mutation state; `None` after a delete
    #[serde(default)]
    pub snapshot: Option<Memory>,
}

impl MemoryEvent {
    pub fn new(
        event_id: String,
        event_type: MemoryEventType,
        memory_id: String,
        agent_id: String,
        timestamp: DateTime<Utc>,
        snapshot: Option<Memory>,
    ) -> Self {
        Self {
            event_id,
            event_type,
            memory_id,
            agent_id,
            timestamp,
            snapshot,
        }
    }

    /// Timestamp as milliseconds since the Unix epoch
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Ordering key for last-write-wins reconciliation: later timestamps
    /// win; equal timestamps fall back to the larger event id.
    pub fn ordering_key(&self) -> (i64, &str) {
        (self.timestamp_ms(), self.event_id.as_str())
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
