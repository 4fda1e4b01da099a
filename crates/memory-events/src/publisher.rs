//! Publisher trait.

use async_trait::async_trait;

use memory_types::MemoryEvent;

/// Fan-out side of the event pipeline.
///
/// Delivery is best-effort relative to the authoritative storage write,
/// which has already committed by the time publish is called: failures
/// are logged and counted, never surfaced to the mutation caller.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deliver `event` to every active subscriber, bounded per
    /// subscriber by the transport's publish timeout.
    async fn publish(&self, event: MemoryEvent);
}
