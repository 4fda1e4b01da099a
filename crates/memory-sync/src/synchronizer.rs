//! Agent state synchronizer.
//!
//! Consumes published events and reconciles each registered agent's view
//! of the affected memory under its current sharing policy. Runs
//! concurrently with unrelated writes and never takes an engine scope
//! lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use memory_events::Subscription;
use memory_types::{MemoryEvent, MemoryEventType};

use crate::registry::AgentRegistry;
use crate::visibility::{ViewState, Visibility};

/// Counters for reconciliation outcomes.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    /// Events consumed
    pub events_processed: AtomicU64,
    /// (agent, memory) views updated
    pub views_updated: AtomicU64,
    /// Events ignored because a newer one was already applied
    pub conflicts_ignored: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            views_updated: self.views_updated.load(Ordering::Relaxed),
            conflicts_ignored: self.conflicts_ignored.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sync metrics.
#[derive(Debug, Clone)]
pub struct SyncMetricsSnapshot {
    pub events_processed: u64,
    pub views_updated: u64,
    pub conflicts_ignored: u64,
}

/// Reconciles per-agent visible state from the event stream.
pub struct AgentStateSynchronizer {
    registry: Arc<AgentRegistry>,
    views: RwLock<HashMap<(String, String), ViewState>>,
    metrics: Arc<SyncMetrics>,
}

impl AgentStateSynchronizer {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            views: RwLock::new(HashMap::new()),
            metrics: Arc::new(SyncMetrics::new()),
        }
    }

    /// Get metrics for this synchronizer.
    pub fn metrics(&self) -> Arc<SyncMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Reconcile every registered agent's view of the event's memory.
    ///
    /// Last-write-wins per (agent, memory): an event whose
    /// (timestamp, event_id) key is not newer than the applied one is
    /// ignored for that pair.
    pub fn on_event(&self, event: &MemoryEvent) {
        self.metrics.events_processed.fetch_add(1, Ordering::Relaxed);

        let (ts, id) = event.ordering_key();
        let agents = self.registry.agent_ids();
        let mut views = self.views.write().unwrap();

        for agent_id in agents {
            let pair = (agent_id.clone(), event.memory_id.clone());
            let view = views.entry(pair).or_default();

            if !view.supersedes((ts, id)) {
                self.metrics.conflicts_ignored.fetch_add(1, Ordering::Relaxed);
                debug!(
                    agent_id = %agent_id,
                    memory_id = %event.memory_id,
                    event_id = %event.event_id,
                    "Event superseded by newer view state, ignored"
                );
                continue;
            }

            view.begin();
            let visible = self.evaluate(&agent_id, event);
            view.complete(visible, (ts, id));
            self.metrics.views_updated.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether `agent_id` may see the memory after this event.
    fn evaluate(&self, agent_id: &str, event: &MemoryEvent) -> bool {
        if event.event_type == MemoryEventType::Deleted {
            return false;
        }
        let snapshot = match &event.snapshot {
            Some(memory) => memory,
            None => return false,
        };

        snapshot.sharing.allows(
            &snapshot.agent_id,
            agent_id,
            self.registry.contains(agent_id),
            self.registry.is_interested(agent_id, snapshot.category),
        )
    }

    /// Current visibility of a memory to an agent.
    pub fn visibility(&self, agent_id: &str, memory_id: &str) -> Visibility {
        self.views
            .read()
            .unwrap()
            .get(&(agent_id.to_string(), memory_id.to_string()))
            .map(|v| v.visibility)
            .unwrap_or_default()
    }

    /// Memory ids currently visible to an agent.
    pub fn visible_memories(&self, agent_id: &str) -> Vec<String> {
        self.views
            .read()
            .unwrap()
            .iter()
            .filter(|((agent, _), view)| agent == agent_id && view.visibility == Visibility::Visible)
            .map(|((_, memory_id), _)| memory_id.clone())
            .collect()
    }

    /// Consume a bus subscription until cancelled or the bus closes.
    pub async fn run(self: Arc<Self>, mut subscription: Subscription, cancel: CancellationToken) {
        info!(agent_id = %subscription.handle.agent_id, "Synchronizer consuming events");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Synchronizer cancelled");
                    break;
                }
                maybe_event = subscription.receiver.recv() => {
                    match maybe_event {
                        Some(event) => self.on_event(&event),
                        None => {
                            info!("Event channel closed, synchronizer stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use memory_types::{Category, Memory, SharingPolicy};

    use crate::registry::AgentProfile;

    fn shared_memory(owner: &str, policy: SharingPolicy) -> Memory {
        Memory::new(
            ulid::Ulid::new().to_string(),
            owner.to_string(),
            "content".to_string(),
            Category::Facts,
            Utc::now(),
        )
        .with_sharing(policy)
    }

    fn event_for(
        memory: &Memory,
        event_type: MemoryEventType,
        event_id: &str,
        ms: i64,
    ) -> MemoryEvent {
        let snapshot = if event_type == MemoryEventType::Deleted {
            None
        } else {
            Some(memory.clone())
        };
        MemoryEvent::new(
            event_id.to_string(),
            event_type,
            memory.memory_id.clone(),
            memory.agent_id.clone(),
            DateTime::<Utc>::from_timestamp_millis(ms).unwrap(),
            snapshot,
        )
    }

    fn setup() -> (Arc<AgentRegistry>, AgentStateSynchronizer) {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(AgentProfile::new("claude", vec![Category::Facts]));
        registry.register(AgentProfile::new("copilot", vec![Category::Facts]));
        registry.register(AgentProfile::new("gemini", vec![Category::Decisions]));
        let sync = AgentStateSynchronizer::new(registry.clone());
        (registry, sync)
    }

    #[test]
    fn test_shared_memory_becomes_visible_to_all() {
        let (_, sync) = setup();
        let memory = shared_memory("claude", SharingPolicy::Shared);
        let event = event_for(&memory, MemoryEventType::Added, "01A", 1000);

        sync.on_event(&event);

        assert_eq!(sync.visibility("claude", &memory.memory_id), Visibility::Visible);
        assert_eq!(sync.visibility("copilot", &memory.memory_id), Visibility::Visible);
        assert_eq!(sync.visibility("gemini", &memory.memory_id), Visibility::Visible);
    }

    #[test]
    fn test_private_memory_visible_to_owner_only() {
        let (_, sync) = setup();
        let memory = shared_memory("claude", SharingPolicy::Private);
        sync.on_event(&event_for(&memory, MemoryEventType::Added, "01A", 1000));

        assert_eq!(sync.visibility("claude", &memory.memory_id), Visibility::Visible);
        assert_eq!(
            sync.visibility("copilot", &memory.memory_id),
            Visibility::NotVisible
        );
    }

    #[test]
    fn test_category_shared_respects_interest() {
        let (_, sync) = setup();
        let memory = shared_memory("claude", SharingPolicy::CategoryShared);
        sync.on_event(&event_for(&memory, MemoryEventType::Added, "01A", 1000));

        // copilot registered interest in facts, gemini did not
        assert_eq!(sync.visibility("copilot", &memory.memory_id), Visibility::Visible);
        assert_eq!(
            sync.visibility("gemini", &memory.memory_id),
            Visibility::NotVisible
        );
    }

    #[test]
    fn test_policy_narrowing_revokes_visibility() {
        let (_, sync) = setup();
        let mut memory = shared_memory("claude", SharingPolicy::Shared);
        sync.on_event(&event_for(&memory, MemoryEventType::Added, "01A", 1000));
        assert_eq!(sync.visibility("copilot", &memory.memory_id), Visibility::Visible);

        memory.sharing = SharingPolicy::Private;
        sync.on_event(&event_for(&memory, MemoryEventType::Updated, "01B", 2000));

        assert_eq!(
            sync.visibility("copilot", &memory.memory_id),
            Visibility::NotVisible
        );
        assert_eq!(sync.visibility("claude", &memory.memory_id), Visibility::Visible);
    }

    #[test]
    fn test_delete_revokes_all_views() {
        let (_, sync) = setup();
        let memory = shared_memory("claude", SharingPolicy::Shared);
        sync.on_event(&event_for(&memory, MemoryEventType::Added, "01A", 1000));
        sync.on_event(&event_for(&memory, MemoryEventType::Deleted, "01B", 2000));

        assert_eq!(
            sync.visibility("claude", &memory.memory_id),
            Visibility::NotVisible
        );
        assert!(sync.visible_memories("copilot").is_empty());
    }

    #[test]
    fn test_stale_event_is_ignored() {
        let (_, sync) = setup();
        let mut memory = shared_memory("claude", SharingPolicy::Shared);
        sync.on_event(&event_for(&memory, MemoryEventType::Added, "01B", 2000));

        // An older delete arriving late must not roll views back.
        memory.sharing = SharingPolicy::Private;
        sync.on_event(&event_for(&memory, MemoryEventType::Updated, "01A", 1000));

        assert_eq!(sync.visibility("copilot", &memory.memory_id), Visibility::Visible);
        assert_eq!(sync.metrics().snapshot().conflicts_ignored, 3);
    }

    #[test]
    fn test_equal_timestamp_larger_event_id_wins() {
        let (_, sync) = setup();
        let mut memory = shared_memory("claude", SharingPolicy::Shared);
        sync.on_event(&event_for(&memory, MemoryEventType::Added, "01A", 1000));

        memory.sharing = SharingPolicy::Private;
        sync.on_event(&event_for(&memory, MemoryEventType::Updated, "01B", 1000));

        // Same timestamp, larger id: the private update applies.
        assert_eq!(
            sync.visibility("copilot", &memory.memory_id),
            Visibility::NotVisible
        );
    }

    #[test]
    fn test_redelivered_event_is_idempotent() {
        let (_, sync) = setup();
        let memory = shared_memory("claude", SharingPolicy::Shared);
        let event = event_for(&memory, MemoryEventType::Added, "01A", 1000);

        sync.on_event(&event);
        let updated_before = sync.metrics().snapshot().views_updated;
        sync.on_event(&event);

        assert_eq!(sync.metrics().snapshot().views_updated, updated_before);
        assert_eq!(sync.visibility("copilot", &memory.memory_id), Visibility::Visible);
    }
}
