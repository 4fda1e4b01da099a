//! The memory-mesh engine.
//!
//! Write path: validate, estimate against the scope snapshot, resolve,
//! record the undo entry, commit, then publish. The per-scope lock is
//! held from estimation through commit and released before publish.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use memory_dedup::{
    content_hash, estimate, normalize, resolve, Decision, DedupMetrics, DedupMetricsSnapshot,
    ScopeSnapshot,
};
use memory_events::{InProcessBus, Publisher, SubscriptionHandle};
use memory_ledger::{ChainStep, Ledger, UndoOutcome};
use memory_storage::{ScopeLocks, Storage};
use memory_sync::{AgentProfile, AgentRegistry, AgentStateSynchronizer, Visibility};
use memory_types::{
    Category, DedupConfig, Memory, MemoryEvent, MemoryEventType, MergedContent, OperationKind,
    Settings, SharingPolicy,
};

use crate::error::EngineError;

/// Async callback invoked for each event a subscribed agent may see.
pub type EventHandler =
    Arc<dyn Fn(MemoryEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A write request.
#[derive(Debug, Clone)]
pub struct AddMemory {
    pub agent_id: String,
    pub content: String,
    /// Validated against the known category set before estimation
    pub category: String,
    pub embedding: Option<Vec<f32>>,
    pub tags: Vec<String>,
    pub sharing: SharingPolicy,
    /// Time to live; expired memories are removed by the TTL sweep
    pub ttl: Option<Duration>,
    /// Optional undo chain this write belongs to
    pub chain_id: Option<String>,
}

impl AddMemory {
    pub fn new(agent_id: &str, content: &str, category: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            content: content.to_string(),
            category: category.to_string(),
            embedding: None,
            tags: Vec::new(),
            sharing: SharingPolicy::default(),
            ttl: None,
            chain_id: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_sharing(mut self, sharing: SharingPolicy) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_chain(mut self, chain_id: &str) -> Self {
        self.chain_id = Some(chain_id.to_string());
        self
    }
}

/// What happened to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteDecision {
    /// A new record was created
    Created,
    /// Rejected: identical content already stored under this id
    DuplicateOf { memory_id: String },
    /// Folded into an existing record's merge annex
    MergedInto { memory_id: String },
}

/// Result of `add_memory`.
#[derive(Debug, Clone)]
pub struct AddOutcome {
    /// The created record's id, or the existing record for
    /// duplicates and merges
    pub memory_id: String,
    pub decision: WriteDecision,
    /// Set when the record was created in the related band
    pub related_to: Option<String>,
    /// Handle for reversing the mutation; `None` for rejected duplicates
    pub undo_id: Option<String>,
}

/// Result of a mutating call other than add.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub memory_id: String,
    pub undo_id: String,
}

/// Facade over storage, dedup, events, sync, and the undo ledger.
pub struct MemoryEngine {
    storage: Arc<Storage>,
    locks: Arc<ScopeLocks>,
    bus: Arc<InProcessBus>,
    registry: Arc<AgentRegistry>,
    synchronizer: Arc<AgentStateSynchronizer>,
    ledger: Arc<Ledger>,
    dedup_config: DedupConfig,
    dedup_metrics: Arc<DedupMetrics>,
    cancel: CancellationToken,
}

impl MemoryEngine {
    /// Build an engine over an already-open storage.
    ///
    /// Spawns the state synchronizer on its own bus subscription; call
    /// `shutdown` to stop background consumers.
    pub fn new(settings: &Settings, storage: Arc<Storage>) -> Self {
        let locks = Arc::new(ScopeLocks::new());
        let bus = Arc::new(InProcessBus::new(settings.publisher.clone()));
        let registry = Arc::new(AgentRegistry::new());
        let synchronizer = Arc::new(AgentStateSynchronizer::new(registry.clone()));
        let ledger = Arc::new(Ledger::new(
            storage.clone(),
            locks.clone(),
            settings.ledger.clone(),
        ));
        let cancel = CancellationToken::new();

        let subscription = bus.subscribe("state-synchronizer");
        tokio::spawn(synchronizer.clone().run(subscription, cancel.clone()));

        Self {
            storage,
            locks,
            bus,
            registry,
            synchronizer,
            ledger,
            dedup_config: settings.dedup.clone(),
            dedup_metrics: Arc::new(DedupMetrics::new()),
            cancel,
        }
    }

    /// Open storage at the configured path and build an engine over it.
    pub fn open(settings: &Settings) -> Result<Self, EngineError> {
        let storage = Arc::new(Storage::open(&settings.expanded_db_path())?);
        Ok(Self::new(settings, storage))
    }

    /// Stop background consumers (synchronizer, subscriber forwarders).
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // ==================== Agents ====================

    pub fn register_agent(&self, profile: AgentProfile) {
        self.registry.register(profile);
    }

    pub fn deregister_agent(&self, agent_id: &str) -> bool {
        self.registry.deregister(agent_id)
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    // ==================== Write Path ====================

    /// Add a memory, deduplicating against its (agent, category) scope.
    ///
    /// The scope lock is held across estimate, resolve, and commit, so
    /// two near-simultaneous identical writes cannot both be accepted.
    pub async fn add_memory(&self, request: AddMemory) -> Result<AddOutcome, EngineError> {
        self.validate_agent(&request.agent_id)?;
        let category = Category::from_str(&request.category)?;
        self.validate_content(&request.content)?;
        if let Some(chain_id) = &request.chain_id {
            validate_id_component("chain_id", chain_id)?;
        }

        let normalized = normalize(&request.content);
        let hash = content_hash(&normalized);
        let candidate_id = Ulid::new().to_string();

        let lock = self.locks.scope(&request.agent_id, category);
        let guard = lock.lock().await;

        let snapshot = self.build_snapshot(&request.agent_id, category, &hash, &normalized)?;
        let candidate = estimate(
            &candidate_id,
            request.embedding.as_deref(),
            &snapshot,
            &self.dedup_config,
        );
        let decision = resolve(&candidate, &self.dedup_config);
        self.dedup_metrics.checked.fetch_add(1, Ordering::Relaxed);

        let (outcome, event) = match decision {
            Decision::RejectDuplicate { target_id } => {
                self.dedup_metrics
                    .rejected_duplicate
                    .fetch_add(1, Ordering::Relaxed);
                info!(
                    agent_id = %request.agent_id,
                    duplicate_of = %target_id,
                    "Write rejected as duplicate"
                );
                let outcome = AddOutcome {
                    memory_id: target_id.clone(),
                    decision: WriteDecision::DuplicateOf {
                        memory_id: target_id,
                    },
                    related_to: None,
                    undo_id: None,
                };
                (outcome, None)
            }
            Decision::Merge { target_id } => match self.storage.get_memory(&target_id)? {
                Some(target) => {
                    let merged = self.apply_merge(&request, target)?;
                    self.dedup_metrics.merged.fetch_add(1, Ordering::Relaxed);
                    merged
                }
                None => {
                    // Index pointed at a record that is gone; fall back
                    // to a plain accept.
                    warn!(target_id = %target_id, "Merge target missing, storing as new");
                    let accepted =
                        self.apply_accept(&request, candidate_id, category, &hash, None)?;
                    self.dedup_metrics
                        .accepted_new
                        .fetch_add(1, Ordering::Relaxed);
                    accepted
                }
            },
            Decision::AcceptRelated { target_id } => {
                let accepted = self.apply_accept(
                    &request,
                    candidate_id,
                    category,
                    &hash,
                    Some(target_id),
                )?;
                self.dedup_metrics
                    .accepted_related
                    .fetch_add(1, Ordering::Relaxed);
                accepted
            }
            Decision::AcceptNew => {
                let accepted = self.apply_accept(&request, candidate_id, category, &hash, None)?;
                self.dedup_metrics
                    .accepted_new
                    .fetch_add(1, Ordering::Relaxed);
                accepted
            }
        };

        drop(guard);
        if let Some(event) = event {
            self.bus.publish(event).await;
        }
        Ok(outcome)
    }

    /// Commit an accepted write. Caller holds the scope lock.
    fn apply_accept(
        &self,
        request: &AddMemory,
        memory_id: String,
        category: Category,
        hash: &str,
        related_to: Option<String>,
    ) -> Result<(AddOutcome, Option<MemoryEvent>), EngineError> {
        let now = Utc::now();
        let mut memory = Memory::new(
            memory_id.clone(),
            request.agent_id.clone(),
            request.content.clone(),
            category,
            now,
        )
        .with_tags(request.tags.clone())
        .with_sharing(request.sharing.clone());
        if let Some(embedding) = &request.embedding {
            memory.embedding = Some(embedding.clone());
        }
        if let Some(ttl) = request.ttl {
            memory.expires_at = Some(now + ttl);
        }
        if let Some(ref target) = related_to {
            memory.related_to.push(target.clone());
        }

        let entry = self.ledger.record(
            OperationKind::Add,
            &request.agent_id,
            &memory.memory_id,
            None,
            Some(memory.clone()),
            request.chain_id.clone(),
        )?;
        self.storage.put_memory(&memory, hash, None)?;

        info!(
            memory_id = %memory.memory_id,
            agent_id = %request.agent_id,
            category = %category,
            related = related_to.is_some(),
            "Memory created"
        );

        let event = self.make_event(MemoryEventType::Added, &memory.memory_id, &request.agent_id, Some(&memory));
        let outcome = AddOutcome {
            memory_id: memory.memory_id,
            decision: WriteDecision::Created,
            related_to,
            undo_id: Some(entry.undo_id),
        };
        Ok((outcome, Some(event)))
    }

    /// Fold a near-duplicate into its target. Caller holds the scope lock.
    fn apply_merge(
        &self,
        request: &AddMemory,
        target: Memory,
    ) -> Result<(AddOutcome, Option<MemoryEvent>), EngineError> {
        let target_hash = content_hash(&normalize(&target.content));
        let original = target.clone();

        let mut merged = target;
        merged.merges.push(MergedContent {
            content: request.content.clone(),
            agent_id: request.agent_id.clone(),
            merged_at: Utc::now(),
        });
        for tag in &request.tags {
            if !merged.tags.contains(tag) {
                merged.tags.push(tag.clone());
            }
        }
        merged.updated_at = Utc::now();

        let entry = self.ledger.record(
            OperationKind::Merge,
            &request.agent_id,
            &merged.memory_id,
            Some(original),
            Some(merged.clone()),
            request.chain_id.clone(),
        )?;
        // Content is untouched by a merge, so the hash is unchanged.
        self.storage
            .put_memory(&merged, &target_hash, Some(&target_hash))?;

        info!(
            memory_id = %merged.memory_id,
            agent_id = %request.agent_id,
            "Near-duplicate merged"
        );

        let event = self.make_event(
            MemoryEventType::Merged,
            &merged.memory_id,
            &request.agent_id,
            Some(&merged),
        );
        let outcome = AddOutcome {
            memory_id: merged.memory_id.clone(),
            decision: WriteDecision::MergedInto {
                memory_id: merged.memory_id,
            },
            related_to: None,
            undo_id: Some(entry.undo_id),
        };
        Ok((outcome, Some(event)))
    }

    // ==================== Reads ====================

    /// Fetch a memory the viewer is allowed to see.
    pub fn get_memory(&self, memory_id: &str, viewer: &str) -> Result<Memory, EngineError> {
        let memory = self
            .storage
            .get_memory(memory_id)?
            .ok_or_else(|| EngineError::NotFound(memory_id.to_string()))?;

        let allowed = memory.sharing.allows(
            &memory.agent_id,
            viewer,
            self.registry.contains(viewer),
            self.registry.is_interested(viewer, memory.category),
        );
        if !allowed {
            return Err(EngineError::AccessDenied(format!(
                "{} may not view {}",
                viewer, memory_id
            )));
        }
        Ok(memory)
    }

    // ==================== Mutations ====================

    /// Replace a memory's content (and optionally its embedding).
    pub async fn update_memory(
        &self,
        memory_id: &str,
        agent_id: &str,
        content: &str,
        embedding: Option<Vec<f32>>,
        chain_id: Option<String>,
    ) -> Result<UpdateOutcome, EngineError> {
        self.validate_content(content)?;
        let lock = self.owned_scope_lock(memory_id, agent_id).await?;
        let guard = lock.lock().await;
        // Re-read under the lock; the first read only located the scope.
        let original = self
            .storage
            .get_memory(memory_id)?
            .ok_or_else(|| EngineError::NotFound(memory_id.to_string()))?;

        let old_hash = content_hash(&normalize(&original.content));
        let mut updated = original.clone();
        updated.content = content.to_string();
        if let Some(embedding) = embedding {
            updated.embedding = Some(embedding);
        }
        updated.updated_at = Utc::now();
        let new_hash = content_hash(&normalize(&updated.content));

        let entry = self.ledger.record(
            OperationKind::Update,
            agent_id,
            memory_id,
            Some(original),
            Some(updated.clone()),
            chain_id,
        )?;
        self.storage
            .put_memory(&updated, &new_hash, Some(&old_hash))?;

        let event =
            self.make_event(MemoryEventType::Updated, memory_id, agent_id, Some(&updated));
        drop(guard);
        self.bus.publish(event).await;

        Ok(UpdateOutcome {
            memory_id: memory_id.to_string(),
            undo_id: entry.undo_id,
        })
    }

    /// Replace content with a caller-provided summary.
    pub async fn summarize_memory(
        &self,
        memory_id: &str,
        agent_id: &str,
        summary: &str,
        chain_id: Option<String>,
    ) -> Result<UpdateOutcome, EngineError> {
        self.validate_content(summary)?;
        let lock = self.owned_scope_lock(memory_id, agent_id).await?;
        let guard = lock.lock().await;
        let original = self
            .storage
            .get_memory(memory_id)?
            .ok_or_else(|| EngineError::NotFound(memory_id.to_string()))?;

        let old_hash = content_hash(&normalize(&original.content));
        let mut summarized = original.clone();
        summarized.content = summary.to_string();
        summarized.updated_at = Utc::now();
        let new_hash = content_hash(&normalize(&summarized.content));

        let entry = self.ledger.record(
            OperationKind::Summarize,
            agent_id,
            memory_id,
            Some(original),
            Some(summarized.clone()),
            chain_id,
        )?;
        self.storage
            .put_memory(&summarized, &new_hash, Some(&old_hash))?;

        info!(memory_id, agent_id, "Memory summarized");
        let event = self.make_event(
            MemoryEventType::Summarized,
            memory_id,
            agent_id,
            Some(&summarized),
        );
        drop(guard);
        self.bus.publish(event).await;

        Ok(UpdateOutcome {
            memory_id: memory_id.to_string(),
            undo_id: entry.undo_id,
        })
    }

    /// Change a memory's sharing policy. Widening transitions are logged.
    pub async fn set_sharing_policy(
        &self,
        memory_id: &str,
        agent_id: &str,
        policy: SharingPolicy,
    ) -> Result<UpdateOutcome, EngineError> {
        let lock = self.owned_scope_lock(memory_id, agent_id).await?;
        let guard = lock.lock().await;
        let original = self
            .storage
            .get_memory(memory_id)?
            .ok_or_else(|| EngineError::NotFound(memory_id.to_string()))?;

        if policy.widens(&original.sharing) {
            info!(
                memory_id,
                agent_id,
                from = ?original.sharing,
                to = ?policy,
                "Sharing policy widened"
            );
        } else {
            debug!(memory_id, agent_id, to = ?policy, "Sharing policy changed");
        }

        let hash = content_hash(&normalize(&original.content));
        let mut updated = original.clone();
        updated.sharing = policy;
        updated.updated_at = Utc::now();

        let entry = self.ledger.record(
            OperationKind::PolicyChange,
            agent_id,
            memory_id,
            Some(original),
            Some(updated.clone()),
            None,
        )?;
        self.storage.put_memory(&updated, &hash, Some(&hash))?;

        let event =
            self.make_event(MemoryEventType::Updated, memory_id, agent_id, Some(&updated));
        drop(guard);
        self.bus.publish(event).await;

        Ok(UpdateOutcome {
            memory_id: memory_id.to_string(),
            undo_id: entry.undo_id,
        })
    }

    /// Delete a memory.
    pub async fn delete_memory(
        &self,
        memory_id: &str,
        agent_id: &str,
        chain_id: Option<String>,
    ) -> Result<UpdateOutcome, EngineError> {
        let lock = self.owned_scope_lock(memory_id, agent_id).await?;
        let guard = lock.lock().await;
        let original = self
            .storage
            .get_memory(memory_id)?
            .ok_or_else(|| EngineError::NotFound(memory_id.to_string()))?;

        let hash = content_hash(&normalize(&original.content));
        let entry = self.ledger.record(
            OperationKind::Delete,
            agent_id,
            memory_id,
            Some(original.clone()),
            None,
            chain_id,
        )?;
        self.storage.delete_memory(&original, &hash)?;

        info!(memory_id, agent_id, "Memory deleted");
        let event = self.make_event(MemoryEventType::Deleted, memory_id, agent_id, None);
        drop(guard);
        self.bus.publish(event).await;

        Ok(UpdateOutcome {
            memory_id: memory_id.to_string(),
            undo_id: entry.undo_id,
        })
    }

    /// Remove every memory whose TTL has passed.
    ///
    /// Each removal goes through the normal mutation path: undo entry,
    /// then delete, then event. Run by the maintenance sweep.
    pub async fn purge_expired(&self) -> Result<usize, EngineError> {
        let now = Utc::now();
        let expired = self.storage.expired_memories(now)?;
        let mut purged = 0;

        for memory in expired {
            let lock = self.locks.scope(&memory.agent_id, memory.category);
            let guard = lock.lock().await;

            // Re-check under the lock; an undo or update may have raced.
            let current = match self.storage.get_memory(&memory.memory_id)? {
                Some(m) if m.is_expired(now) => m,
                _ => continue,
            };

            let hash = content_hash(&normalize(&current.content));
            self.ledger.record(
                OperationKind::TtlExpiry,
                &current.agent_id,
                &current.memory_id,
                Some(current.clone()),
                None,
                None,
            )?;
            self.storage.delete_memory(&current, &hash)?;
            let event = self.make_event(
                MemoryEventType::Deleted,
                &current.memory_id,
                &current.agent_id,
                None,
            );
            drop(guard);
            self.bus.publish(event).await;
            purged += 1;
        }

        if purged > 0 {
            info!(purged, "TTL sweep removed expired memories");
        }
        Ok(purged)
    }

    // ==================== Undo ====================

    /// Reverse a recorded mutation and publish the resulting state.
    pub async fn undo(
        &self,
        undo_id: &str,
        agent_id: &str,
        reason: &str,
    ) -> Result<UndoOutcome, EngineError> {
        let outcome = self.ledger.undo(undo_id, agent_id, reason).await?;
        self.publish_undo_event(&outcome, agent_id).await;
        Ok(outcome)
    }

    /// Replay an undo chain newest-first, publishing per reversed step.
    /// Stops at the first failed step; the partial result is returned.
    pub async fn undo_chain(
        &self,
        chain_id: &str,
        agent_id: &str,
    ) -> Result<Vec<ChainStep>, EngineError> {
        let steps = self.ledger.undo_chain(chain_id, agent_id).await?;
        for step in &steps {
            if let Ok(outcome) = &step.result {
                self.publish_undo_event(outcome, agent_id).await;
            }
        }
        Ok(steps)
    }

    async fn publish_undo_event(&self, outcome: &UndoOutcome, agent_id: &str) {
        let event = match (&outcome.restored_state, outcome.operation) {
            // Reverting a creation removed the record.
            (None, _) => {
                self.make_event(MemoryEventType::Deleted, &outcome.memory_id, agent_id, None)
            }
            // Reverting a delete brought the record back.
            (Some(restored), OperationKind::Delete | OperationKind::TtlExpiry) => self.make_event(
                MemoryEventType::Added,
                &outcome.memory_id,
                agent_id,
                Some(restored),
            ),
            (Some(restored), _) => self.make_event(
                MemoryEventType::Updated,
                &outcome.memory_id,
                agent_id,
                Some(restored),
            ),
        };
        self.bus.publish(event).await;
    }

    // ==================== Subscriptions ====================

    /// Subscribe an agent; `handler` runs for every event whose snapshot
    /// the agent may see. Delete events always fan out so consumers can
    /// retire their own views.
    pub fn subscribe_agent(
        &self,
        agent_id: &str,
        handler: EventHandler,
    ) -> Result<SubscriptionHandle, EngineError> {
        self.validate_agent(agent_id)?;

        let mut subscription = self.bus.subscribe(agent_id);
        let handle = subscription.handle.clone();
        let registry = self.registry.clone();
        let agent = agent_id.to_string();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe_event = subscription.receiver.recv() => {
                        match maybe_event {
                            Some(event) => {
                                if event_visible_to(&registry, &agent, &event) {
                                    handler(event).await;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!(agent_id = %agent, "Subscriber forwarder stopped");
        });

        Ok(handle)
    }

    /// Remove a subscription; its forwarder task drains and stops.
    pub fn unsubscribe_agent(&self, handle: &SubscriptionHandle) -> bool {
        self.bus.unsubscribe(handle)
    }

    // ==================== Introspection ====================

    pub fn visibility(&self, agent_id: &str, memory_id: &str) -> Visibility {
        self.synchronizer.visibility(agent_id, memory_id)
    }

    pub fn visible_memories(&self, agent_id: &str) -> Vec<String> {
        self.synchronizer.visible_memories(agent_id)
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn dedup_metrics(&self) -> DedupMetricsSnapshot {
        self.dedup_metrics.snapshot()
    }

    pub fn delivery_metrics(&self) -> memory_events::DeliveryMetricsSnapshot {
        self.bus.metrics().snapshot()
    }

    pub fn sync_metrics(&self) -> memory_sync::SyncMetricsSnapshot {
        self.synchronizer.metrics().snapshot()
    }

    // ==================== Helpers ====================

    fn make_event(
        &self,
        event_type: MemoryEventType,
        memory_id: &str,
        agent_id: &str,
        snapshot: Option<&Memory>,
    ) -> MemoryEvent {
        MemoryEvent::new(
            Ulid::new().to_string(),
            event_type,
            memory_id.to_string(),
            agent_id.to_string(),
            Utc::now(),
            snapshot.cloned(),
        )
    }

    /// Build the dedup snapshot for one scope. Caller holds the scope
    /// lock. The exact match comes from the O(1) content-hash index and
    /// is verified against the stored record's normalized content.
    fn build_snapshot(
        &self,
        agent_id: &str,
        category: Category,
        hash: &str,
        normalized: &str,
    ) -> Result<ScopeSnapshot, EngineError> {
        let exact_match = match self.storage.find_by_content_hash(agent_id, category, hash)? {
            Some(memory_id) => match self.storage.get_memory(&memory_id)? {
                Some(existing) if normalize(&existing.content) == normalized => Some(memory_id),
                Some(_) => {
                    warn!(memory_id = %memory_id, "Content hash collision, ignoring exact match");
                    None
                }
                None => None,
            },
            None => None,
        };

        let embeddings = self
            .storage
            .memories_in_scope(agent_id, category)?
            .into_iter()
            .filter_map(|m| m.embedding.map(|e| (m.memory_id, e)))
            .collect();

        Ok(ScopeSnapshot::new(exact_match, embeddings))
    }

    /// Resolve the memory's scope lock after checking ownership.
    ///
    /// The pre-lock read only locates the scope; callers re-read the
    /// record once the lock is held. Owner and category are immutable,
    /// so the scope cannot change between the two reads.
    async fn owned_scope_lock(
        &self,
        memory_id: &str,
        agent_id: &str,
    ) -> Result<Arc<tokio::sync::Mutex<()>>, EngineError> {
        let memory = self
            .storage
            .get_memory(memory_id)?
            .ok_or_else(|| EngineError::NotFound(memory_id.to_string()))?;
        if memory.agent_id != agent_id {
            return Err(EngineError::AccessDenied(format!(
                "{} does not own {}",
                agent_id, memory_id
            )));
        }
        Ok(self.locks.scope(&memory.agent_id, memory.category))
    }

    fn validate_agent(&self, agent_id: &str) -> Result<(), EngineError> {
        validate_id_component("agent_id", agent_id)?;
        if !self.registry.contains(agent_id) {
            return Err(EngineError::Validation(format!(
                "agent {} is not registered",
                agent_id
            )));
        }
        Ok(())
    }

    fn validate_content(&self, content: &str) -> Result<(), EngineError> {
        let len = content.trim().len();
        if len < self.dedup_config.min_content_length {
            return Err(EngineError::Validation(format!(
                "content shorter than {} characters",
                self.dedup_config.min_content_length
            )));
        }
        if len > self.dedup_config.max_content_length {
            return Err(EngineError::Validation(format!(
                "content longer than {} characters",
                self.dedup_config.max_content_length
            )));
        }
        Ok(())
    }
}

/// Ids that end up inside storage keys must stay away from the key
/// separator.
fn validate_id_component(field: &str, value: &str) -> Result<(), EngineError> {
    if value.is_empty() {
        return Err(EngineError::Validation(format!("{} is empty", field)));
    }
    if value.contains(':') || value.chars().any(char::is_whitespace) {
        return Err(EngineError::Validation(format!(
            "{} may not contain ':' or whitespace: {:?}",
            field, value
        )));
    }
    Ok(())
}

/// Whether an event should reach a subscribed agent.
fn event_visible_to(registry: &AgentRegistry, agent_id: &str, event: &MemoryEvent) -> bool {
    match &event.snapshot {
        Some(memory) => memory.sharing.allows(
            &memory.agent_id,
            agent_id,
            registry.contains(agent_id),
            registry.is_interested(agent_id, memory.category),
        ),
        // Deletions carry no snapshot; fan out so consumers can retire
        // their own views.
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_types::UndoStatus;
    use tempfile::TempDir;

    fn create_engine() -> (MemoryEngine, TempDir) {
        let temp = TempDir::new().unwrap();
        let settings = Settings {
            db_path: temp.path().to_string_lossy().to_string(),
            ..Default::default()
        };
        let engine = MemoryEngine::open(&settings).unwrap();
        engine.register_agent(AgentProfile::new("claude", vec![Category::Facts]));
        engine.register_agent(AgentProfile::new("copilot", vec![Category::Facts]));
        (engine, temp)
    }

    #[tokio::test]
    async fn test_unregistered_agent_is_rejected() {
        let (engine, _temp) = create_engine();
        let result = engine
            .add_memory(AddMemory::new("ghost", "some content", "facts"))
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_category_is_rejected() {
        let (engine, _temp) = create_engine();
        let result = engine
            .add_memory(AddMemory::new("claude", "some content", "gossip"))
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_empty_content_is_rejected() {
        let (engine, _temp) = create_engine();
        let result = engine
            .add_memory(AddMemory::new("claude", "   ", "facts"))
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_verbatim_duplicate_is_rejected() {
        let (engine, _temp) = create_engine();

        let first = engine
            .add_memory(AddMemory::new("claude", "The sky is blue", "facts"))
            .await
            .unwrap();
        assert_eq!(first.decision, WriteDecision::Created);

        let second = engine
            .add_memory(AddMemory::new("claude", "The sky is blue", "facts"))
            .await
            .unwrap();
        assert_eq!(
            second.decision,
            WriteDecision::DuplicateOf {
                memory_id: first.memory_id.clone()
            }
        );
        assert!(second.undo_id.is_none());

        let metrics = engine.dedup_metrics();
        assert_eq!(metrics.rejected_duplicate, 1);
        assert_eq!(metrics.accepted_new, 1);
    }

    #[tokio::test]
    async fn test_normalized_duplicate_is_rejected() {
        let (engine, _temp) = create_engine();

        let first = engine
            .add_memory(AddMemory::new("claude", "The sky is blue", "facts"))
            .await
            .unwrap();
        let second = engine
            .add_memory(AddMemory::new("claude", "  the   SKY is\tblue ", "facts"))
            .await
            .unwrap();
        assert_eq!(
            second.decision,
            WriteDecision::DuplicateOf {
                memory_id: first.memory_id
            }
        );
    }

    #[tokio::test]
    async fn test_same_content_different_scope_is_accepted() {
        let (engine, _temp) = create_engine();

        engine
            .add_memory(AddMemory::new("claude", "The sky is blue", "facts"))
            .await
            .unwrap();
        let other = engine
            .add_memory(AddMemory::new("copilot", "The sky is blue", "facts"))
            .await
            .unwrap();
        assert_eq!(other.decision, WriteDecision::Created);
    }

    #[tokio::test]
    async fn test_high_similarity_merges() {
        let (engine, _temp) = create_engine();

        let first = engine
            .add_memory(
                AddMemory::new("claude", "The sky is blue", "facts")
                    .with_embedding(vec![1.0, 0.0, 0.0]),
            )
            .await
            .unwrap();

        let second = engine
            .add_memory(
                AddMemory::new("claude", "The sky appears blue", "facts")
                    .with_embedding(vec![0.999, 0.01, 0.0]),
            )
            .await
            .unwrap();

        assert_eq!(
            second.decision,
            WriteDecision::MergedInto {
                memory_id: first.memory_id.clone()
            }
        );

        let merged = engine.get_memory(&first.memory_id, "claude").unwrap();
        assert_eq!(merged.merges.len(), 1);
        assert_eq!(merged.merges[0].content, "The sky appears blue");
        assert_eq!(merged.content, "The sky is blue");
    }

    #[tokio::test]
    async fn test_related_band_creates_flagged_record() {
        let (engine, _temp) = create_engine();

        let first = engine
            .add_memory(
                AddMemory::new("claude", "The sky is blue", "facts")
                    .with_embedding(vec![1.0, 0.0]),
            )
            .await
            .unwrap();

        // cosine([1,0], [0.9, 0.436]) = 0.9: related, below merge
        let second = engine
            .add_memory(
                AddMemory::new("claude", "Skies look blue in daylight", "facts")
                    .with_embedding(vec![0.9, 0.43589]),
            )
            .await
            .unwrap();

        assert_eq!(second.decision, WriteDecision::Created);
        assert_eq!(second.related_to, Some(first.memory_id.clone()));

        let stored = engine.get_memory(&second.memory_id, "claude").unwrap();
        assert_eq!(stored.related_to, vec![first.memory_id]);
    }

    #[tokio::test]
    async fn test_low_similarity_is_plain_accept() {
        let (engine, _temp) = create_engine();

        engine
            .add_memory(
                AddMemory::new("claude", "The sky is blue", "facts")
                    .with_embedding(vec![1.0, 0.0]),
            )
            .await
            .unwrap();
        let second = engine
            .add_memory(
                AddMemory::new("claude", "Coffee beans are roasted", "facts")
                    .with_embedding(vec![0.0, 1.0]),
            )
            .await
            .unwrap();

        assert_eq!(second.decision, WriteDecision::Created);
        assert!(second.related_to.is_none());
    }

    #[tokio::test]
    async fn test_add_then_undo_removes_memory() {
        let (engine, _temp) = create_engine();

        let outcome = engine
            .add_memory(AddMemory::new("claude", "Ephemeral fact", "facts"))
            .await
            .unwrap();
        let undo_id = outcome.undo_id.unwrap();

        let undone = engine.undo(&undo_id, "claude", "mistake").await.unwrap();
        assert!(undone.restored_state.is_none());

        let result = engine.get_memory(&outcome.memory_id, "claude");
        assert!(matches!(result, Err(EngineError::NotFound(_))));

        // And the scope really is clean: the same content stores again.
        let again = engine
            .add_memory(AddMemory::new("claude", "Ephemeral fact", "facts"))
            .await
            .unwrap();
        assert_eq!(again.decision, WriteDecision::Created);
    }

    #[tokio::test]
    async fn test_double_undo_is_unavailable() {
        let (engine, _temp) = create_engine();

        let outcome = engine
            .add_memory(AddMemory::new("claude", "Once", "facts"))
            .await
            .unwrap();
        let undo_id = outcome.undo_id.unwrap();

        engine.undo(&undo_id, "claude", "first").await.unwrap();
        let second = engine.undo(&undo_id, "claude", "second").await;
        assert!(matches!(
            second,
            Err(EngineError::Ledger(
                memory_ledger::LedgerError::UndoUnavailable(_)
            ))
        ));
    }

    #[tokio::test]
    async fn test_update_and_undo_restores_content() {
        let (engine, _temp) = create_engine();

        let added = engine
            .add_memory(AddMemory::new("claude", "Version one", "facts"))
            .await
            .unwrap();

        let updated = engine
            .update_memory(&added.memory_id, "claude", "Version two", None, None)
            .await
            .unwrap();
        assert_eq!(
            engine.get_memory(&added.memory_id, "claude").unwrap().content,
            "Version two"
        );

        engine
            .undo(&updated.undo_id, "claude", "revert")
            .await
            .unwrap();
        assert_eq!(
            engine.get_memory(&added.memory_id, "claude").unwrap().content,
            "Version one"
        );
    }

    #[tokio::test]
    async fn test_delete_then_undo_restores() {
        let (engine, _temp) = create_engine();

        let added = engine
            .add_memory(AddMemory::new("claude", "Keep me around", "facts"))
            .await
            .unwrap();
        let deleted = engine
            .delete_memory(&added.memory_id, "claude", None)
            .await
            .unwrap();
        assert!(matches!(
            engine.get_memory(&added.memory_id, "claude"),
            Err(EngineError::NotFound(_))
        ));

        engine
            .undo(&deleted.undo_id, "claude", "restore")
            .await
            .unwrap();
        assert_eq!(
            engine.get_memory(&added.memory_id, "claude").unwrap().content,
            "Keep me around"
        );
    }

    #[tokio::test]
    async fn test_non_owner_cannot_mutate() {
        let (engine, _temp) = create_engine();

        let added = engine
            .add_memory(AddMemory::new("claude", "Mine alone", "facts"))
            .await
            .unwrap();
        let result = engine
            .delete_memory(&added.memory_id, "copilot", None)
            .await;
        assert!(matches!(result, Err(EngineError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn test_private_memory_hidden_from_other_agents() {
        let (engine, _temp) = create_engine();

        let added = engine
            .add_memory(AddMemory::new("claude", "Private note", "facts"))
            .await
            .unwrap();
        let result = engine.get_memory(&added.memory_id, "copilot");
        assert!(matches!(result, Err(EngineError::AccessDenied(_))));

        let shared = engine
            .add_memory(
                AddMemory::new("claude", "Public note", "facts")
                    .with_sharing(SharingPolicy::Shared),
            )
            .await
            .unwrap();
        assert!(engine.get_memory(&shared.memory_id, "copilot").is_ok());
    }

    #[tokio::test]
    async fn test_ttl_purge_goes_through_ledger() {
        let (engine, _temp) = create_engine();

        let added = engine
            .add_memory(
                AddMemory::new("claude", "Short-lived", "facts")
                    .with_ttl(Duration::milliseconds(-1)),
            )
            .await
            .unwrap();

        let purged = engine.purge_expired().await.unwrap();
        assert_eq!(purged, 1);
        assert!(matches!(
            engine.get_memory(&added.memory_id, "claude"),
            Err(EngineError::NotFound(_))
        ));

        // The expiry left a pending ledger entry behind.
        let entries = engine.storage().undo_entries().unwrap();
        let ttl_entry = entries
            .iter()
            .find(|e| e.operation == OperationKind::TtlExpiry)
            .unwrap();
        assert_eq!(ttl_entry.status, UndoStatus::Pending);
    }

    #[tokio::test]
    async fn test_concurrent_identical_writes_yield_one_record() {
        let (engine, _temp) = create_engine();
        let engine = Arc::new(engine);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .add_memory(AddMemory::new("claude", "The sky is blue", "facts"))
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            let outcome = handle.await.unwrap();
            if outcome.decision == WriteDecision::Created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }
}
