//! Undo ledger over the authoritative store.
//!
//! `record` persists a pending entry before the mutation it describes
//! commits. `undo` applies the inverse mutation under the same per-scope
//! lock as the original write, so a stale revert cannot clobber a
//! concurrent write to the scope.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};
use ulid::Ulid;

use memory_dedup::{content_hash, normalize};
use memory_storage::{ScopeLocks, Storage, StorageError};
use memory_types::{LedgerConfig, Memory, OperationKind, UndoEntry, UndoStatus};

use crate::error::LedgerError;

/// Result of a successful undo.
#[derive(Debug, Clone)]
pub struct UndoOutcome {
    pub undo_id: String,
    pub memory_id: String,
    /// The operation that was reversed
    pub operation: OperationKind,
    /// State written back, `None` when the undo removed a created record
    pub restored_state: Option<Memory>,
}

/// Outcome of one step of a chain replay.
#[derive(Debug, Clone)]
pub struct ChainStep {
    pub undo_id: String,
    pub memory_id: String,
    /// The applied undo, or the message it failed with
    pub result: Result<UndoOutcome, String>,
}

impl ChainStep {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Append-only record of reversible mutations.
pub struct Ledger {
    storage: Arc<Storage>,
    locks: Arc<ScopeLocks>,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(storage: Arc<Storage>, locks: Arc<ScopeLocks>, config: LedgerConfig) -> Self {
        Self {
            storage,
            locks,
            config,
        }
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Record a pending entry for a mutation that is about to commit.
    ///
    /// Called by the engine while it already holds the scope lock, so
    /// this takes none.
    pub fn record(
        &self,
        operation: OperationKind,
        agent_id: &str,
        memory_id: &str,
        original_state: Option<Memory>,
        new_state: Option<Memory>,
        chain_id: Option<String>,
    ) -> Result<UndoEntry, LedgerError> {
        let now = Utc::now();
        let entry = UndoEntry::new(
            Ulid::new().to_string(),
            chain_id,
            operation,
            agent_id.to_string(),
            memory_id.to_string(),
            original_state,
            new_state,
            now,
            now + Duration::days(self.config.retention_days),
        );
        self.storage.put_undo_entry(&entry)?;
        Ok(entry)
    }

    /// Reverse one recorded mutation.
    ///
    /// Valid only while the entry is pending and unexpired; anything else
    /// is `UndoUnavailable`, including a second undo of the same entry.
    /// The revert is attempted up to the configured budget before the
    /// entry is marked failed.
    pub async fn undo(
        &self,
        undo_id: &str,
        agent_id: &str,
        reason: &str,
    ) -> Result<UndoOutcome, LedgerError> {
        let entry = self
            .storage
            .get_undo_entry(undo_id)?
            .ok_or_else(|| LedgerError::UndoUnavailable(format!("no entry {}", undo_id)))?;

        if entry.agent_id != agent_id {
            return Err(LedgerError::AccessDenied {
                undo_id: undo_id.to_string(),
                owner: entry.agent_id,
            });
        }

        let scope = entry
            .original_state
            .as_ref()
            .or(entry.new_state.as_ref())
            .map(|m| (m.agent_id.clone(), m.category))
            .ok_or_else(|| {
                LedgerError::UndoUnavailable(format!("entry {} carries no state", undo_id))
            })?;

        let lock = self.locks.scope(&scope.0, scope.1);
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent undo may have consumed the
        // entry between the first read and lock acquisition.
        let entry = self
            .storage
            .get_undo_entry(undo_id)?
            .ok_or_else(|| LedgerError::UndoUnavailable(format!("no entry {}", undo_id)))?;

        let now = Utc::now();
        if !entry.is_undoable(now) {
            if entry.status == UndoStatus::Pending && entry.is_expired(now) {
                let mut expired = entry.clone();
                expired.status = UndoStatus::Expired;
                self.storage.put_undo_entry(&expired)?;
            }
            return Err(LedgerError::UndoUnavailable(format!(
                "entry {} is {:?}",
                undo_id, entry.status
            )));
        }

        let mut attempts = 0;
        let mut last_error = String::new();
        while attempts < self.config.max_undo_attempts {
            attempts += 1;
            match self.apply_revert(&entry) {
                Ok(restored) => {
                    let mut completed = entry.clone();
                    completed.status = UndoStatus::Completed;
                    self.storage.put_undo_entry(&completed)?;
                    info!(
                        undo_id = %entry.undo_id,
                        agent_id,
                        operation = %entry.operation,
                        reason,
                        "Undo applied"
                    );
                    return Ok(UndoOutcome {
                        undo_id: entry.undo_id.clone(),
                        memory_id: entry.memory_id.clone(),
                        operation: entry.operation,
                        restored_state: restored,
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        undo_id = %entry.undo_id,
                        attempt = attempts,
                        error = %last_error,
                        "Undo attempt failed"
                    );
                }
            }
        }

        let mut failed = entry.clone();
        failed.status = UndoStatus::Failed;
        self.storage.put_undo_entry(&failed)?;
        Err(LedgerError::UndoFailed {
            attempts,
            reason: last_error,
        })
    }

    /// Replay a chain's entries newest-first, stopping at the first
    /// failure. The partial result is always reported; there is no
    /// silent partial rollback.
    pub async fn undo_chain(
        &self,
        chain_id: &str,
        agent_id: &str,
    ) -> Result<Vec<ChainStep>, LedgerError> {
        let entries = self.storage.undo_entries_for_chain(chain_id)?;
        if entries.is_empty() {
            return Err(LedgerError::NotFound(format!("chain {}", chain_id)));
        }

        let reason = format!("chain {}", chain_id);
        let mut steps = Vec::new();
        for entry in entries.into_iter().rev() {
            match self.undo(&entry.undo_id, agent_id, &reason).await {
                Ok(outcome) => steps.push(ChainStep {
                    undo_id: entry.undo_id.clone(),
                    memory_id: entry.memory_id.clone(),
                    result: Ok(outcome),
                }),
                Err(e) => {
                    warn!(
                        chain_id,
                        undo_id = %entry.undo_id,
                        error = %e,
                        "Chain replay stopped at failed step"
                    );
                    steps.push(ChainStep {
                        undo_id: entry.undo_id.clone(),
                        memory_id: entry.memory_id.clone(),
                        result: Err(e.to_string()),
                    });
                    break;
                }
            }
        }
        Ok(steps)
    }

    /// Apply the inverse of the recorded mutation.
    fn apply_revert(&self, entry: &UndoEntry) -> Result<Option<Memory>, StorageError> {
        match &entry.original_state {
            // The mutation created the record: remove it.
            None => {
                if let Some(current) = self.storage.get_memory(&entry.memory_id)? {
                    let hash = content_hash(&normalize(&current.content));
                    self.storage.delete_memory(&current, &hash)?;
                }
                Ok(None)
            }
            // The mutation replaced or removed state: write the original back.
            Some(original) => {
                let replaced = self
                    .storage
                    .get_memory(&entry.memory_id)?
                    .map(|m| content_hash(&normalize(&m.content)));
                let hash = content_hash(&normalize(&original.content));
                self.storage.put_memory(original, &hash, replaced.as_deref())?;
                Ok(Some(original.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_types::Category;
    use tempfile::TempDir;

    fn create_ledger() -> (Ledger, Arc<Storage>, TempDir) {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        let ledger = Ledger::new(
            storage.clone(),
            Arc::new(ScopeLocks::new()),
            LedgerConfig::default(),
        );
        (ledger, storage, temp)
    }

    fn stored_memory(storage: &Storage, content: &str) -> Memory {
        let memory = Memory::new(
            Ulid::new().to_string(),
            "claude".to_string(),
            content.to_string(),
            Category::Facts,
            Utc::now(),
        );
        let hash = content_hash(&normalize(content));
        storage.put_memory(&memory, &hash, None).unwrap();
        memory
    }

    #[tokio::test]
    async fn test_undo_of_add_deletes_record() {
        let (ledger, storage, _temp) = create_ledger();
        let memory = stored_memory(&storage, "The sky is blue");

        let entry = ledger
            .record(
                OperationKind::Add,
                "claude",
                &memory.memory_id,
                None,
                Some(memory.clone()),
                None,
            )
            .unwrap();

        let outcome = ledger.undo(&entry.undo_id, "claude", "test").await.unwrap();
        assert!(outcome.restored_state.is_none());
        assert!(storage.get_memory(&memory.memory_id).unwrap().is_none());
        assert!(storage
            .find_by_content_hash("claude", Category::Facts, &content_hash(&normalize("The sky is blue")))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_undo_of_update_restores_original() {
        let (ledger, storage, _temp) = create_ledger();
        let original = stored_memory(&storage, "old content");

        let mut updated = original.clone();
        updated.content = "new content".to_string();
        let new_hash = content_hash(&normalize("new content"));
        let old_hash = content_hash(&normalize("old content"));
        storage
            .put_memory(&updated, &new_hash, Some(&old_hash))
            .unwrap();

        let entry = ledger
            .record(
                OperationKind::Update,
                "claude",
                &original.memory_id,
                Some(original.clone()),
                Some(updated),
                None,
            )
            .unwrap();

        let outcome = ledger.undo(&entry.undo_id, "claude", "test").await.unwrap();
        assert_eq!(outcome.restored_state.as_ref().unwrap().content, "old content");

        let current = storage.get_memory(&original.memory_id).unwrap().unwrap();
        assert_eq!(current.content, "old content");
    }

    #[tokio::test]
    async fn test_undo_of_delete_reinserts() {
        let (ledger, storage, _temp) = create_ledger();
        let memory = stored_memory(&storage, "keep me");
        let hash = content_hash(&normalize("keep me"));
        storage.delete_memory(&memory, &hash).unwrap();

        let entry = ledger
            .record(
                OperationKind::Delete,
                "claude",
                &memory.memory_id,
                Some(memory.clone()),
                None,
                None,
            )
            .unwrap();

        ledger.undo(&entry.undo_id, "claude", "test").await.unwrap();
        let current = storage.get_memory(&memory.memory_id).unwrap().unwrap();
        assert_eq!(current.content, "keep me");
    }

    #[tokio::test]
    async fn test_second_undo_is_unavailable() {
        let (ledger, storage, _temp) = create_ledger();
        let memory = stored_memory(&storage, "once only");

        let entry = ledger
            .record(
                OperationKind::Add,
                "claude",
                &memory.memory_id,
                None,
                Some(memory),
                None,
            )
            .unwrap();

        ledger.undo(&entry.undo_id, "claude", "test").await.unwrap();
        let second = ledger.undo(&entry.undo_id, "claude", "test").await;
        assert!(matches!(second, Err(LedgerError::UndoUnavailable(_))));
    }

    #[tokio::test]
    async fn test_unknown_entry_is_unavailable() {
        let (ledger, _, _temp) = create_ledger();
        let result = ledger
            .undo(&Ulid::new().to_string(), "claude", "test")
            .await;
        assert!(matches!(result, Err(LedgerError::UndoUnavailable(_))));
    }

    #[tokio::test]
    async fn test_wrong_agent_is_denied() {
        let (ledger, storage, _temp) = create_ledger();
        let memory = stored_memory(&storage, "mine");

        let entry = ledger
            .record(
                OperationKind::Add,
                "claude",
                &memory.memory_id,
                None,
                Some(memory),
                None,
            )
            .unwrap();

        let result = ledger.undo(&entry.undo_id, "copilot", "test").await;
        assert!(matches!(result, Err(LedgerError::AccessDenied { .. })));
    }

    #[tokio::test]
    async fn test_expired_entry_is_unavailable_and_marked() {
        let (ledger, storage, _temp) = create_ledger();
        let memory = stored_memory(&storage, "too late");

        let now = Utc::now();
        let entry = UndoEntry::new(
            Ulid::new().to_string(),
            None,
            OperationKind::Add,
            "claude".to_string(),
            memory.memory_id.clone(),
            None,
            Some(memory),
            now - Duration::days(8),
            now - Duration::days(1),
        );
        storage.put_undo_entry(&entry).unwrap();

        let result = ledger.undo(&entry.undo_id, "claude", "test").await;
        assert!(matches!(result, Err(LedgerError::UndoUnavailable(_))));

        let stored = storage.get_undo_entry(&entry.undo_id).unwrap().unwrap();
        assert_eq!(stored.status, UndoStatus::Expired);
    }

    #[tokio::test]
    async fn test_chain_replays_newest_first() {
        let (ledger, storage, _temp) = create_ledger();
        let memory = stored_memory(&storage, "v1");

        // v1 -> v2
        let mut v2 = memory.clone();
        v2.content = "v2".to_string();
        storage
            .put_memory(&v2, &content_hash(&normalize("v2")), Some(&content_hash(&normalize("v1"))))
            .unwrap();
        ledger
            .record(
                OperationKind::Update,
                "claude",
                &memory.memory_id,
                Some(memory.clone()),
                Some(v2.clone()),
                Some("batch".to_string()),
            )
            .unwrap();

        // v2 -> v3
        let mut v3 = v2.clone();
        v3.content = "v3".to_string();
        storage
            .put_memory(&v3, &content_hash(&normalize("v3")), Some(&content_hash(&normalize("v2"))))
            .unwrap();
        ledger
            .record(
                OperationKind::Update,
                "claude",
                &memory.memory_id,
                Some(v2),
                Some(v3),
                Some("batch".to_string()),
            )
            .unwrap();

        let steps = ledger.undo_chain("batch", "claude").await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.success()));

        // Both updates reversed: back to v1.
        let current = storage.get_memory(&memory.memory_id).unwrap().unwrap();
        assert_eq!(current.content, "v1");
    }

    #[tokio::test]
    async fn test_chain_stops_at_first_failure() {
        let (ledger, storage, _temp) = create_ledger();
        let memory = stored_memory(&storage, "v1");

        // Older entry already consumed: replay must stop on it.
        let older = ledger
            .record(
                OperationKind::Update,
                "claude",
                &memory.memory_id,
                Some(memory.clone()),
                Some(memory.clone()),
                Some("batch".to_string()),
            )
            .unwrap();
        ledger.undo(&older.undo_id, "claude", "consume").await.unwrap();

        ledger
            .record(
                OperationKind::Update,
                "claude",
                &memory.memory_id,
                Some(memory.clone()),
                Some(memory.clone()),
                Some("batch".to_string()),
            )
            .unwrap();

        let steps = ledger.undo_chain("batch", "claude").await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps[0].success());
        assert!(!steps[1].success());
        assert!(steps[1]
            .result
            .as_ref()
            .unwrap_err()
            .contains("Undo unavailable"));
    }

    #[tokio::test]
    async fn test_unknown_chain_is_not_found() {
        let (ledger, _, _temp) = create_ledger();
        let result = ledger.undo_chain("missing", "claude").await;
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }
}
