//! Undo ledger entry types.
//!
//! Every automated mutation records an entry before it commits, capturing
//! the state it replaced and the state it produced. Entries are consumed
//! by an explicit undo call and expire after a retention window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::Memory;

/// Kind of mutation an undo entry can reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Add,
    Update,
    Delete,
    Merge,
    Summarize,
    PolicyChange,
    /// Automated removal by the TTL sweep
    TtlExpiry,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationKind::Add => "add",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Merge => "merge",
            OperationKind::Summarize => "summarize",
            OperationKind::PolicyChange => "policy_change",
            OperationKind::TtlExpiry => "ttl_expiry",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle of an undo entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoStatus {
    /// Recorded, not yet consumed; the only state undo is valid in
    Pending,
    /// Successfully reversed
    Completed,
    /// Reversal failed after exhausting the retry budget
    Failed,
    /// Passed retention without being consumed
    Expired,
}

/// A reversible record of one mutation.
///
/// `undo_id` is a ULID, so lexicographic order over ids is chronological;
/// chain replay relies on this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoEntry {
    /// Unique identifier (ULID string)
    pub undo_id: String,

    /// Groups entries that should be reversed together
    #[serde(default)]
    pub chain_id: Option<String>,

    /// The mutation this entry reverses
    pub operation: OperationKind,

    /// Agent that performed the mutation
    pub agent_id: String,

    /// Memory the mutation applied to
    pub memory_id: String,

    /// State before the mutation (`None` for creations)
    #[serde(default)]
    pub original_state: Option<Memory>,

    /// State after the mutation (`None` for deletions)
    #[serde(default)]
    pub new_state: Option<Memory>,

    /// When the entry was recorded
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    /// End of the retention window
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,

    pub status: UndoStatus,
}

impl UndoEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        undo_id: String,
        chain_id: Option<String>,
        operation: OperationKind,
        agent_id: String,
        memory_id: String,
        original_state: Option<Memory>,
        new_state: Option<Memory>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            undo_id,
            chain_id,
            operation,
            agent_id,
            memory_id,
            original_state,
            new_state,
            created_at,
            expires_at,
            status: UndoStatus::Pending,
        }
    }

    /// Whether the retention window has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether undo is still valid for this entry.
    pub fn is_undoable(&self, now: DateTime<Utc>) -> bool {
        self.status == UndoStatus::Pending && !self.is_expired(now)
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
