//! Ledger error types.

use thiserror::Error;

use memory_storage::StorageError;

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Entry is missing, expired, or already consumed
    #[error("Undo unavailable: {0}")]
    UndoUnavailable(String),

    /// Retry budget exhausted while applying the revert
    #[error("Undo failed after {attempts} attempts: {reason}")]
    UndoFailed { attempts: u32, reason: String },

    /// Caller is not the agent that performed the mutation
    #[error("Access denied: entry {undo_id} belongs to agent {owner}")]
    AccessDenied { undo_id: String, owner: String },

    /// Unknown chain id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
