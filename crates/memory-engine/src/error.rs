//! Engine error types.

use thiserror::Error;

use memory_ledger::LedgerError;
use memory_storage::StorageError;

/// Errors surfaced to engine callers.
///
/// A rejected duplicate is not an error: it is a terminal decision
/// reported through `AddOutcome`, carrying the matched memory id.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed request, rejected before similarity estimation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Memory does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller may not see or mutate this memory
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Ledger error
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<memory_types::MemoryError> for EngineError {
    fn from(err: memory_types::MemoryError) -> Self {
        EngineError::Validation(err.to_string())
    }
}
