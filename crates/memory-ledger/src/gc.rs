//! Undo ledger garbage collection.
//!
//! A separate, idempotent sweep: pending entries past expiry are marked
//! expired; terminal entries past expiry are removed. Never runs inline
//! with a write path.

use chrono::{DateTime, Utc};
use tracing::info;

use memory_storage::Storage;
use memory_types::UndoStatus;

use crate::error::LedgerError;
use crate::ledger::Ledger;

/// Counts from one GC sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcStats {
    /// Pending entries marked expired
    pub expired: usize,
    /// Terminal entries removed
    pub removed: usize,
}

/// Sweep the ledger once.
pub fn sweep(storage: &Storage, now: DateTime<Utc>) -> Result<GcStats, LedgerError> {
    let mut stats = GcStats::default();

    for entry in storage.undo_entries()? {
        if !entry.is_expired(now) {
            continue;
        }
        match entry.status {
            UndoStatus::Pending => {
                let mut expired = entry.clone();
                expired.status = UndoStatus::Expired;
                storage.put_undo_entry(&expired)?;
                stats.expired += 1;
            }
            UndoStatus::Completed | UndoStatus::Failed | UndoStatus::Expired => {
                storage.delete_undo_entry(&entry)?;
                stats.removed += 1;
            }
        }
    }

    if stats.expired > 0 || stats.removed > 0 {
        info!(
            expired = stats.expired,
            removed = stats.removed,
            "Undo ledger GC sweep complete"
        );
    }
    Ok(stats)
}

impl Ledger {
    /// Run one GC sweep against this ledger's storage.
    pub fn gc_sweep(&self, now: DateTime<Utc>) -> Result<GcStats, LedgerError> {
        sweep(self.storage(), now)
    }
}
