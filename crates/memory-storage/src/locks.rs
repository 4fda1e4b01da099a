//! Per-scope write serialization.
//!
//! Duplicate detection is check-then-act: estimate against a scope, then
//! write. Serializing every mutation path for one (agent, category) key
//! through the same async mutex closes that race; undo takes the same
//! lock so a stale revert cannot clobber a concurrent write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use memory_types::Category;

/// Registry of per-(agent, category) async locks.
///
/// Lock values are created on first use and live for the registry's
/// lifetime; the scope key space is small (agents x categories).
#[derive(Debug, Default)]
pub struct ScopeLocks {
    locks: Mutex<HashMap<(String, Category), Arc<tokio::sync::Mutex<()>>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding one (agent, category) scope.
    ///
    /// Callers hold the returned Arc and await `.lock()` on it; the
    /// registry mutex is only held for the lookup, never across an await.
    pub fn scope(&self, agent_id: &str, category: Category) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry((agent_id.to_string(), category))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
