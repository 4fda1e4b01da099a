//! RocksDB wrapper for memory-mesh storage.
//!
//! Provides:
//! - Database open with column family setup
//! - Atomic write batches keeping records and indexes in step
//! - Scoped scans over (agent, category) for duplicate detection
//! - Undo ledger persistence with chain membership

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use tracing::{debug, info};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_CONTENT_INDEX, CF_MEMORIES, CF_SCOPE_INDEX, CF_UNDO,
    CF_UNDO_CHAINS,
};
use crate::error::StorageError;
use crate::keys::{ChainKey, ContentKey, ScopeKey};
use memory_types::{Memory, UndoEntry};

/// Main storage interface for memory-mesh
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    // ==================== Memory Methods ====================

    /// Store a memory along with its scope and content-hash index entries.
    ///
    /// `replaced_hash` is the content hash the stored record previously
    /// carried (updates, merges, summaries); its index entry is removed in
    /// the same batch so the content index never points at stale content.
    pub fn put_memory(
        &self,
        memory: &Memory,
        content_hash: &str,
        replaced_hash: Option<&str>,
    ) -> Result<(), StorageError> {
        let memories_cf = self.cf(CF_MEMORIES)?;
        let scope_cf = self.cf(CF_SCOPE_INDEX)?;
        let content_cf = self.cf(CF_CONTENT_INDEX)?;

        let scope_key = ScopeKey::new(&memory.agent_id, memory.category, &memory.memory_id);
        let content_key = ContentKey::new(&memory.agent_id, memory.category, content_hash);

        let mut batch = WriteBatch::default();
        batch.put_cf(&memories_cf, memory.memory_id.as_bytes(), memory.to_bytes()?);
        batch.put_cf(&scope_cf, scope_key.to_bytes(), []);

        if let Some(old_hash) = replaced_hash {
            if old_hash != content_hash {
                let old_key = ContentKey::new(&memory.agent_id, memory.category, old_hash);
                batch.delete_cf(&content_cf, old_key.to_bytes());
            }
        }
        batch.put_cf(
            &content_cf,
            content_key.to_bytes(),
            memory.memory_id.as_bytes(),
        );

        self.db.write(batch)?;
        debug!(memory_id = %memory.memory_id, agent = %memory.agent_id, "Stored memory");
        Ok(())
    }

    /// Get a memory by id.
    pub fn get_memory(&self, memory_id: &str) -> Result<Option<Memory>, StorageError> {
        let memories_cf = self.cf(CF_MEMORIES)?;
        match self.db.get_cf(&memories_cf, memory_id.as_bytes())? {
            Some(bytes) => Ok(Some(Memory::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a memory and both of its index entries.
    pub fn delete_memory(&self, memory: &Memory, content_hash: &str) -> Result<(), StorageError> {
        let memories_cf = self.cf(CF_MEMORIES)?;
        let scope_cf = self.cf(CF_SCOPE_INDEX)?;
        let content_cf = self.cf(CF_CONTENT_INDEX)?;

        let scope_key = ScopeKey::new(&memory.agent_id, memory.category, &memory.memory_id);
        let content_key = ContentKey::new(&memory.agent_id, memory.category, content_hash);

        let mut batch = WriteBatch::default();
        batch.delete_cf(&memories_cf, memory.memory_id.as_bytes());
        batch.delete_cf(&scope_cf, scope_key.to_bytes());
        batch.delete_cf(&content_cf, content_key.to_bytes());

        self.db.write(batch)?;
        debug!(memory_id = %memory.memory_id, "Deleted memory");
        Ok(())
    }

    /// All memories in one (agent, category) scope.
    ///
    /// Scans the scope index prefix and fetches each record. Scopes are
    /// per agent and category, so the scan stays small relative to the
    /// full store.
    pub fn memories_in_scope(
        &self,
        agent_id: &str,
        category: memory_types::Category,
    ) -> Result<Vec<Memory>, StorageError> {
        let scope_cf = self.cf(CF_SCOPE_INDEX)?;
        let prefix = ScopeKey::scope_prefix(agent_id, category);

        let mut memories = Vec::new();
        let iter = self
            .db
            .iterator_cf(&scope_cf, IteratorMode::From(&prefix, Direction::Forward));

        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let scope_key = ScopeKey::from_bytes(&key)?;
            if let Some(memory) = self.get_memory(&scope_key.memory_id)? {
                memories.push(memory);
            }
        }

        Ok(memories)
    }

    /// Look up a memory id by scoped content hash. O(1) point read.
    pub fn find_by_content_hash(
        &self,
        agent_id: &str,
        category: memory_types::Category,
        content_hash: &str,
    ) -> Result<Option<String>, StorageError> {
        let content_cf = self.cf(CF_CONTENT_INDEX)?;
        let key = ContentKey::new(agent_id, category, content_hash);
        match self.db.get_cf(&content_cf, key.to_bytes())? {
            Some(bytes) => {
                let id = String::from_utf8(bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Memories whose expiry has passed. Full scan; used only by the
    /// TTL sweep job, never on a write path.
    pub fn expired_memories(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Memory>, StorageError> {
        let memories_cf = self.cf(CF_MEMORIES)?;
        let mut expired = Vec::new();

        let iter = self.db.iterator_cf(&memories_cf, IteratorMode::Start);
        for item in iter {
            let (_, value) = item?;
            let memory = Memory::from_bytes(&value)?;
            if memory.is_expired(now) {
                expired.push(memory);
            }
        }

        Ok(expired)
    }

    // ==================== Undo Ledger Methods ====================

    /// Persist an undo entry, with chain membership if it has a chain.
    pub fn put_undo_entry(&self, entry: &UndoEntry) -> Result<(), StorageError> {
        let undo_cf = self.cf(CF_UNDO)?;
        let chains_cf = self.cf(CF_UNDO_CHAINS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&undo_cf, entry.undo_id.as_bytes(), entry.to_bytes()?);
        if let Some(ref chain_id) = entry.chain_id {
            let chain_key = ChainKey::new(chain_id, &entry.undo_id);
            batch.put_cf(&chains_cf, chain_key.to_bytes(), []);
        }

        self.db.write(batch)?;
        debug!(undo_id = %entry.undo_id, operation = %entry.operation, "Recorded undo entry");
        Ok(())
    }

    /// Get an undo entry by id.
    pub fn get_undo_entry(&self, undo_id: &str) -> Result<Option<UndoEntry>, StorageError> {
        let undo_cf = self.cf(CF_UNDO)?;
        match self.db.get_cf(&undo_cf, undo_id.as_bytes())? {
            Some(bytes) => Ok(Some(UndoEntry::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Entries of one chain, oldest first (ULID order).
    pub fn undo_entries_for_chain(&self, chain_id: &str) -> Result<Vec<UndoEntry>, StorageError> {
        let chains_cf = self.cf(CF_UNDO_CHAINS)?;
        let prefix = ChainKey::chain_prefix(chain_id);

        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(&chains_cf, IteratorMode::From(&prefix, Direction::Forward));

        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let chain_key = ChainKey::from_bytes(&key)?;
            if let Some(entry) = self.get_undo_entry(&chain_key.undo_id)? {
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    /// Every undo entry in the ledger, oldest first. Used by the GC
    /// sweep; never on a write path.
    pub fn undo_entries(&self) -> Result<Vec<UndoEntry>, StorageError> {
        let undo_cf = self.cf(CF_UNDO)?;
        let mut entries = Vec::new();

        let iter = self.db.iterator_cf(&undo_cf, IteratorMode::Start);
        for item in iter {
            let (_, value) = item?;
            entries.push(UndoEntry::from_bytes(&value)?);
        }

        Ok(entries)
    }

    /// Remove an undo entry and its chain membership.
    pub fn delete_undo_entry(&self, entry: &UndoEntry) -> Result<(), StorageError> {
        let undo_cf = self.cf(CF_UNDO)?;
        let chains_cf = self.cf(CF_UNDO_CHAINS)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&undo_cf, entry.undo_id.as_bytes());
        if let Some(ref chain_id) = entry.chain_id {
            let chain_key = ChainKey::new(chain_id, &entry.undo_id);
            batch.delete_cf(&chains_cf, chain_key.to_bytes());
        }

        self.db.write(batch)?;
        debug!(undo_id = %entry.undo_id, "Deleted undo entry");
        Ok(())
    }

    // ==================== Admin ====================

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(&cf)?;
            }
        }
        Ok(())
    }

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let mut stats = StorageStats::default();

        if let Some(cf) = self.db.cf_handle(CF_MEMORIES) {
            stats.memory_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_UNDO) {
            stats.undo_count = self.count_cf_entries(cf)?;
        }

        Ok(stats)
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);
        for item in iter {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Number of memory records
    pub memory_count: u64,
    /// Number of undo ledger entries
    pub undo_count: u64,
}
