//! Key encoding and decoding for the storage layer.
//!
//! Index key format: `{agent_id}:{category}:{suffix}`, which makes a
//! RocksDB prefix iteration over `{agent_id}:{category}:` a scoped scan.
//! Agent and chain ids are validated at the engine boundary to exclude
//! the `:` separator; categories and ULIDs cannot contain it.

use memory_types::Category;
use ulid::Ulid;

use crate::error::StorageError;

/// Scope index key: membership of a memory in an (agent, category) scope.
/// Format: `{agent_id}:{category}:{memory_id}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeKey {
    pub agent_id: String,
    pub category: Category,
    pub memory_id: String,
}

impl ScopeKey {
    pub fn new(agent_id: &str, category: Category, memory_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            category,
            memory_id: memory_id.to_string(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}:{}:{}", self.agent_id, self.category, self.memory_id).into_bytes()
    }

    /// Prefix covering every memory in one (agent, category) scope.
    pub fn scope_prefix(agent_id: &str, category: Category) -> Vec<u8> {
        format!("{}:{}:", agent_id, category).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let parts: Vec<&str> = s.splitn(3, ':').collect();
        if parts.len() != 3 {
            return Err(StorageError::Key(format!("Invalid scope key: {}", s)));
        }
        let category: Category = parts[1]
            .parse()
            .map_err(|_| StorageError::Key(format!("Invalid category in key: {}", parts[1])))?;
        // Reject malformed memory ids early rather than at fetch time.
        let _: Ulid = parts[2]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid memory_id ULID: {}", e)))?;
        Ok(Self {
            agent_id: parts[0].to_string(),
            category,
            memory_id: parts[2].to_string(),
        })
    }
}

/// Content-hash index key. Format: `{agent_id}:{category}:{hash_hex}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKey {
    pub agent_id: String,
    pub category: Category,
    pub content_hash: String,
}

impl ContentKey {
    pub fn new(agent_id: &str, category: Category, content_hash: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            category,
            content_hash: content_hash.to_string(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}:{}:{}", self.agent_id, self.category, self.content_hash).into_bytes()
    }
}

/// Undo chain membership key. Format: `{chain_id}:{undo_id}`
///
/// ULID undo ids sort chronologically, so a forward prefix scan yields
/// chain members oldest-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainKey {
    pub chain_id: String,
    pub undo_id: String,
}

impl ChainKey {
    pub fn new(chain_id: &str, undo_id: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            undo_id: undo_id.to_string(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}:{}", self.chain_id, self.undo_id).into_bytes()
    }

    pub fn chain_prefix(chain_id: &str) -> Vec<u8> {
        format!("{}:", chain_id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let (chain_id, undo_id) = s
            .rsplit_once(':')
            .ok_or_else(|| StorageError::Key(format!("Invalid chain key: {}", s)))?;
        let _: Ulid = undo_id
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid undo_id ULID: {}", e)))?;
        Ok(Self {
            chain_id: chain_id.to_string(),
            undo_id: undo_id.to_string(),
        })
    }
}
