//! Column family definitions for RocksDB.
//!
//! Each column family isolates data with different access patterns:
//! - memories: authoritative memory records, keyed by memory_id
//! - scope_index: (agent, category) membership for scoped scans
//! - content_index: normalized-content hash to memory_id, per scope
//! - undo: undo ledger entries, keyed by undo_id (ULID, time-ordered)
//! - undo_chains: chain_id membership for chain replay

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for memory records
pub const CF_MEMORIES: &str = "memories";

/// Column family name for the (agent, category) scope index
pub const CF_SCOPE_INDEX: &str = "scope_index";

/// Column family name for the content-hash index
pub const CF_CONTENT_INDEX: &str = "content_index";

/// Column family name for undo ledger entries
pub const CF_UNDO: &str = "undo";

/// Column family name for undo chain membership
pub const CF_UNDO_CHAINS: &str = "undo_chains";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[
    CF_MEMORIES,
    CF_SCOPE_INDEX,
    CF_CONTENT_INDEX,
    CF_UNDO,
    CF_UNDO_CHAINS,
];

/// Options for memory records (compressed; records carry embeddings)
fn memories_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_MEMORIES, memories_options()),
        ColumnFamilyDescriptor::new(CF_SCOPE_INDEX, Options::default()),
        ColumnFamilyDescriptor::new(CF_CONTENT_INDEX, Options::default()),
        ColumnFamilyDescriptor::new(CF_UNDO, memories_options()),
        ColumnFamilyDescriptor::new(CF_UNDO_CHAINS, Options::default()),
    ]
}
