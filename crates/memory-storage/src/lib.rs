//! # memory-storage
//!
//! RocksDB-backed authoritative store for memory-mesh.
//!
//! Holds memory records, the per-scope secondary indexes that duplicate
//! detection depends on, and the undo ledger entries. All multi-key
//! mutations go through atomic write batches so an index can never
//! disagree with the record it points at.

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod locks;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use locks::ScopeLocks;
