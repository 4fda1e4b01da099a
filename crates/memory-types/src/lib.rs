//! # memory-types
//!
//! Shared domain types for the memory-mesh system:
//! - Memories: content records owned by agents, with sharing policies
//! - Categories: validated tags, rejected at the ingestion boundary
//! - Memory events: immutable facts describing accepted mutations
//! - Undo entries: before/after snapshots enabling reversal
//! - Settings: layered configuration

pub mod candidate;
pub mod category;
pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod undo;

pub use candidate::{DuplicateCandidate, MatchKind};
pub use category::Category;
pub use config::{DedupConfig, LedgerConfig, MaintenanceConfig, PublisherConfig, Settings};
pub use error::MemoryError;
pub use event::{MemoryEvent, MemoryEventType};
pub use memory::{Memory, MergedContent, SharingPolicy};
pub use undo::{OperationKind, UndoEntry, UndoStatus};
