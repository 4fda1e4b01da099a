//! # memory-ledger
//!
//! Audit/undo ledger for memory-mesh.
//!
//! Every automated mutation records pre- and post-state before it
//! commits, so it can be reversed. Entries expire after a retention
//! window; an idempotent garbage-collection sweep reclaims them off the
//! write path.

pub mod error;
pub mod gc;
pub mod ledger;

pub use error::LedgerError;
pub use gc::GcStats;
pub use ledger::{ChainStep, Ledger, UndoOutcome};
