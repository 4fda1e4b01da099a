//! # memory-engine
//!
//! The facade that wires memory-mesh together: validated write paths
//! through duplicate detection, the undo ledger, event fan-out, agent
//! subscriptions, and background maintenance.
//!
//! All mutation paths for one (agent, category) scope are serialized by
//! a per-scope lock held across estimate, resolve, and commit. Events
//! publish after the lock is released; the synchronizer and subscriber
//! handlers never hold a lock a write path depends on.

pub mod engine;
pub mod error;
pub mod maintenance;
pub mod telemetry;

pub use engine::{
    AddMemory, AddOutcome, EventHandler, MemoryEngine, UpdateOutcome, WriteDecision,
};
pub use error::EngineError;
pub use maintenance::{validate_cron_expression, MaintenanceError, MaintenanceScheduler};
pub use telemetry::init_tracing;
