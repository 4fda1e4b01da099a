//! # memory-sync
//!
//! Per-agent visible-state reconciliation for memory-mesh.
//!
//! Consumes published memory events and keeps a per-(agent, memory)
//! visibility view in step with each memory's sharing policy. Concurrent
//! updates resolve last-write-wins by event timestamp with a
//! deterministic event-id tie-break.

pub mod registry;
pub mod synchronizer;
pub mod visibility;

pub use registry::{AgentProfile, AgentRegistry};
pub use synchronizer::{AgentStateSynchronizer, SyncMetrics, SyncMetricsSnapshot};
pub use visibility::Visibility;
