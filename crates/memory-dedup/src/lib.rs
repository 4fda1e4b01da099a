//! # memory-dedup
//!
//! Duplicate detection for memory-mesh: the similarity estimator and the
//! duplicate resolver.
//!
//! Both halves are pure functions over a snapshot of one (agent,
//! category) scope. The engine serializes writes per scope and handles
//! storage, so a check-then-act race cannot slip between estimation and
//! the write that follows it.

pub mod estimator;
pub mod metrics;
pub mod resolver;

pub use estimator::{content_hash, cosine_similarity, estimate, normalize, ScopeSnapshot};
pub use metrics::{DedupMetrics, DedupMetricsSnapshot};
pub use resolver::{resolve, Decision};
