//! Duplicate resolution: thresholds and tie-break rules that turn a
//! comparison result into a storage decision.

use serde::{Deserialize, Serialize};
use tracing::debug;

use memory_types::{DedupConfig, DuplicateCandidate, MatchKind};

/// What the write path should do with a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Store as a new record
    AcceptNew,
    /// Store as a new record, flagged as related to an existing one
    AcceptRelated { target_id: String },
    /// Do not store; the caller is told the existing id
    RejectDuplicate { target_id: String },
    /// Fold the candidate into the existing record's merge annex
    Merge { target_id: String },
}

/// Apply thresholds to a comparison result.
///
/// - Exact match: reject, report the existing id.
/// - Vector score at or above the merge threshold: merge.
/// - Vector score between floor and merge threshold: accept, related.
/// - No match: accept.
///
/// The estimator never reports a vector match below the floor, but a
/// below-floor score still resolves to `AcceptNew` rather than trusting
/// that invariant across crate boundaries.
pub fn resolve(candidate: &DuplicateCandidate, config: &DedupConfig) -> Decision {
    let decision = match (candidate.kind, candidate.matched.as_ref()) {
        (MatchKind::Exact, Some(target)) => Decision::RejectDuplicate {
            target_id: target.clone(),
        },
        (MatchKind::VectorSimilar, Some(target)) => {
            if candidate.score >= config.merge_threshold {
                Decision::Merge {
                    target_id: target.clone(),
                }
            } else if candidate.score >= config.similarity_floor {
                Decision::AcceptRelated {
                    target_id: target.clone(),
                }
            } else {
                Decision::AcceptNew
            }
        }
        _ => Decision::AcceptNew,
    };

    debug!(
        candidate_id = %candidate.candidate_id,
        kind = ?candidate.kind,
        score = candidate.score,
        ?decision,
        "Resolved candidate"
    );
    decision
}
