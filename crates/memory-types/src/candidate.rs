//! Transient duplicate-comparison result.

use serde::{Deserialize, Serialize};

/// How a candidate matched existing content, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Identical normalized content
    Exact,
    /// Embedding similarity at or above the floor
    VectorSimilar,
    /// Nothing at or above the floor
    NoMatch,
}

/// Result of comparing one write attempt against a scope.
///
/// Created per write attempt and consumed immediately by the resolver;
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    /// Id pre-assigned to the incoming memory
    pub candidate_id: String,

    /// Best-matching existing memory, if any
    pub matched: Option<String>,

    pub kind: MatchKind,

    /// Similarity score in [0, 1]; 1.0 for exact matches
    pub score: f32,
}

impl DuplicateCandidate {
    /// A candidate that matched nothing at or above the floor.
    pub fn no_match(candidate_id: String) -> Self {
        Self {
            candidate_id,
            matched: None,
            kind: MatchKind::NoMatch,
            score: 0.0,
        }
    }

    /// An exact content match against `matched_id`.
    pub fn exact(candidate_id: String, matched_id: String) -> Self {
        Self {
            candidate_id,
            matched: Some(matched_id),
            kind: MatchKind::Exact,
            score: 1.0,
        }
    }

    /// A vector-similarity match against `matched_id` with the given score.
    pub fn vector_similar(candidate_id: String, matched_id: String, score: f32) -> Self {
        Self {
            candidate_id,
            matched: Some(matched_id),
            kind: MatchKind::VectorSimilar,
            score,
        }
    }
}
