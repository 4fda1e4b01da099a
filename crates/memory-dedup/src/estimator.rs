//! Similarity estimation against one (agent, category) scope.
//!
//! Two signals: an exact-match signal over normalized content hashes and
//! a vector-similarity signal over embeddings. Exact identity always
//! beats embedding proximity, however high the cosine score.

use sha2::{Digest, Sha256};
use tracing::debug;

use memory_types::{DedupConfig, DuplicateCandidate};

/// Normalize content for identity comparison: trim, lowercase, collapse
/// whitespace runs to a single space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Hex SHA-256 of normalized content. Stable across processes, so it can
/// be persisted in the content-hash index.
pub fn content_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Cosine similarity clamped to [0, 1].
///
/// Returns `None` for mismatched dimensions or a zero-magnitude vector;
/// the caller treats that as "no vector signal", not as an error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    Some((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0))
}

/// Snapshot of one (agent, category) scope at estimation time.
///
/// `exact_match` is the id of an existing memory with identical
/// normalized content, resolved by the caller through the O(1)
/// content-hash index and verified against the stored record.
/// `embeddings` carries every embedded memory in the scope.
#[derive(Debug, Clone, Default)]
pub struct ScopeSnapshot {
    pub exact_match: Option<String>,
    pub embeddings: Vec<(String, Vec<f32>)>,
}

impl ScopeSnapshot {
    pub fn new(exact_match: Option<String>, embeddings: Vec<(String, Vec<f32>)>) -> Self {
        Self {
            exact_match,
            embeddings,
        }
    }
}

/// Estimate how a candidate relates to its scope.
///
/// Pure over the snapshot; no side effects. An exact match wins over any
/// vector match. The vector signal reports only the single
/// highest-scoring match at or above the similarity floor; everything
/// below the floor is `NoMatch` even though it was computed. A missing
/// or mis-sized candidate embedding skips the vector signal entirely.
pub fn estimate(
    candidate_id: &str,
    candidate_embedding: Option<&[f32]>,
    snapshot: &ScopeSnapshot,
    config: &DedupConfig,
) -> DuplicateCandidate {
    if let Some(ref matched_id) = snapshot.exact_match {
        return DuplicateCandidate::exact(candidate_id.to_string(), matched_id.clone());
    }

    let embedding = match candidate_embedding {
        Some(e) => e,
        None => {
            debug!(candidate_id, "No candidate embedding, skipping vector signal");
            return DuplicateCandidate::no_match(candidate_id.to_string());
        }
    };

    if let Some(expected) = config.embedding_dimension {
        if embedding.len() != expected {
            debug!(
                candidate_id,
                expected,
                actual = embedding.len(),
                "Embedding dimension mismatch, skipping vector signal"
            );
            return DuplicateCandidate::no_match(candidate_id.to_string());
        }
    }

    let mut best: Option<(&str, f32)> = None;
    for (memory_id, existing) in &snapshot.embeddings {
        if let Some(score) = cosine_similarity(embedding, existing) {
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((memory_id, score));
            }
        }
    }

    match best {
        Some((memory_id, score)) if score >= config.similarity_floor => {
            DuplicateCandidate::vector_similar(
                candidate_id.to_string(),
                memory_id.to_string(),
                score,
            )
        }
        _ => DuplicateCandidate::no_match(candidate_id.to_string()),
    }
}
