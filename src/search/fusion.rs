//! Score fusion for hybrid search.
//!
//! BM25 scores are unbounded and corpus dependent while k-NN scores are
//! bounded, so each stream is min-max normalized on its own before the
//! weighted sum:
//!
//! fused(d) = w_bm25 * norm_bm25(d) + w_vec * norm_vec(d)
//!
//! where a document missing from a stream contributes 0 for that stream.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::storage::{RetrievalHit, SourceFields};

/// A document after score fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedCandidate {
    pub document_id: String,
    /// `None` when the document did not appear in the lexical stream.
    pub bm25_score_norm: Option<f32>,
    /// `None` when the document did not appear in the vector stream.
    pub vector_score_norm: Option<f32>,
    pub fused_score: f32,
    pub source_fields: SourceFields,
}

/// Min-max normalize one stream's raw scores into `[0, 1]`.
///
/// A zero-variance stream, including a single hit, maps every member to 1.0.
/// Output order matches input order.
pub fn normalize_min_max(hits: &[RetrievalHit]) -> Vec<f32> {
    if hits.is_empty() {
        return Vec::new();
    }

    let max_score = hits
        .iter()
        .map(|h| h.raw_score)
        .fold(f32::NEG_INFINITY, f32::max);
    let min_score = hits
        .iter()
        .map(|h| h.raw_score)
        .fold(f32::INFINITY, f32::min);

    let range = max_score - min_score;
    if range > 0.0 {
        hits.iter()
            .map(|h| ((h.raw_score - min_score) / range).clamp(0.0, 1.0))
            .collect()
    } else {
        vec![1.0; hits.len()]
    }
}

/// Order by fused score descending, then document id ascending.
pub(crate) fn by_fused_score(a: &FusedCandidate, b: &FusedCandidate) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| a.document_id.cmp(&b.document_id))
}

/// Fuse the lexical and vector streams into one ranked list of at most `top_k`.
///
/// Source fields come from the first stream that returned the document,
/// lexical before vector.
pub fn fuse(
    lexical: Vec<RetrievalHit>,
    vector: Vec<RetrievalHit>,
    bm25_weight: f32,
    vector_weight: f32,
    top_k: usize,
) -> Vec<FusedCandidate> {
    let lexical_norms = normalize_min_max(&lexical);
    let vector_norms = normalize_min_max(&vector);

    let mut candidates: HashMap<String, FusedCandidate> =
        HashMap::with_capacity(lexical.len() + vector.len());

    for (hit, norm) in lexical.into_iter().zip(lexical_norms) {
        let entry = candidates
            .entry(hit.document_id.clone())
            .or_insert_with(|| FusedCandidate {
                document_id: hit.document_id,
                bm25_score_norm: None,
                vector_score_norm: None,
                fused_score: 0.0,
                source_fields: hit.source_fields,
            });
        // a backend can repeat an id; keep the best score
        entry.bm25_score_norm = Some(entry.bm25_score_norm.map_or(norm, |n| n.max(norm)));
    }

    for (hit, norm) in vector.into_iter().zip(vector_norms) {
        let entry = candidates
            .entry(hit.document_id.clone())
            .or_insert_with(|| FusedCandidate {
                document_id: hit.document_id,
                bm25_score_norm: None,
                vector_score_norm: None,
                fused_score: 0.0,
                source_fields: hit.source_fields,
            });
        entry.vector_score_norm = Some(entry.vector_score_norm.map_or(norm, |n| n.max(norm)));
    }

    let mut fused: Vec<FusedCandidate> = candidates
        .into_values()
        .map(|mut c| {
            c.fused_score = bm25_weight * c.bm25_score_norm.unwrap_or(0.0)
                + vector_weight * c.vector_score_norm.unwrap_or(0.0);
            c
        })
        .collect();

    fused.sort_by(by_fused_score);
    fused.truncate(top_k);
    fused
}
