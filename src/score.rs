//! Distance-to-similarity scoring and ranking.
//!
//! `similarity = 1 / (1 + distance)` maps a non-negative distance into
//! `(0, 1]`, strictly decreasing, with an exact match scoring `1.0`.

use serde::Serialize;

use crate::index::VectorIndex;

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub metadata: String,
    pub score: f64,
    /// Raw L2² distance, kept for diagnostics.
    pub distance: f64,
}

impl SearchHit {
    /// Audit descriptor recorded with document-grounded answers.
    pub fn descriptor(&self) -> String {
        format!("{} (Score: {:.2})", self.metadata, self.score)
    }

    /// Display relevance only; routing uses its own threshold.
    pub fn is_relevant(&self, threshold: f64) -> bool {
        self.score >= threshold
    }
}

pub fn similarity(distance: f64) -> f64 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Turn raw `(row, distance)` pairs into hits sorted by score, highest first.
///
/// Rows missing from `index` are skipped.
pub fn rank(index: &VectorIndex, raw: &[(usize, f32)]) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = raw
        .iter()
        .filter_map(|&(row, distance)| {
            let entry = index.entry(row)?;
            let distance = distance as f64;
            Some(SearchHit {
                document_id: entry.record.document_id.clone(),
                chunk_index: entry.record.chunk_index,
                content: entry.record.content.clone(),
                metadata: entry.record.metadata.clone(),
                score: similarity(distance),
                distance,
            })
        })
        .collect();

    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits
}
