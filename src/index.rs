//! Dense in-memory vector index with exact nearest-neighbour search.
//!
//! A [`VectorIndex`] is an immutable value: every mutation builds a new
//! index, so a snapshot handed to a reader never changes underneath it.
//! Rows are [`IndexEntry`] values pairing each vector with its record,
//! which keeps vectors and metadata the same length and order by
//! construction.
//!
//! Distances are squared Euclidean (L2²), the metric of a flat L2 index.

use anyhow::{bail, Result};
use std::collections::HashSet;

use crate::models::{EntryRecord, IndexEntry};

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dims: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: Vec::new(),
        }
    }

    /// Build an index from rows, rejecting any vector of the wrong width.
    pub fn from_entries(dims: usize, entries: Vec<IndexEntry>) -> Result<Self> {
        check_dims(dims, &entries)?;
        Ok(Self { dims, entries })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn entry(&self, row: usize) -> Option<&IndexEntry> {
        self.entries.get(row)
    }

    pub fn records(&self) -> impl Iterator<Item = &EntryRecord> {
        self.entries.iter().map(|e| &e.record)
    }

    pub fn contains_document(&self, document_id: &str) -> bool {
        self.records().any(|r| r.document_id == document_id)
    }

    pub fn document_count(&self) -> usize {
        self.records()
            .map(|r| r.document_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// A new index with `added` appended after the existing rows.
    pub fn with_appended(&self, added: Vec<IndexEntry>) -> Result<Self> {
        check_dims(self.dims, &added)?;
        let mut entries = Vec::with_capacity(self.entries.len() + added.len());
        entries.extend(self.entries.iter().cloned());
        entries.extend(added);
        Ok(Self {
            dims: self.dims,
            entries,
        })
    }

    /// A new index without the rows of `document_id`, or `None` when the
    /// document has no rows.
    ///
    /// Stored vectors are reused, so the rebuild costs a copy of the
    /// remaining rows and no re-embedding.
    pub fn without_document(&self, document_id: &str) -> Option<Self> {
        if !self.contains_document(document_id) {
            return None;
        }
        let entries = self
            .entries
            .iter()
            .filter(|e| e.record.document_id != document_id)
            .cloned()
            .collect();
        Some(Self {
            dims: self.dims,
            entries,
        })
    }

    /// Exact brute-force search.
    ///
    /// Returns up to `k` `(row, distance)` pairs, `k` capped to the index
    /// size, ordered by ascending distance. Equal distances keep insertion
    /// order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dims {
            bail!(
                "Query vector has {} dimensions, index expects {}",
                query.len(),
                self.dims
            );
        }
        let k = k.min(self.entries.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(row, e)| (row, squared_l2(query, &e.vector)))
            .collect();

        // Stable sort: ties stay in row order.
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Squared Euclidean distance between two equal-length vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn check_dims(dims: usize, entries: &[IndexEntry]) -> Result<()> {
    if let Some(bad) = entries.iter().find(|e| e.vector.len() != dims) {
        bail!(
            "Vector for {} chunk {} has {} dimensions, index expects {}",
            bad.record.document_id,
            bad.record.chunk_index,
            bad.vector.len(),
            dims
        );
    }
    Ok(())
}
