//! Durable storage for a [`VectorIndex`].
//!
//! Two artifacts live side by side in the index directory:
//!
//! | File | Contents |
//! |------|----------|
//! | `vectors.bin` | every vector as little-endian f32, row-major |
//! | `records.json` | dims, row count, SHA-256 of `vectors.bin`, and the records in row order |
//!
//! Both are written to temporary files, flushed, then renamed into place.
//! The digest in `records.json` binds the pair: if a crash lands between
//! the two renames, the digest no longer matches and the pair is rejected
//! as a whole.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::index::VectorIndex;
use crate::models::{EntryRecord, IndexEntry};

const FORMAT_VERSION: u32 = 1;
const VECTORS_FILE: &str = "vectors.bin";
const RECORDS_FILE: &str = "records.json";

#[derive(Serialize, Deserialize)]
struct RecordsFile {
    version: u32,
    dims: usize,
    count: usize,
    vectors_sha256: String,
    records: Vec<EntryRecord>,
}

/// Locations of the artifact pair for one index directory.
#[derive(Debug, Clone)]
pub struct IndexFiles {
    dir: PathBuf,
}

impl IndexFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    pub fn records_path(&self) -> PathBuf {
        self.dir.join(RECORDS_FILE)
    }

    /// Write both artifacts, replacing any previous pair.
    pub fn save(&self, index: &VectorIndex) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create index dir: {}", self.dir.display()))?;

        let mut blob = Vec::with_capacity(index.len() * index.dims() * 4);
        for entry in index.entries() {
            blob.extend_from_slice(&vec_to_blob(&entry.vector));
        }

        let records = RecordsFile {
            version: FORMAT_VERSION,
            dims: index.dims(),
            count: index.len(),
            vectors_sha256: sha256_hex(&blob),
            records: index.records().cloned().collect(),
        };
        let json = serde_json::to_vec(&records)?;

        let vectors_tmp = self.dir.join(format!("{}.tmp", VECTORS_FILE));
        let records_tmp = self.dir.join(format!("{}.tmp", RECORDS_FILE));
        write_synced(&vectors_tmp, &blob)?;
        write_synced(&records_tmp, &json)?;

        fs::rename(&vectors_tmp, self.vectors_path())
            .with_context(|| format!("Failed to replace {}", self.vectors_path().display()))?;
        fs::rename(&records_tmp, self.records_path())
            .with_context(|| format!("Failed to replace {}", self.records_path().display()))?;
        Ok(())
    }

    /// Read the pair back.
    ///
    /// Returns `Ok(None)` when either artifact is absent and an error when
    /// they exist but are unreadable, inconsistent, or of another width.
    pub fn load(&self, dims: usize) -> Result<Option<VectorIndex>> {
        let vectors_path = self.vectors_path();
        let records_path = self.records_path();
        if !vectors_path.exists() || !records_path.exists() {
            return Ok(None);
        }

        let blob = fs::read(&vectors_path)
            .with_context(|| format!("Failed to read {}", vectors_path.display()))?;
        let json = fs::read(&records_path)
            .with_context(|| format!("Failed to read {}", records_path.display()))?;
        let file: RecordsFile = serde_json::from_slice(&json)
            .with_context(|| format!("Failed to parse {}", records_path.display()))?;

        if file.version != FORMAT_VERSION {
            bail!("Unsupported index format version {}", file.version);
        }
        if file.dims != dims {
            bail!(
                "Persisted index has {} dimensions, configured {}",
                file.dims,
                dims
            );
        }
        if file.records.len() != file.count {
            bail!(
                "Record list has {} rows, header says {}",
                file.records.len(),
                file.count
            );
        }
        if blob.len() != file.count * dims * 4 {
            bail!(
                "Vector blob is {} bytes, expected {} rows of {} dimensions",
                blob.len(),
                file.count,
                dims
            );
        }
        if sha256_hex(&blob) != file.vectors_sha256 {
            bail!("Vector blob does not match its record list");
        }

        let entries = file
            .records
            .into_iter()
            .zip(blob.chunks_exact(dims * 4))
            .map(|(record, bytes)| IndexEntry {
                record,
                vector: blob_to_vec(bytes),
            })
            .collect();
        Ok(Some(VectorIndex::from_entries(dims, entries)?))
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {}", path.display()))?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
