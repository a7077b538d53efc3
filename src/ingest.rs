//! File ingestion and document deletion.
//!
//! Ingesting a file runs: extension check → size check → extraction →
//! chunking → copy into the uploads directory → store rows → knowledge
//! base. A failure in the last step is not fatal: the document stays
//! unindexed in the store and a later `reindex` picks it up.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::extract;
use crate::knowledge::KnowledgeBase;
use crate::models::NewDocument;
use crate::store;

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub chunks: usize,
    pub indexed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub reports: Vec<IngestReport>,
    pub failures: Vec<(PathBuf, String)>,
}

pub async fn ingest_file(
    config: &Config,
    pool: &SqlitePool,
    kb: &KnowledgeBase,
    path: &Path,
) -> Result<IngestReport> {
    let file_type = extract::file_type(path)?;
    let original_filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("Invalid file name: {}", path.display()))?;

    let file_size = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    if file_size > config.uploads.max_file_bytes {
        bail!(
            "File too large: {} is {} bytes (max {})",
            original_filename,
            file_size,
            config.uploads.max_file_bytes
        );
    }

    let source = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || extract::extract_file(&source))
        .await
        .context("Extraction task failed")??;
    let chunks = chunk_text(&text, &original_filename, &config.chunking);
    debug!(file = %original_filename, chunks = chunks.len(), "Extracted and chunked");

    std::fs::create_dir_all(&config.uploads.dir).with_context(|| {
        format!(
            "Failed to create uploads dir: {}",
            config.uploads.dir.display()
        )
    })?;
    let (stored_name, stored_path) =
        copy_to_uploads(path, &config.uploads.dir, &original_filename)?;

    let new_doc = NewDocument {
        filename: stored_name,
        original_filename: original_filename.clone(),
        file_type: file_type.clone(),
        file_size: file_size as i64,
    };
    let stored = async {
        let id = store::insert_document(pool, &new_doc).await?;
        store::insert_chunks(pool, &id, &chunks).await?;
        anyhow::Ok(id)
    }
    .await;
    let document_id = match stored {
        Ok(id) => id,
        Err(e) => {
            let _ = std::fs::remove_file(&stored_path);
            return Err(e.context(format!("Failed to store {}", original_filename)));
        }
    };

    let (indexed, index_error) = match kb.add_document(&document_id, &chunks).await {
        Ok(added) => {
            store::mark_indexed(pool, &document_id, added as i64).await?;
            (true, None)
        }
        Err(e) => {
            let reason = format!("{:#}", e);
            warn!(document_id = %document_id, error = %reason, "Indexing failed, document left unindexed");
            (false, Some(reason))
        }
    };

    info!(
        document_id = %document_id,
        file = %original_filename,
        chunks = chunks.len(),
        indexed,
        "Ingested document"
    );
    Ok(IngestReport {
        document_id,
        filename: original_filename,
        file_type,
        file_size: file_size as i64,
        chunks: chunks.len(),
        indexed,
        index_error,
    })
}

/// Ingest one file, or every supported file under a directory.
///
/// Per-file failures inside a directory are collected, not fatal.
pub async fn ingest_path(
    config: &Config,
    pool: &SqlitePool,
    kb: &KnowledgeBase,
    path: &Path,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();
    if path.is_file() {
        summary.reports.push(ingest_file(config, pool, kb, path).await?);
        return Ok(summary);
    }
    if !path.is_dir() {
        bail!("No such file or directory: {}", path.display());
    }

    let files: Vec<PathBuf> = WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| extract::file_type(p).is_ok())
        .collect();

    for file in files {
        match ingest_file(config, pool, kb, &file).await {
            Ok(report) => summary.reports.push(report),
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(file = %file.display(), error = %reason, "Skipping file");
                summary.failures.push((file, reason));
            }
        }
    }
    Ok(summary)
}

/// Remove a document from the index, the store and the uploads directory.
///
/// Returns `false` if no such document exists.
pub async fn delete_document(
    config: &Config,
    pool: &SqlitePool,
    kb: &KnowledgeBase,
    document_id: &str,
) -> Result<bool> {
    let Some(doc) = store::get_document(pool, document_id).await? else {
        return Ok(false);
    };

    kb.delete_document(document_id).await?;
    store::delete_document(pool, document_id).await?;

    let stored_path = config.uploads.dir.join(&doc.filename);
    match std::fs::remove_file(&stored_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %stored_path.display(), error = %e, "Failed to remove uploaded file"),
    }

    info!(document_id, file = %doc.original_filename, "Deleted document");
    Ok(true)
}

const COPY_ATTEMPTS: usize = 3;

/// Copy `source` into `dir` under a fresh stored name. Never overwrites an
/// existing upload.
fn copy_to_uploads(source: &Path, dir: &Path, original: &str) -> Result<(String, PathBuf)> {
    let mut input = std::fs::File::open(source)
        .with_context(|| format!("Failed to open {}", source.display()))?;
    for _ in 0..COPY_ATTEMPTS {
        let name = stored_filename(original);
        let target = dir.join(&name);
        let mut output = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", target.display()))
            }
        };
        if let Err(e) = std::io::copy(&mut input, &mut output) {
            let _ = std::fs::remove_file(&target);
            return Err(e)
                .with_context(|| format!("Failed to copy {} to uploads", source.display()));
        }
        return Ok((name, target));
    }
    bail!("Could not pick a free upload name for {}", original)
}

/// `<unix_ts>_<8 hex>_<name>` with the name reduced to a safe character set.
fn stored_filename(original: &str) -> String {
    let safe: String = original
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let tag = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        chrono::Utc::now().timestamp(),
        &tag[..8],
        safe.trim_start_matches('.')
    )
}
