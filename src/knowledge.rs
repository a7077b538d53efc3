//! The knowledge base: embedder, vector index and its durable pair behind
//! one service object.
//!
//! # Locking
//!
//! The live index is an `Arc<VectorIndex>` behind a read-write lock.
//! Readers clone the `Arc` and search that snapshot without holding the
//! lock, so a search always runs against one complete index. Writers
//! serialize on a separate writer mutex, build a new index, persist it,
//! and only then swap the `Arc`. A failed persist leaves the previous
//! index in place on both sides.
//!
//! # Recovery
//!
//! A missing or corrupt persisted pair loads as an empty index.
//! [`KnowledgeBase::ensure_indexed`] rebuilds from the authoritative store
//! when the index is empty but the store is not.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::{embed_batched, embed_query, Embedder};
use crate::index::VectorIndex;
use crate::models::{Chunk, EntryRecord, IndexEntry, SourceChunk};
use crate::persist::IndexFiles;
use crate::score::{rank, SearchHit};
use crate::store;

const PERSIST_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStats {
    pub total_chunks: usize,
    pub unique_documents: usize,
    pub index_size: usize,
}

pub struct KnowledgeBase {
    embedder: Arc<dyn Embedder>,
    files: IndexFiles,
    dims: usize,
    batch_size: usize,
    current: RwLock<Arc<VectorIndex>>,
    writer: Mutex<()>,
}

impl KnowledgeBase {
    /// Load the persisted index, or start empty if it is absent or unreadable.
    pub fn open(config: &Config, embedder: Arc<dyn Embedder>) -> Self {
        let dims = config.index.dims;
        let files = IndexFiles::new(&config.index.dir);

        let index = match files.load(dims) {
            Ok(Some(index)) => {
                info!(
                    chunks = index.len(),
                    documents = index.document_count(),
                    "Loaded vector index"
                );
                index
            }
            Ok(None) => {
                info!(dir = %files.dir().display(), "No vector index on disk, starting empty");
                VectorIndex::new(dims)
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Vector index unreadable, starting empty; run reindex to recover");
                VectorIndex::new(dims)
            }
        };

        Self {
            embedder,
            files,
            dims,
            batch_size: config.embedding.batch_size,
            current: RwLock::new(Arc::new(index)),
            writer: Mutex::new(()),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// A consistent view of the index at this moment.
    pub async fn snapshot(&self) -> Arc<VectorIndex> {
        self.current.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshot().await.is_empty()
    }

    pub async fn stats(&self) -> KnowledgeStats {
        let index = self.snapshot().await;
        KnowledgeStats {
            total_chunks: index.len(),
            unique_documents: index.document_count(),
            index_size: index.len(),
        }
    }

    /// Embed and append a document's chunks. Returns the number added.
    pub async fn add_document(&self, document_id: &str, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size)
            .await
            .context("Failed to embed document chunks")?;

        let added: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                record: EntryRecord {
                    document_id: document_id.to_string(),
                    chunk_index: chunk.chunk_index,
                    content: chunk.content.clone(),
                    metadata: chunk.metadata.clone(),
                },
                vector,
            })
            .collect();

        let _guard = self.writer.lock().await;
        let next = self.snapshot().await.with_appended(added)?;
        self.commit(next).await?;
        debug!(document_id, chunks = chunks.len(), "Added document to index");
        Ok(chunks.len())
    }

    /// Nearest chunks to `query`, best first. Empty when the index is empty.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let index = self.snapshot().await;
        if index.is_empty() {
            debug!("Search against empty knowledge base");
            return Ok(Vec::new());
        }

        let vector = embed_query(self.embedder.as_ref(), query)
            .await
            .context("Failed to embed query")?;
        let hits = tokio::task::spawn_blocking(move || -> Result<Vec<SearchHit>> {
            let raw = index.search(&vector, k)?;
            Ok(rank(&index, &raw))
        })
        .await
        .context("Search task failed")??;

        debug!(results = hits.len(), top = ?hits.first().map(|h| h.score), "Search complete");
        Ok(hits)
    }

    /// Drop every row of `document_id`. `false` if the document had none.
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let Some(next) = self.snapshot().await.without_document(document_id) else {
            return Ok(false);
        };
        self.commit(next).await?;
        info!(document_id, "Removed document from index");
        Ok(true)
    }

    /// Replace the whole index with embeddings of `chunks`, in order.
    pub async fn reindex_from_source(&self, chunks: &[SourceChunk]) -> Result<usize> {
        let _guard = self.writer.lock().await;

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size)
            .await
            .context("Failed to embed chunks for reindex")?;
        let entries = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                record: EntryRecord {
                    document_id: chunk.document_id.clone(),
                    chunk_index: chunk.chunk_index,
                    content: chunk.content.clone(),
                    metadata: chunk.metadata.clone(),
                },
                vector,
            })
            .collect();

        let next = VectorIndex::from_entries(self.dims, entries)?;
        let count = next.len();
        self.commit(next).await?;
        Ok(count)
    }

    /// Rebuild from every chunk in the store and mark each document indexed.
    pub async fn reindex_from_store(&self, pool: &SqlitePool) -> Result<usize> {
        let chunks = store::list_all_chunks(pool).await?;
        info!(chunks = chunks.len(), "Reindexing from store");
        let count = self.reindex_from_source(&chunks).await?;

        let mut per_document: HashMap<&str, i64> = HashMap::new();
        for chunk in &chunks {
            *per_document.entry(chunk.document_id.as_str()).or_default() += 1;
        }
        for (document_id, chunk_count) in per_document {
            store::mark_indexed(pool, document_id, chunk_count).await?;
        }

        info!(chunks = count, "Reindex complete");
        Ok(count)
    }

    /// Rebuild from the store when the index is empty but documents exist.
    ///
    /// Returns the number of chunks indexed, or `None` if nothing was needed.
    pub async fn ensure_indexed(&self, pool: &SqlitePool) -> Result<Option<usize>> {
        if !self.is_empty().await {
            return Ok(None);
        }
        if store::count_documents(pool).await? == 0 {
            return Ok(None);
        }
        info!("Vector index empty but store has documents, reindexing");
        Ok(Some(self.reindex_from_store(pool).await?))
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.commit(VectorIndex::new(self.dims)).await
    }

    /// Persist `next`, then make it the live index. Caller holds the writer lock.
    async fn commit(&self, next: VectorIndex) -> Result<()> {
        let next = Arc::new(next);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let files = self.files.clone();
            let index = next.clone();
            let saved = tokio::task::spawn_blocking(move || files.save(&index))
                .await
                .context("Persist task failed")?;
            match saved {
                Ok(()) => break,
                Err(e) if attempt < PERSIST_ATTEMPTS => {
                    warn!(attempt, error = %format!("{:#}", e), "Persisting vector index failed, retrying");
                }
                Err(e) => return Err(e.context("Failed to persist vector index")),
            }
        }
        *self.current.write().await = next;
        Ok(())
    }
}
