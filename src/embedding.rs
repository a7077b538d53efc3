//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`LocalProvider`]**: runs the model in-process via fastembed; no network
//!   calls after the one-time model download.
//!
//! Also provides [`vec_to_blob`] / [`blob_to_vec`] used by the index
//! persistence layer.
//!
//! The Ollama provider retries connection failures, 429 and 5xx up to
//! `embedding.max_retries` times, doubling a 500 ms pause each time.
//! Any other status fails at once.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Maps text to fixed-dimension vectors.
///
/// Implementations must be deterministic for a fixed model and return
/// one vector per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embedder.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Embed texts in batches of `batch_size`, checking every vector's width.
pub async fn embed_batched(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = embedder.embed(batch).await?;
        if vectors.len() != batch.len() {
            bail!(
                "Embedding provider returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            );
        }
        for v in &vectors {
            if v.len() != embedder.dims() {
                bail!(
                    "Embedding has {} dimensions, expected {}",
                    v.len(),
                    embedder.dims()
                );
            }
        }
        out.extend(vectors);
    }
    Ok(out)
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider {
    dims: usize,
}

#[async_trait]
impl Embedder for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ Ollama Provider ============

/// First pause between attempts; doubles each retry up to [`MAX_BACKOFF`].
const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(16);

/// Embeddings from an Ollama server's `POST /api/embed`.
///
/// The model must already be pulled (`ollama pull all-minilm`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    endpoint: String,
    max_retries: u32,
    client: reqwest::Client,
}

/// Result of one `/api/embed` call.
enum EmbedAttempt {
    Done(Vec<Vec<f32>>),
    /// Connection failure, 429 or 5xx.
    Transient(anyhow::Error),
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig, dims: usize) -> Result<Self> {
        let Some(model) = config.model.clone() else {
            bail!("embedding.model required for Ollama provider");
        };
        let base = config.url.as_deref().unwrap_or("http://localhost:11434");
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            dims,
            endpoint: format!("{}/api/embed", base.trim_end_matches('/')),
            max_retries: config.max_retries,
            client,
        })
    }

    async fn attempt(&self, body: &serde_json::Value) -> Result<EmbedAttempt> {
        let response = match self.client.post(&self.endpoint).json(body).send().await {
            Ok(r) => r,
            Err(e) => {
                return Ok(EmbedAttempt::Transient(anyhow::anyhow!(
                    "Cannot reach Ollama at {}: {}",
                    self.endpoint,
                    e
                )))
            }
        };
        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response.json().await?;
            return parse_ollama_response(&json).map(EmbedAttempt::Done);
        }
        let detail = response.text().await.unwrap_or_default();
        let err = anyhow::anyhow!("Ollama embed returned {}: {}", status, detail);
        if status.as_u16() == 429 || status.is_server_error() {
            Ok(EmbedAttempt::Transient(err))
        } else {
            Err(err)
        }
    }
}

#[async_trait]
impl Embedder for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let mut backoff = BASE_BACKOFF;
        let mut attempt = 0;
        loop {
            match self.attempt(&body).await? {
                EmbedAttempt::Done(vectors) => return Ok(vectors),
                EmbedAttempt::Transient(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "Ollama embed failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                EmbedAttempt::Transient(e) => {
                    return Err(e.context(format!(
                        "Ollama embedding failed after {} attempts",
                        attempt + 1
                    )))
                }
            }
        }
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let Some(embeddings) = json.get("embeddings").and_then(|e| e.as_array()) else {
        bail!("Invalid Ollama response: missing embeddings array");
    };
    embeddings
        .iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
                .map(|values| {
                    values
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect()
                })
        })
        .collect()
}

// ============ Local Provider (fastembed) ============

/// In-process embedding via fastembed.
///
/// The model is loaded on the first `embed` call and kept for the life
/// of the provider. Loading and inference run on the blocking pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig, dims: usize) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        // Reject unknown names up front rather than on first use.
        config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let fastembed_model = config_to_fastembed_model(&self.model_name)?;
        let batch_size = self.batch_size;
        let texts = texts.to_vec();
        let slot = Arc::clone(&self.model);

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow::anyhow!("Local embedding model lock poisoned"))?;
            if guard.is_none() {
                tracing::info!("loading local embedding model");
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model)
                        .with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("Local embedding model not loaded"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported 384-dimension models: \
             all-minilm-l6-v2, bge-small-en-v1.5, multilingual-e5-small",
            other
        ),
    }
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires the `local-embeddings-fastembed` feature) |
pub fn create_provider(config: &EmbeddingConfig, dims: usize) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider { dims })),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config, dims)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config, dims)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as little-endian f32 bytes.
///
/// ```rust
/// use docent::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
