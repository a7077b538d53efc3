//! TOML configuration.
//!
//! Every section has defaults so a minimal file only needs to override
//! what differs. `OLLAMA_BASE_URL` and `DEFAULT_MODEL` in the environment
//! take precedence over `[generation]` values.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/docent.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding the vector blob and its metadata list.
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_dims")]
    pub dims: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            dims: default_dims(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/vector_store")
}
fn default_dims() -> usize {
    384
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    #[serde(default = "default_uploads_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: default_uploads_dir(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("./uploads")
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Trailing words of a flushed chunk carried into the next one.
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_words: default_overlap_words(),
        }
    }
}

fn default_max_tokens() -> usize {
    500
}
fn default_overlap_words() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Score at which a hit is shown as relevant. Display only.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Minimum top score for answering from documents.
    #[serde(default = "default_routing_threshold")]
    pub routing_threshold: f64,
    /// Number of hits placed into the generation context.
    #[serde(default = "default_context_sections")]
    pub context_sections: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            routing_threshold: default_routing_threshold(),
            context_sections: default_context_sections(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_similarity_threshold() -> f64 {
    0.25
}
fn default_routing_threshold() -> f64 {
    0.2
}

/// Document answers never carry more than this many sections of context.
pub const MAX_CONTEXT_SECTIONS: usize = 3;

fn default_context_sections() -> usize {
    MAX_CONTEXT_SECTIONS
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_status_timeout")]
    pub status_timeout_secs: u64,
    #[serde(default = "default_list_timeout")]
    pub list_timeout_secs: u64,
    #[serde(default = "default_generate_timeout")]
    pub generate_timeout_secs: u64,
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,
    #[serde(default = "default_delete_timeout")]
    pub delete_timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_context_length")]
    pub context_length: i64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_sampling_top_k")]
    pub top_k: i64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: default_generation_url(),
            default_model: default_model(),
            status_timeout_secs: default_status_timeout(),
            list_timeout_secs: default_list_timeout(),
            generate_timeout_secs: default_generate_timeout(),
            pull_timeout_secs: default_pull_timeout(),
            delete_timeout_secs: default_delete_timeout(),
            temperature: default_temperature(),
            context_length: default_context_length(),
            top_p: default_top_p(),
            top_k: default_sampling_top_k(),
        }
    }
}

fn default_generation_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3.2:1b".to_string()
}
fn default_status_timeout() -> u64 {
    5
}
fn default_list_timeout() -> u64 {
    10
}
fn default_generate_timeout() -> u64 {
    120
}
fn default_pull_timeout() -> u64 {
    3600
}
fn default_delete_timeout() -> u64 {
    30
}
fn default_temperature() -> f64 {
    0.7
}
fn default_context_length() -> i64 {
    4096
}
fn default_top_p() -> f64 {
    0.9
}
fn default_sampling_top_k() -> i64 {
    40
}

impl ChunkingConfig {
    /// Character budget per chunk (approximately 4 chars per token).
    pub fn max_chars(&self) -> usize {
        self.max_tokens * 4
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
        if !url.trim().is_empty() {
            config.generation.url = url;
        }
    }
    if let Ok(model) = std::env::var("DEFAULT_MODEL") {
        if !model.trim().is_empty() {
            config.generation.default_model = model;
        }
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.index.dims == 0 {
        anyhow::bail!("index.dims must be > 0");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(1..=MAX_CONTEXT_SECTIONS).contains(&config.retrieval.context_sections) {
        anyhow::bail!(
            "retrieval.context_sections must be between 1 and {}",
            MAX_CONTEXT_SECTIONS
        );
    }
    if !(0.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.retrieval.routing_threshold) {
        anyhow::bail!("retrieval.routing_threshold must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, or local.",
            other
        ),
    }

    if config.embedding.provider == "ollama" && config.embedding.model.is_none() {
        anyhow::bail!("embedding.model must be specified when provider is 'ollama'");
    }

    if let Some(dims) = config.embedding.dims {
        if dims != config.index.dims {
            anyhow::bail!(
                "embedding.dims ({}) must match index.dims ({})",
                dims,
                config.index.dims
            );
        }
    }

    if config.generation.default_model.trim().is_empty() {
        anyhow::bail!("generation.default_model must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.chunking.max_tokens, 500);
        assert_eq!(cfg.chunking.max_chars(), 2000);
        assert_eq!(cfg.chunking.overlap_words, 50);
        assert_eq!(cfg.retrieval.top_k, 3);
        assert_eq!(cfg.retrieval.routing_threshold, 0.2);
        assert_eq!(cfg.retrieval.similarity_threshold, 0.25);
        assert_eq!(cfg.index.dims, 384);
        assert_eq!(cfg.generation.generate_timeout_secs, 120);
        assert_eq!(cfg.generation.status_timeout_secs, 5);
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let err = parse("[chunking]\nmax_tokens = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        let err = parse("[retrieval]\nrouting_threshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("routing_threshold"));
    }

    #[test]
    fn test_context_sections_capped_at_three() {
        assert_eq!(parse("").unwrap().retrieval.context_sections, 3);
        assert!(parse("[retrieval]\ncontext_sections = 2\n").is_ok());
        let err = parse("[retrieval]\ncontext_sections = 4\n").unwrap_err();
        assert!(err.to_string().contains("context_sections must be between 1 and 3"));
        assert!(parse("[retrieval]\ncontext_sections = 0\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let err = parse("[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_rejects_dims_mismatch() {
        let err = parse("[embedding]\nprovider = \"local\"\ndims = 768\n").unwrap_err();
        assert!(err.to_string().contains("must match"));
    }
}
