//! Client for the text-generation engine (Ollama HTTP API).
//!
//! | Call | Endpoint | Timeout |
//! |------|----------|---------|
//! | [`OllamaClient::check_connection`] | `GET /api/tags` | status |
//! | [`OllamaClient::list_models`] | `GET /api/tags` | list |
//! | [`OllamaClient::model_info`] | `POST /api/show` | list |
//! | [`TextGenerator::generate`] | `POST /api/generate` | generate |
//! | [`OllamaClient::pull_model`] | `POST /api/pull` (NDJSON stream) | pull |
//! | [`OllamaClient::delete_model`] | `DELETE /api/delete` | delete |
//!
//! Every request carries its own timeout, so a slow generation never
//! holds up a status probe.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::models::ModelSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    Timeout,
    Connect,
    Status(u16),
    Decode,
    Request,
}

/// Why a generation attempt produced no text.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Timeouts, connection failures, 429 and 5xx may succeed on another try.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            GenerationErrorKind::Timeout | GenerationErrorKind::Connect => true,
            GenerationErrorKind::Status(code) => code == 429 || code >= 500,
            GenerationErrorKind::Decode | GenerationErrorKind::Request => false,
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            GenerationErrorKind::Timeout
        } else if e.is_connect() {
            GenerationErrorKind::Connect
        } else if e.is_decode() {
            GenerationErrorKind::Decode
        } else {
            GenerationErrorKind::Request
        };
        let message = match kind {
            GenerationErrorKind::Timeout => {
                "Generation timed out. Try a shorter prompt or faster model.".to_string()
            }
            GenerationErrorKind::Connect => format!("Cannot connect to Ollama: {}", e),
            _ => format!("Error generating response: {}", e),
        };
        Self::new(kind, message)
    }
}

/// Sampling parameters sent as the request's `options` object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingOptions {
    pub temperature: f64,
    #[serde(rename = "num_ctx")]
    pub context_length: i64,
    pub top_p: f64,
    pub top_k: i64,
}

impl From<&ModelSettings> for SamplingOptions {
    fn from(s: &ModelSettings) -> Self {
        Self {
            temperature: s.temperature,
            context_length: s.context_length,
            top_p: s.top_p,
            top_k: s.top_k,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub system: Option<String>,
    pub options: SamplingOptions,
}

impl GenerateRequest {
    /// The same request against another model.
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    options: &'a SamplingOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Produces text for a prompt. One attempt per call; fallback is the caller's job.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstalledModel {
    pub name: String,
    pub size: u64,
    pub size_formatted: String,
    pub modified_at: String,
    /// First 12 characters of the model digest.
    pub digest: String,
    pub details: serde_json::Value,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    modified_at: String,
    #[serde(default)]
    digest: String,
    #[serde(default)]
    details: serde_json::Value,
}

/// One line of a pull progress stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullProgress {
    #[serde(default)]
    pub status: String,
    pub digest: Option<String>,
    pub total: Option<u64>,
    pub completed: Option<u64>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
    status_timeout: Duration,
    list_timeout: Duration,
    generate_timeout: Duration,
    pull_timeout: Duration,
    delete_timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            status_timeout: Duration::from_secs(config.status_timeout_secs),
            list_timeout: Duration::from_secs(config.list_timeout_secs),
            generate_timeout: Duration::from_secs(config.generate_timeout_secs),
            pull_timeout: Duration::from_secs(config.pull_timeout_secs),
            delete_timeout: Duration::from_secs(config.delete_timeout_secs),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe the engine. Never fails; problems are reported in the status.
    pub async fn check_connection(&self) -> ConnectionStatus {
        let result = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.status_timeout)
            .send()
            .await;
        let (connected, message) = match result {
            Ok(resp) if resp.status().is_success() => (true, "Ollama is running".to_string()),
            Ok(resp) => (false, format!("Ollama returned status {}", resp.status().as_u16())),
            Err(e) if e.is_timeout() => (false, "Connection to Ollama timed out".to_string()),
            Err(e) if e.is_connect() => (
                false,
                "Cannot connect to Ollama. Make sure it's running.".to_string(),
            ),
            Err(e) => (false, e.to_string()),
        };
        ConnectionStatus { connected, message }
    }

    pub async fn list_models(&self) -> Result<Vec<InstalledModel>> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.list_timeout)
            .send()
            .await
            .with_context(|| format!("Cannot reach Ollama at {}", self.base_url))?;
        if !resp.status().is_success() {
            bail!("Ollama returned status {}", resp.status().as_u16());
        }
        let tags: TagsResponse = resp.json().await.context("Invalid /api/tags response")?;
        Ok(tags
            .models
            .into_iter()
            .map(|m| InstalledModel {
                size_formatted: format_size(m.size),
                digest: m.digest.chars().take(12).collect(),
                name: m.name,
                size: m.size,
                modified_at: m.modified_at,
                details: m.details,
            })
            .collect())
    }

    /// Details for one model, or `None` if the engine does not know it.
    pub async fn model_info(&self, name: &str) -> Result<Option<serde_json::Value>> {
        let resp = self
            .client
            .post(format!("{}/api/show", self.base_url))
            .json(&serde_json::json!({ "name": name }))
            .timeout(self.list_timeout)
            .send()
            .await
            .with_context(|| format!("Cannot reach Ollama at {}", self.base_url))?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        Ok(Some(resp.json().await.context("Invalid /api/show response")?))
    }

    /// Download a model, reporting each progress line as it arrives.
    pub async fn pull_model(
        &self,
        name: &str,
        mut on_progress: impl FnMut(&PullProgress),
    ) -> Result<()> {
        let mut resp = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .json(&serde_json::json!({ "name": name, "stream": true }))
            .timeout(self.pull_timeout)
            .send()
            .await
            .with_context(|| format!("Cannot reach Ollama at {}", self.base_url))?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Pull failed with status: {}", body.trim());
        }

        let mut pending: Vec<u8> = Vec::new();
        while let Some(bytes) = resp.chunk().await.context("Pull stream interrupted")? {
            pending.extend_from_slice(&bytes);
            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                handle_pull_line(&line, &mut on_progress)?;
            }
        }
        handle_pull_line(&pending, &mut on_progress)
    }

    /// Remove a model. `false` if the engine refused.
    pub async fn delete_model(&self, name: &str) -> Result<bool> {
        let resp = self
            .client
            .delete(format!("{}/api/delete", self.base_url))
            .json(&serde_json::json!({ "name": name }))
            .timeout(self.delete_timeout)
            .send()
            .await
            .with_context(|| format!("Cannot reach Ollama at {}", self.base_url))?;
        Ok(resp.status().is_success())
    }
}

fn handle_pull_line(line: &[u8], on_progress: &mut impl FnMut(&PullProgress)) -> Result<()> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }
    let progress: PullProgress =
        serde_json::from_str(text).with_context(|| format!("Invalid pull progress line: {}", text))?;
    on_progress(&progress);
    if let Some(error) = &progress.error {
        bail!("Pull failed: {}", error);
    }
    Ok(())
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError> {
        let body = GenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
            system: request.system.as_deref().filter(|s| !s.is_empty()),
            options: &request.options,
        };
        debug!(model = %request.model, prompt_chars = request.prompt.len(), "Generating");

        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .timeout(self.generate_timeout)
            .send()
            .await
            .map_err(GenerationError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GenerationError::new(
                GenerationErrorKind::Status(status.as_u16()),
                format!("Ollama returned status {}", status.as_u16()),
            ));
        }

        let parsed: GenerateResponse = resp.json().await.map_err(GenerationError::from_reqwest)?;
        Ok(parsed.response)
    }
}

/// Human-readable byte count, e.g. `1.3 GB`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} PB", size)
}
