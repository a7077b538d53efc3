//! Process-start wiring.
//!
//! [`App`] owns every long-lived service object. It is built once per
//! process and handed to command handlers by reference.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::warn;

use crate::answer::AnswerService;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, Embedder};
use crate::generation::{OllamaClient, TextGenerator};
use crate::knowledge::KnowledgeBase;
use crate::migrate;
use crate::router::ChatService;

pub struct App {
    pub config: Config,
    pub pool: SqlitePool,
    pub kb: Arc<KnowledgeBase>,
    pub answers: Arc<AnswerService>,
    pub chat: ChatService,
}

impl App {
    /// Build the app with the configured embedder and the Ollama client.
    pub async fn open(config: Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding, config.index.dims)
            .context("Failed to create embedding provider")?;
        let generator: Arc<dyn TextGenerator> = Arc::new(OllamaClient::new(&config.generation)?);
        Self::with_services(config, embedder, generator).await
    }

    /// Build the app around the given embedder and generator.
    ///
    /// Runs migrations, loads the vector index and, if the index is empty
    /// while the store has documents, rebuilds it. A failed rebuild is
    /// logged and the app starts with an empty index.
    pub async fn with_services(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::migrate(&pool, &config.generation).await?;

        let kb = Arc::new(KnowledgeBase::open(&config, embedder));
        if let Err(e) = kb.ensure_indexed(&pool).await {
            warn!(error = %format!("{:#}", e), "Startup reindex failed; run `docent reindex` to retry");
        }

        let answers = Arc::new(AnswerService::new(
            generator,
            pool.clone(),
            config.retrieval.context_sections,
        ));
        let chat = ChatService::new(
            kb.clone(),
            answers.clone(),
            pool.clone(),
            config.retrieval.top_k,
            config.retrieval.routing_threshold,
        );

        Ok(Self {
            config,
            pool,
            kb,
            answers,
            chat,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
