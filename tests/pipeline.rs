use async_trait::async_trait;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use docent::app::App;
use docent::config::Config;
use docent::embedding::Embedder;
use docent::generation::{GenerateRequest, GenerationError, GenerationErrorKind, TextGenerator};
use docent::models::{ModelSettingsUpdate, SourceType};
use docent::router::GENERAL_KNOWLEDGE_NOTE;
use docent::{ingest, store};

/// Letter-class counts: identical text embeds identically, and texts with
/// different letters end up far apart.
struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 4];
                for b in t.bytes().filter(u8::is_ascii_alphabetic) {
                    v[(b.to_ascii_lowercase() - b'a') as usize % 4] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Fails for the listed models and records every prompt it sees.
#[derive(Default)]
struct FakeGenerator {
    failing: HashSet<String>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl FakeGenerator {
    fn failing(models: &[&str]) -> Self {
        Self {
            failing: models.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError> {
        self.prompts
            .lock()
            .unwrap()
            .push((request.model.clone(), request.prompt.clone()));
        if self.failing.contains(&request.model) {
            return Err(GenerationError::new(
                GenerationErrorKind::Connect,
                "Cannot connect to Ollama",
            ));
        }
        Ok(format!("answer from {}", request.model))
    }
}

fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.db.path = tmp.path().join("data/docent.sqlite");
    config.index.dir = tmp.path().join("data/vector_store");
    config.index.dims = 4;
    config.uploads.dir = tmp.path().join("uploads");
    config.embedding.provider = "disabled".to_string();
    config
}

fn write_file(tmp: &TempDir, name: &str, body: &str) -> PathBuf {
    let dir = tmp.path().join("incoming");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

async fn open(tmp: &TempDir, generator: Arc<FakeGenerator>) -> App {
    App::with_services(test_config(tmp), Arc::new(LetterEmbedder), generator)
        .await
        .unwrap()
}

const RUST_DOC: &str = "Rust ownership rules\n\nBorrowing and lifetimes";

#[tokio::test]
async fn test_empty_knowledge_base_answers_from_general_knowledge() {
    let tmp = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::default());
    let app = open(&tmp, generator.clone()).await;

    assert!(app.kb.search("anything", 3).await.unwrap().is_empty());

    let response = app.chat.ask("What is Rust?", Some("key-1")).await.unwrap();
    assert_eq!(response.source_type, SourceType::AiModel);
    assert!(!response.from_documents);
    assert_eq!(response.note.as_deref(), Some(GENERAL_KNOWLEDGE_NOTE));
    assert!(response.sources.is_empty());
    assert_eq!(response.answer, "answer from llama3.2:1b");

    let calls = generator.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1.contains("not found in the uploaded documents"));

    let history = store::chat_history(&app.pool, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].source_type, "ai_model");
    assert_eq!(history[0].api_key_id.as_deref(), Some("key-1"));
    assert!(history[0].source_documents.is_none());
}

#[tokio::test]
async fn test_matching_question_answers_from_documents() {
    let tmp = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::default());
    let app = open(&tmp, generator.clone()).await;

    let path = write_file(&tmp, "rust.txt", RUST_DOC);
    let report = ingest::ingest_file(&app.config, &app.pool, &app.kb, &path)
        .await
        .unwrap();
    assert!(report.indexed);
    assert_eq!(report.chunks, 1);

    let response = app.chat.ask(RUST_DOC, None).await.unwrap();
    assert_eq!(response.source_type, SourceType::Documents);
    assert!(response.from_documents);
    assert!(response.note.is_none());
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].score, 1.0);

    let (_, prompt) = &generator.calls()[0];
    assert!(prompt.contains("[Section 1]\nRust ownership rules"));
    assert!(prompt.contains("ONLY"));

    let history = store::chat_history(&app.pool, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].source_type, "documents");
    assert_eq!(
        history[0].source_documents.as_deref(),
        Some("Source: rust.txt, Chunk: 1 (Score: 1.00)")
    );
}

#[tokio::test]
async fn test_distant_question_routes_to_general_answer() {
    let tmp = TempDir::new().unwrap();
    let app = open(&tmp, Arc::new(FakeGenerator::default())).await;
    let path = write_file(&tmp, "rust.txt", RUST_DOC);
    ingest::ingest_file(&app.config, &app.pool, &app.kb, &path)
        .await
        .unwrap();

    let question = "z".repeat(40);
    let hits = app.kb.search(&question, 3).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].score < app.config.retrieval.routing_threshold);

    let response = app.chat.ask(&question, None).await.unwrap();
    assert_eq!(response.source_type, SourceType::AiModel);
    assert!(response.note.is_some());
}

#[tokio::test]
async fn test_primary_failure_uses_fallback_model() {
    let tmp = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::failing(&["llama3.2:1b"]));
    let app = open(&tmp, generator.clone()).await;
    store::update_model_settings(
        &app.pool,
        &ModelSettingsUpdate {
            fallback_model: Some("phi3:mini".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let response = app.chat.ask("What is Rust?", None).await.unwrap();
    assert_eq!(response.answer, "answer from phi3:mini");
    assert_eq!(response.model_used, "phi3:mini");
    assert!(response.used_fallback);

    let models: Vec<String> = generator.calls().into_iter().map(|c| c.0).collect();
    assert_eq!(models, vec!["llama3.2:1b", "phi3:mini"]);
}

#[tokio::test]
async fn test_both_models_failing_surfaces_error_as_answer() {
    let tmp = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::failing(&["llama3.2:1b", "phi3:mini"]));
    let app = open(&tmp, generator.clone()).await;
    store::update_model_settings(
        &app.pool,
        &ModelSettingsUpdate {
            fallback_model: Some("phi3:mini".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let response = app.chat.ask("What is Rust?", None).await.unwrap();
    assert_eq!(response.answer, "Error: Cannot connect to Ollama");
    assert_eq!(generator.calls().len(), 2);
    assert_eq!(store::chat_stats(&app.pool).await.unwrap().total, 1);
}

#[tokio::test]
async fn test_refine_failure_returns_original() {
    let tmp = TempDir::new().unwrap();
    let app = open(&tmp, Arc::new(FakeGenerator::failing(&["llama3.2:1b"]))).await;
    let refined = app.answers.refine_answer("original text", "q").await;
    assert_eq!(refined, "original text");
}

#[tokio::test]
async fn test_delete_removes_document_from_search() {
    let tmp = TempDir::new().unwrap();
    let app = open(&tmp, Arc::new(FakeGenerator::default())).await;

    let long_para = |word: &str| vec![word; 450].join(" ");
    let two_chunks = format!("{}\n\n{}", long_para("alpha"), long_para("beta"));
    let a = write_file(&tmp, "a.txt", &two_chunks);
    let b = write_file(&tmp, "b.txt", "gamma delta");
    let doc_a = ingest::ingest_file(&app.config, &app.pool, &app.kb, &a)
        .await
        .unwrap();
    ingest::ingest_file(&app.config, &app.pool, &app.kb, &b)
        .await
        .unwrap();
    assert_eq!(doc_a.chunks, 2);
    assert_eq!(app.kb.len().await, 3);

    assert!(!ingest::delete_document(&app.config, &app.pool, &app.kb, "missing")
        .await
        .unwrap());
    assert_eq!(app.kb.len().await, 3);

    assert!(ingest::delete_document(&app.config, &app.pool, &app.kb, &doc_a.document_id)
        .await
        .unwrap());
    assert_eq!(app.kb.len().await, 1);
    let hits = app.kb.search("alpha", 10).await.unwrap();
    assert!(hits.iter().all(|h| h.document_id != doc_a.document_id));
    assert!(store::get_document(&app.pool, &doc_a.document_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_startup_rebuilds_missing_index_from_store() {
    let tmp = TempDir::new().unwrap();
    let app = open(&tmp, Arc::new(FakeGenerator::default())).await;
    let path = write_file(&tmp, "rust.txt", RUST_DOC);
    ingest::ingest_file(&app.config, &app.pool, &app.kb, &path)
        .await
        .unwrap();
    let index_dir = app.config.index.dir.clone();
    app.close().await;

    fs::remove_dir_all(&index_dir).unwrap();

    let reopened = open(&tmp, Arc::new(FakeGenerator::default())).await;
    assert_eq!(reopened.kb.len().await, 1);
    let hits = reopened.kb.search(RUST_DOC, 1).await.unwrap();
    assert_eq!(hits[0].score, 1.0);

    assert_eq!(reopened.kb.reindex_from_store(&reopened.pool).await.unwrap(), 1);
    assert_eq!(reopened.kb.reindex_from_store(&reopened.pool).await.unwrap(), 1);
    assert_eq!(reopened.kb.len().await, 1);

    let docs = store::list_documents(&reopened.pool).await.unwrap();
    assert!(docs[0].is_indexed);
    assert_eq!(docs[0].chunk_count, 1);
}

#[tokio::test]
async fn test_same_named_files_in_subdirectories_keep_separate_uploads() {
    let tmp = TempDir::new().unwrap();
    let app = open(&tmp, Arc::new(FakeGenerator::default())).await;

    let root = tmp.path().join("incoming");
    for (dir, body) in [("a", "first notes"), ("b", "second notes")] {
        fs::create_dir_all(root.join(dir)).unwrap();
        fs::write(root.join(dir).join("notes.txt"), body).unwrap();
    }
    let summary = ingest::ingest_path(&app.config, &app.pool, &app.kb, &root)
        .await
        .unwrap();
    assert_eq!(summary.reports.len(), 2);
    assert_eq!(fs::read_dir(&app.config.uploads.dir).unwrap().count(), 2);

    let first = &summary.reports[0].document_id;
    let second = &summary.reports[1].document_id;
    assert!(ingest::delete_document(&app.config, &app.pool, &app.kb, first)
        .await
        .unwrap());

    let kept = store::get_document(&app.pool, second).await.unwrap().unwrap();
    let kept_path = app.config.uploads.dir.join(&kept.filename);
    assert_eq!(fs::read_to_string(kept_path).unwrap(), "second notes");
}

#[tokio::test]
async fn test_oversized_file_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.uploads.max_file_bytes = 8;
    let app = App::with_services(
        config,
        Arc::new(LetterEmbedder),
        Arc::new(FakeGenerator::default()),
    )
    .await
    .unwrap();

    let path = write_file(&tmp, "big.txt", "more than eight bytes");
    let err = ingest::ingest_file(&app.config, &app.pool, &app.kb, &path)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("File too large"));
    assert!(store::list_documents(&app.pool).await.unwrap().is_empty());
}
