//! # docent CLI
//!
//! Ask questions of a private document corpus. Answers come from the
//! uploaded documents when retrieval finds something relevant, and from
//! the generation model's own knowledge otherwise.
//!
//! ## Usage
//!
//! ```bash
//! docent --config ./config/docent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docent init` | Create the database and data directories |
//! | `docent ingest <path>` | Ingest a file or every supported file in a directory |
//! | `docent documents` | List ingested documents |
//! | `docent delete <id>` | Delete a document and drop it from the index |
//! | `docent ask "<question>"` | Answer a question |
//! | `docent search "<query>"` | Show the nearest chunks with scores |
//! | `docent reindex` | Rebuild the vector index from the database |
//! | `docent history` | Recent questions and answers |
//! | `docent stats` | Document, chunk and chat counts |
//! | `docent models ...` | Inspect and manage generation models |
//! | `docent settings ...` | Show or change generation settings |

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docent::app::App;
use docent::config::{self, Config};
use docent::generation::{OllamaClient, PullProgress};
use docent::models::ModelSettingsUpdate;
use docent::{ingest, logging, migrate, store};

/// docent: document-grounded question answering with a local model.
#[derive(Parser)]
#[command(
    name = "docent",
    about = "docent: answer questions from your documents, with a local generation model",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and data directories. Idempotent.
    Init,

    /// Inspect and manage generation models.
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },

    #[command(flatten)]
    App(AppCommand),
}

/// Commands that run against an opened [`App`].
#[derive(Subcommand)]
enum AppCommand {
    /// Ingest a file, or every supported file under a directory.
    ///
    /// Supported formats: txt, csv, pdf, docx, xlsx.
    Ingest {
        path: PathBuf,
    },

    /// List ingested documents.
    Documents,

    /// Delete a document by id.
    Delete {
        id: String,
    },

    /// Ask a question.
    Ask {
        question: String,

        /// Run a second pass that restyles the answer.
        #[arg(long)]
        refine: bool,
    },

    /// Show the nearest chunks for a query.
    Search {
        query: String,

        /// Maximum number of results (defaults to retrieval.top_k).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Rebuild the vector index from every chunk in the database.
    Reindex,

    /// Recent chat history, newest first.
    History {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Document, chunk, index and chat counts.
    Stats,

    /// Show or change generation settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum ModelsAction {
    /// List installed models.
    List,
    /// Check that the generation engine is reachable.
    Status,
    /// Show details for one model.
    Info { name: String },
    /// Download a model.
    Pull { name: String },
    /// Remove an installed model.
    Delete { name: String },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the current settings.
    Show,
    /// Change one or more settings. An empty string clears the fallback
    /// model or system prompt.
    Set {
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long)]
        context_length: Option<i64>,
        #[arg(long)]
        top_p: Option<f64>,
        #[arg(long)]
        top_k: Option<i64>,
        #[arg(long)]
        fallback_model: Option<String>,
        #[arg(long)]
        system_prompt: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&cfg).await?,
        Commands::Models { action } => run_models(&cfg, action).await?,
        Commands::App(command) => {
            let app = App::open(cfg).await?;
            let result = run_app_command(&app, command).await;
            app.close().await;
            result?;
        }
    }

    Ok(())
}

async fn run_init(cfg: &Config) -> Result<()> {
    migrate::run_migrations(cfg).await?;
    std::fs::create_dir_all(&cfg.uploads.dir)?;
    std::fs::create_dir_all(&cfg.index.dir)?;
    println!("Database initialized successfully.");
    Ok(())
}

async fn run_app_command(app: &App, command: AppCommand) -> Result<()> {
    match command {
        AppCommand::Ingest { path } => {
            let summary = ingest::ingest_path(&app.config, &app.pool, &app.kb, &path).await?;
            for r in &summary.reports {
                println!(
                    "{}  {}  {} chunks  {}",
                    r.document_id,
                    r.filename,
                    r.chunks,
                    if r.indexed { "indexed" } else { "NOT indexed (run `docent reindex`)" }
                );
                if let Some(err) = &r.index_error {
                    println!("    index error: {}", err);
                }
            }
            for (file, reason) in &summary.failures {
                println!("failed  {}  {}", file.display(), reason);
            }
            println!(
                "ingested {} file(s), {} failed",
                summary.reports.len(),
                summary.failures.len()
            );
        }
        AppCommand::Documents => {
            let docs = store::list_documents(&app.pool).await?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for d in docs {
                println!(
                    "{}  {}  {}  {} bytes  {} chunks  {}",
                    d.id,
                    d.original_filename,
                    d.file_type,
                    d.file_size,
                    d.chunk_count,
                    if d.is_indexed { "indexed" } else { "unindexed" }
                );
            }
        }
        AppCommand::Delete { id } => {
            if !ingest::delete_document(&app.config, &app.pool, &app.kb, &id).await? {
                bail!("Document not found: {}", id);
            }
            println!("Deleted {}", id);
        }
        AppCommand::Ask { question, refine } => {
            let response = app.chat.ask(&question, None).await?;
            let answer = if refine {
                app.answers.refine_answer(&response.answer, &question).await
            } else {
                response.answer.clone()
            };
            println!("{}", answer);
            println!();
            if let Some(note) = &response.note {
                println!("Note: {}", note);
            }
            for s in &response.sources {
                println!("Source: {} (Score: {:.2})", s.metadata, s.score);
            }
            println!(
                "Model: {}{}",
                response.model_used,
                if response.used_fallback { " (fallback)" } else { "" }
            );
        }
        AppCommand::Search { query, limit } => {
            let k = limit.unwrap_or(app.config.retrieval.top_k);
            let hits = app.kb.search(&query, k).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            let threshold = app.config.retrieval.similarity_threshold;
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.2}] {}{}",
                    i + 1,
                    hit.score,
                    hit.metadata,
                    if hit.is_relevant(threshold) { "" } else { "  (below relevance threshold)" }
                );
                let snippet: String = hit.content.chars().take(200).collect();
                println!("    {}", snippet.replace('\n', " "));
            }
        }
        AppCommand::Reindex => {
            let count = app.kb.reindex_from_store(&app.pool).await?;
            println!("Reindexed {} chunks.", count);
        }
        AppCommand::History { limit } => {
            for record in store::chat_history(&app.pool, limit).await? {
                let when = chrono::DateTime::from_timestamp_millis(record.created_at)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!("[{}] ({}) Q: {}", when, record.source_type, record.question);
                println!("    A: {}", record.answer.lines().next().unwrap_or(""));
                if let Some(sources) = &record.source_documents {
                    println!("    Sources: {}", sources);
                }
            }
        }
        AppCommand::Stats => {
            let dashboard = store::dashboard_stats(&app.pool).await?;
            let chats = store::chat_stats(&app.pool).await?;
            let kb = app.kb.stats().await;
            println!("documents:          {}", dashboard.total_documents);
            println!("chunks:             {}", dashboard.total_chunks);
            println!("indexed chunks:     {}", kb.total_chunks);
            println!("indexed documents:  {}", kb.unique_documents);
            println!("chats:              {}", chats.total);
            println!("  from documents:   {}", chats.from_documents);
            println!("  from ai model:    {}", chats.from_ai_model);
            println!("chats (last 24h):   {}", dashboard.recent_chats);
        }
        AppCommand::Settings { action } => run_settings(app, action).await?,
    }
    Ok(())
}

async fn run_settings(app: &App, action: SettingsAction) -> Result<()> {
    let settings = match action {
        SettingsAction::Show => store::get_model_settings(&app.pool).await?,
        SettingsAction::Set {
            model,
            temperature,
            context_length,
            top_p,
            top_k,
            fallback_model,
            system_prompt,
        } => {
            let update = ModelSettingsUpdate {
                active_model: model,
                temperature,
                context_length,
                top_p,
                top_k,
                fallback_model,
                system_prompt,
            };
            store::update_model_settings(&app.pool, &update).await?
        }
    };
    println!("active_model:   {}", settings.active_model);
    println!("temperature:    {}", settings.temperature);
    println!("context_length: {}", settings.context_length);
    println!("top_p:          {}", settings.top_p);
    println!("top_k:          {}", settings.top_k);
    println!(
        "fallback_model: {}",
        settings.fallback_model.as_deref().unwrap_or("(none)")
    );
    println!(
        "system_prompt:  {}",
        settings.system_prompt.as_deref().unwrap_or("(default)")
    );
    Ok(())
}

async fn run_models(cfg: &Config, action: ModelsAction) -> Result<()> {
    let client = OllamaClient::new(&cfg.generation)?;
    match action {
        ModelsAction::Status => {
            let status = client.check_connection().await;
            println!(
                "{}: {} ({})",
                if status.connected { "connected" } else { "disconnected" },
                status.message,
                client.base_url()
            );
        }
        ModelsAction::List => {
            let models = client.list_models().await?;
            if models.is_empty() {
                println!("No models installed.");
            }
            for m in models {
                println!("{}  {}  {}  {}", m.name, m.size_formatted, m.digest, m.modified_at);
            }
        }
        ModelsAction::Info { name } => match client.model_info(&name).await? {
            Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
            None => bail!("Model not found: {}", name),
        },
        ModelsAction::Pull { name } => {
            client
                .pull_model(&name, |p: &PullProgress| match (p.completed, p.total) {
                    (Some(done), Some(total)) if total > 0 => {
                        println!("{} {:.1}%", p.status, done as f64 * 100.0 / total as f64)
                    }
                    _ => println!("{}", p.status),
                })
                .await?;
            println!("Pulled {}", name);
        }
        ModelsAction::Delete { name } => {
            if !client.delete_model(&name).await? {
                bail!("Failed to delete model: {}", name);
            }
            println!("Deleted {}", name);
        }
    }
    Ok(())
}
