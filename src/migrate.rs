use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::{Config, GenerationConfig};
use crate::db;

/// Open the database, apply the schema, and close it again.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool, &config.generation).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and seed the model settings row. Idempotent.
pub async fn migrate(pool: &SqlitePool, generation: &GenerationConfig) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            original_filename TEXT NOT NULL,
            file_type TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            is_indexed INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '',
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_history (
            id TEXT PRIMARY KEY,
            api_key_id TEXT,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            source_type TEXT NOT NULL,
            source_documents TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS model_settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            active_model TEXT NOT NULL,
            temperature REAL NOT NULL,
            context_length INTEGER NOT NULL,
            top_p REAL NOT NULL,
            top_k INTEGER NOT NULL,
            fallback_model TEXT,
            system_prompt TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT OR IGNORE INTO model_settings
            (id, active_model, temperature, context_length, top_p, top_k, updated_at)
        VALUES (1, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&generation.default_model)
    .bind(generation.temperature)
    .bind(generation.context_length)
    .bind(generation.top_p)
    .bind(generation.top_k)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON document_chunks(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chat_history_created_at ON chat_history(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
