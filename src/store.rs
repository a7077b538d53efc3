//! Queries against the authoritative store.
//!
//! The SQLite database is the system of record for documents, their
//! chunks, model settings and the chat log. The vector index is derived
//! from it and can always be rebuilt from [`list_all_chunks`].
//!
//! Timestamps are Unix milliseconds.

use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    ChatRecord, Chunk, Document, ModelSettings, ModelSettingsUpdate, NewDocument, SourceChunk,
    SourceType,
};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============ Documents ============

pub async fn insert_document(pool: &SqlitePool, doc: &NewDocument) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO documents (id, filename, original_filename, file_type, file_size, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&doc.filename)
    .bind(&doc.original_filename)
    .bind(&doc.file_type)
    .bind(doc.file_size)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(id)
}

/// Insert all chunks of a document in one transaction.
pub async fn insert_chunks(pool: &SqlitePool, document_id: &str, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for chunk in chunks {
        sqlx::query(
            "INSERT INTO document_chunks (id, document_id, chunk_index, content, metadata) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.content)
        .bind(&chunk.metadata)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn mark_indexed(pool: &SqlitePool, document_id: &str, chunk_count: i64) -> Result<()> {
    sqlx::query("UPDATE documents SET is_indexed = 1, chunk_count = ? WHERE id = ?")
        .bind(chunk_count)
        .bind(document_id)
        .execute(pool)
        .await?;
    Ok(())
}

fn document_from_row(row: &SqliteRow) -> Document {
    let is_indexed: i64 = row.get("is_indexed");
    Document {
        id: row.get("id"),
        filename: row.get("filename"),
        original_filename: row.get("original_filename"),
        file_type: row.get("file_type"),
        file_size: row.get("file_size"),
        chunk_count: row.get("chunk_count"),
        is_indexed: is_indexed != 0,
        created_at: row.get("created_at"),
    }
}

/// All documents, newest first.
pub async fn list_documents(pool: &SqlitePool) -> Result<Vec<Document>> {
    let rows = sqlx::query("SELECT * FROM documents ORDER BY created_at DESC, rowid DESC")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(document_from_row).collect())
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(document_from_row))
}

pub async fn count_documents(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

/// Delete a document and its chunks. Returns `false` if it did not exist.
pub async fn delete_document(pool: &SqlitePool, id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

// ============ Chunks ============

fn source_chunk_from_row(row: &SqliteRow) -> SourceChunk {
    let metadata: String = row.get("metadata");
    let original: String = row.get("original_filename");
    SourceChunk {
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        metadata: if metadata.is_empty() {
            format!("From {}", original)
        } else {
            metadata
        },
    }
}

/// Every chunk, ordered by document creation then chunk index.
pub async fn list_all_chunks(pool: &SqlitePool) -> Result<Vec<SourceChunk>> {
    let rows = sqlx::query(
        r#"
        SELECT c.document_id, c.chunk_index, c.content, c.metadata, d.original_filename
        FROM document_chunks c
        JOIN documents d ON c.document_id = d.id
        ORDER BY d.created_at, d.rowid, c.chunk_index
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(source_chunk_from_row).collect())
}

// ============ Model settings ============

pub async fn get_model_settings(pool: &SqlitePool) -> Result<ModelSettings> {
    let row = sqlx::query("SELECT * FROM model_settings WHERE id = 1")
        .fetch_one(pool)
        .await?;
    Ok(ModelSettings {
        active_model: row.get("active_model"),
        temperature: row.get("temperature"),
        context_length: row.get("context_length"),
        top_p: row.get("top_p"),
        top_k: row.get("top_k"),
        fallback_model: row.get("fallback_model"),
        system_prompt: row.get("system_prompt"),
    })
}

/// Apply a partial update and return the resulting settings.
pub async fn update_model_settings(
    pool: &SqlitePool,
    update: &ModelSettingsUpdate,
) -> Result<ModelSettings> {
    let current = get_model_settings(pool).await?;

    let merged = ModelSettings {
        active_model: update
            .active_model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(current.active_model),
        temperature: update.temperature.unwrap_or(current.temperature),
        context_length: update.context_length.unwrap_or(current.context_length),
        top_p: update.top_p.unwrap_or(current.top_p),
        top_k: update.top_k.unwrap_or(current.top_k),
        fallback_model: merge_clearable(&update.fallback_model, current.fallback_model),
        system_prompt: merge_clearable(&update.system_prompt, current.system_prompt),
    };

    sqlx::query(
        r#"
        UPDATE model_settings SET
            active_model = ?, temperature = ?, context_length = ?, top_p = ?, top_k = ?,
            fallback_model = ?, system_prompt = ?, updated_at = ?
        WHERE id = 1
        "#,
    )
    .bind(&merged.active_model)
    .bind(merged.temperature)
    .bind(merged.context_length)
    .bind(merged.top_p)
    .bind(merged.top_k)
    .bind(&merged.fallback_model)
    .bind(&merged.system_prompt)
    .bind(now_ms())
    .execute(pool)
    .await?;

    Ok(merged)
}

fn merge_clearable(update: &Option<String>, current: Option<String>) -> Option<String> {
    match update {
        None => current,
        Some(v) if v.trim().is_empty() => None,
        Some(v) => Some(v.clone()),
    }
}

// ============ Chat log ============

pub async fn add_chat_record(
    pool: &SqlitePool,
    api_key_id: Option<&str>,
    question: &str,
    answer: &str,
    source_type: SourceType,
    source_documents: Option<&str>,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO chat_history (id, api_key_id, question, answer, source_type, source_documents, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(api_key_id)
    .bind(question)
    .bind(answer)
    .bind(source_type.as_str())
    .bind(source_documents)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(id)
}

/// Most recent chat records, newest first.
pub async fn chat_history(pool: &SqlitePool, limit: i64) -> Result<Vec<ChatRecord>> {
    let rows =
        sqlx::query("SELECT * FROM chat_history ORDER BY created_at DESC, rowid DESC LIMIT ?")
            .bind(limit)
            .fetch_all(pool)
            .await?;
    Ok(rows
        .iter()
        .map(|row| ChatRecord {
            id: row.get("id"),
            api_key_id: row.get("api_key_id"),
            question: row.get("question"),
            answer: row.get("answer"),
            source_type: row.get("source_type"),
            source_documents: row.get("source_documents"),
            created_at: row.get("created_at"),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatStats {
    pub total: i64,
    pub from_documents: i64,
    pub from_ai_model: i64,
}

pub async fn chat_stats(pool: &SqlitePool) -> Result<ChatStats> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN source_type = 'documents' THEN 1 ELSE 0 END), 0) AS from_documents,
            COALESCE(SUM(CASE WHEN source_type = 'ai_model' THEN 1 ELSE 0 END), 0) AS from_ai_model
        FROM chat_history
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(ChatStats {
        total: row.get("total"),
        from_documents: row.get("from_documents"),
        from_ai_model: row.get("from_ai_model"),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_documents: i64,
    pub total_chunks: i64,
    pub total_chats: i64,
    pub recent_chats: i64,
}

pub async fn dashboard_stats(pool: &SqlitePool) -> Result<DashboardStats> {
    let total_documents = count_documents(pool).await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks")
        .fetch_one(pool)
        .await?;
    let total_chats: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_history")
        .fetch_one(pool)
        .await?;
    let recent_chats: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chat_history WHERE created_at >= ?")
            .bind(now_ms() - 24 * 60 * 60 * 1000)
            .fetch_one(pool)
            .await?;
    Ok(DashboardStats {
        total_documents,
        total_chunks,
        total_chats,
        recent_chats,
    })
}
