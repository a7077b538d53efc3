//! Per-question routing between document-grounded and general answers.
//!
//! ```text
//! SEARCH ──top score >= routing threshold──▶ DOCUMENT_ANSWER
//!    │
//!    └────otherwise (incl. no results)─────▶ GENERAL_ANSWER
//! ```
//!
//! Both branches are terminal. Every question is written to the chat log
//! exactly once with its resolved source type.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::answer::{Answer, AnswerService};
use crate::knowledge::KnowledgeBase;
use crate::models::SourceType;
use crate::score::SearchHit;
use crate::store;

pub const GENERAL_KNOWLEDGE_NOTE: &str =
    "This answer is from AI general knowledge, not from uploaded documents.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    DocumentAnswer,
    GeneralAnswer,
}

impl Route {
    /// `hits` must be sorted best first.
    pub fn decide(hits: &[SearchHit], threshold: f64) -> Route {
        match hits.first() {
            Some(top) if top.score >= threshold => Route::DocumentAnswer,
            _ => Route::GeneralAnswer,
        }
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            Route::DocumentAnswer => SourceType::Documents,
            Route::GeneralAnswer => SourceType::AiModel,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub chunk_index: i64,
    pub score: f64,
    pub metadata: String,
}

impl From<&SearchHit> for SourceRef {
    fn from(hit: &SearchHit) -> Self {
        Self {
            document_id: hit.document_id.clone(),
            chunk_index: hit.chunk_index,
            score: hit.score,
            metadata: hit.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub source_type: SourceType,
    pub model_used: String,
    pub used_fallback: bool,
    pub sources: Vec<SourceRef>,
    pub from_documents: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

pub struct ChatService {
    kb: Arc<KnowledgeBase>,
    answers: Arc<AnswerService>,
    pool: SqlitePool,
    top_k: usize,
    routing_threshold: f64,
}

impl ChatService {
    pub fn new(
        kb: Arc<KnowledgeBase>,
        answers: Arc<AnswerService>,
        pool: SqlitePool,
        top_k: usize,
        routing_threshold: f64,
    ) -> Self {
        Self {
            kb,
            answers,
            pool,
            top_k,
            routing_threshold,
        }
    }

    pub async fn ask(&self, question: &str, api_key_id: Option<&str>) -> Result<ChatResponse> {
        let hits = match self.kb.search(question, self.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Knowledge base search failed, answering from general knowledge");
                Vec::new()
            }
        };

        let route = Route::decide(&hits, self.routing_threshold);
        info!(
            results = hits.len(),
            top_score = ?hits.first().map(|h| h.score),
            route = ?route,
            "Routed question"
        );

        let Answer {
            generation,
            sources,
        } = match route {
            Route::DocumentAnswer => self.answers.answer_from_documents(question, &hits).await?,
            Route::GeneralAnswer => self.answers.answer_from_knowledge(question).await?,
        };

        let answer = generation.answer_text();
        let source_type = route.source_type();
        let descriptors: Vec<String> = sources.iter().map(SearchHit::descriptor).collect();
        let source_documents = (!descriptors.is_empty()).then(|| descriptors.join(", "));

        let id = store::add_chat_record(
            &self.pool,
            api_key_id,
            question,
            &answer,
            source_type,
            source_documents.as_deref(),
        )
        .await?;

        Ok(ChatResponse {
            id,
            question: question.to_string(),
            answer,
            source_type,
            model_used: generation.model_used,
            used_fallback: generation.used_fallback,
            sources: sources.iter().map(SourceRef::from).collect(),
            from_documents: route == Route::DocumentAnswer,
            note: (route == Route::GeneralAnswer).then(|| GENERAL_KNOWLEDGE_NOTE.to_string()),
        })
    }
}
