//! Prompt construction and generation with a single-level model fallback.
//!
//! Model settings are read from the store on every call, so a settings
//! change applies to the next question without a restart.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::generation::{GenerateRequest, GenerationError, SamplingOptions, TextGenerator};
use crate::models::ModelSettings;
use crate::score::SearchHit;
use crate::store;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a precision-focused AI assistant for document analysis.
Your primary directive is to provide accurate answers based SOLELY on the provided document context.
Do not hallucinate or provide general knowledge unless explicitly asked when no context is available.
Focus on specific details, numbers, and facts from the text.";

/// Outcome of a generation, including which model answered.
#[derive(Debug, Clone)]
pub struct Generation {
    pub model_used: String,
    pub used_fallback: bool,
    pub outcome: Result<String, GenerationError>,
}

impl Generation {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Text to show the user. A failure after fallback becomes the answer.
    pub fn answer_text(&self) -> String {
        match &self.outcome {
            Ok(text) => text.clone(),
            Err(e) => format!("Error: {}", e),
        }
    }
}

/// Try `request` once, then once more against `fallback` if the first
/// attempt failed and a fallback model is set.
pub async fn generate_with_fallback(
    generator: &dyn TextGenerator,
    request: &GenerateRequest,
    fallback: Option<&str>,
) -> Generation {
    let primary = generator.generate(request).await;
    let error = match primary {
        Ok(text) => {
            return Generation {
                model_used: request.model.clone(),
                used_fallback: false,
                outcome: Ok(text),
            }
        }
        Err(e) => e,
    };

    let Some(fallback) = fallback.filter(|m| !m.trim().is_empty()) else {
        warn!(model = %request.model, error = %error, "Generation failed, no fallback model configured");
        return Generation {
            model_used: request.model.clone(),
            used_fallback: false,
            outcome: Err(error),
        };
    };

    warn!(
        model = %request.model,
        fallback,
        retryable = error.is_retryable(),
        error = %error,
        "Generation failed, trying fallback model"
    );
    let outcome = generator.generate(&request.with_model(fallback)).await;
    if let Err(e) = &outcome {
        warn!(model = fallback, error = %e, "Fallback generation failed");
    }
    Generation {
        model_used: fallback.to_string(),
        used_fallback: true,
        outcome,
    }
}

/// `[Section i]`-labelled context from the first `sections` hits.
pub fn build_context(hits: &[SearchHit], sections: usize) -> String {
    hits.iter()
        .take(sections)
        .enumerate()
        .map(|(i, hit)| format!("[Section {}]\n{}", i + 1, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn context_prompt(question: &str, context: &str) -> String {
    format!(
        "You are a specialized Knowledge Base assistant. Your goal is to answer the question using ONLY the provided context snippets.

STRICT INSTRUCTIONS:
1. Use ONLY the information in the Context sections below.
2. Do NOT add outside knowledge or general assumptions.
3. Be precise and specific. Avoid general inputs.
4. If the answer is not in the context, state \"I cannot find specific information about this in the provided documents.\"
5. Quote specific values, definitions, or steps from the text if available.

Context:
{context}

Question: {question}

Detailed Answer (based ONLY on context):"
    )
}

pub fn general_prompt(question: &str) -> String {
    format!(
        "The user asked a question that could not be found in the uploaded documents.
Please provide the best possible answer based on your general knowledge.
Start your response by briefly noting that this information was not found in the uploaded documents.

Question: {question}

Provide a helpful, accurate, and well-structured answer:"
    )
}

pub fn refine_prompt(question: &str, answer: &str) -> String {
    format!(
        "Please refine and improve the following answer to make it clearer,
more concise, and better structured. Keep the same information but improve the presentation.

Original Question: {question}

Original Answer: {answer}

Refined Answer:"
    )
}

/// A generated answer plus the hits that were placed in its context.
#[derive(Debug, Clone)]
pub struct Answer {
    pub generation: Generation,
    pub sources: Vec<SearchHit>,
}

pub struct AnswerService {
    generator: Arc<dyn TextGenerator>,
    pool: SqlitePool,
    context_sections: usize,
}

impl AnswerService {
    pub fn new(generator: Arc<dyn TextGenerator>, pool: SqlitePool, context_sections: usize) -> Self {
        Self {
            generator,
            pool,
            context_sections,
        }
    }

    pub async fn settings(&self) -> Result<ModelSettings> {
        store::get_model_settings(&self.pool).await
    }

    /// Generate for `prompt` under the current settings, with fallback.
    pub async fn generate(&self, prompt: String) -> Result<Generation> {
        let settings = self.settings().await?;
        let system = settings
            .system_prompt
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let request = GenerateRequest {
            model: settings.active_model.clone(),
            prompt,
            system: Some(system),
            options: SamplingOptions::from(&settings),
        };
        Ok(generate_with_fallback(
            self.generator.as_ref(),
            &request,
            settings.fallback_model.as_deref(),
        )
        .await)
    }

    /// Answer constrained to the top hits.
    pub async fn answer_from_documents(&self, question: &str, hits: &[SearchHit]) -> Result<Answer> {
        let sources: Vec<SearchHit> = hits.iter().take(self.context_sections).cloned().collect();
        let context = build_context(&sources, self.context_sections);
        let generation = self.generate(context_prompt(question, &context)).await?;
        Ok(Answer {
            generation,
            sources,
        })
    }

    /// Answer from the model's own knowledge, noting the documents had nothing.
    pub async fn answer_from_knowledge(&self, question: &str) -> Result<Answer> {
        let generation = self.generate(general_prompt(question)).await?;
        Ok(Answer {
            generation,
            sources: Vec::new(),
        })
    }

    /// Restyle an answer. Any failure returns `answer` unchanged.
    pub async fn refine_answer(&self, answer: &str, question: &str) -> String {
        match self.generate(refine_prompt(question, answer)).await {
            Ok(Generation {
                outcome: Ok(text), ..
            }) => {
                info!("Answer refined");
                text
            }
            Ok(Generation {
                outcome: Err(e), ..
            }) => {
                warn!(error = %e, "Refine failed, keeping original answer");
                answer.to_string()
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Refine failed, keeping original answer");
                answer.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationErrorKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails for models listed in `failing`, echoes the model name otherwise.
    struct ScriptedGenerator {
        failing: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError> {
            self.calls.lock().unwrap().push(request.model.clone());
            if self.failing.contains(&request.model.as_str()) {
                Err(GenerationError::new(GenerationErrorKind::Status(500), "Ollama returned status 500"))
            } else {
                Ok(format!("answer from {}", request.model))
            }
        }
    }

    fn request(model: &str) -> GenerateRequest {
        GenerateRequest {
            model: model.to_string(),
            prompt: "q".to_string(),
            system: None,
            options: SamplingOptions {
                temperature: 0.7,
                context_length: 4096,
                top_p: 0.9,
                top_k: 40,
            },
        }
    }

    fn generator(failing: Vec<&'static str>) -> ScriptedGenerator {
        ScriptedGenerator {
            failing,
            calls: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let scripted = generator(vec![]);
        let out = generate_with_fallback(&scripted, &request("main"), Some("backup")).await;
        assert_eq!(out.answer_text(), "answer from main");
        assert!(!out.used_fallback);
        assert_eq!(*scripted.calls.lock().unwrap(), vec!["main"]);
    }

    #[tokio::test]
    async fn test_fallback_used_once() {
        let scripted = generator(vec!["main"]);
        let out = generate_with_fallback(&scripted, &request("main"), Some("backup")).await;
        assert!(out.used_fallback);
        assert_eq!(out.model_used, "backup");
        assert_eq!(out.answer_text(), "answer from backup");
        assert_eq!(*scripted.calls.lock().unwrap(), vec!["main", "backup"]);
    }

    #[tokio::test]
    async fn test_both_fail_surfaces_error_text() {
        let scripted = generator(vec!["main", "backup"]);
        let out = generate_with_fallback(&scripted, &request("main"), Some("backup")).await;
        assert!(!out.succeeded());
        assert_eq!(out.answer_text(), "Error: Ollama returned status 500");
        assert_eq!(scripted.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_no_fallback_configured() {
        let scripted = generator(vec!["main"]);
        let out = generate_with_fallback(&scripted, &request("main"), Some("  ")).await;
        assert!(!out.used_fallback);
        assert!(!out.succeeded());
        assert_eq!(scripted.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_context_takes_top_sections() {
        let hits: Vec<SearchHit> = (0..5)
            .map(|i| SearchHit {
                document_id: "d".into(),
                chunk_index: i,
                content: format!("text {}", i),
                metadata: String::new(),
                score: 1.0,
                distance: 0.0,
            })
            .collect();
        let context = build_context(&hits, 3);
        assert_eq!(
            context,
            "[Section 1]\ntext 0\n\n[Section 2]\ntext 1\n\n[Section 3]\ntext 2"
        );
        let prompt = context_prompt("why?", &context);
        assert!(prompt.contains("using ONLY the provided context"));
        assert!(prompt.ends_with("Question: why?\n\nDetailed Answer (based ONLY on context):"));
    }

    #[test]
    fn test_general_prompt_notes_missing_documents() {
        let prompt = general_prompt("what is rust?");
        assert!(prompt.contains("not found in the uploaded documents"));
        assert!(prompt.contains("Question: what is rust?"));
    }
}
