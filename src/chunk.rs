//! Paragraph-boundary text chunker.
//!
//! Splits extracted document text into [`Chunk`]s on blank-line paragraph
//! boundaries. Paragraphs accumulate into a buffer until the next one
//! would push it past the character budget; the buffer is then emitted
//! and the next buffer starts with the trailing `overlap_words` words of
//! the emitted one.
//!
//! A single paragraph longer than the budget is kept whole.

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Split text into labelled chunks with contiguous indices starting at 0.
///
/// Empty or whitespace-only text yields no chunks.
pub fn chunk_text(text: &str, filename: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let max_chars = config.max_chars();
    let overlap = config.overlap_words;

    if text.trim().is_empty() {
        return Vec::new();
    }

    let normalized = text.replace("\r\n", "\n");
    let mut chunks = Vec::new();
    let mut current_buf = String::new();

    for para in normalized.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = current_buf.chars().count() + trimmed.chars().count();

        if would_be > max_chars && !current_buf.trim().is_empty() {
            let seed = overlap_seed(&current_buf, overlap);
            push_chunk(&mut chunks, filename, &current_buf);
            current_buf = seed;
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.trim().is_empty() {
        push_chunk(&mut chunks, filename, &current_buf);
    }

    chunks
}

/// Trailing `overlap` words of a flushed buffer.
///
/// A buffer with no more than `overlap` words seeds nothing, so a short
/// chunk is never repeated wholesale.
fn overlap_seed(buf: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let words: Vec<&str> = buf.split_whitespace().collect();
    if words.len() <= overlap {
        return String::new();
    }
    words[words.len() - overlap..].join(" ")
}

fn push_chunk(chunks: &mut Vec<Chunk>, filename: &str, text: &str) {
    let index = chunks.len() as i64;
    chunks.push(Chunk {
        chunk_index: index,
        content: text.trim().to_string(),
        metadata: chunk_label(filename, index),
    });
}

/// Label shown alongside retrieved chunks.
pub fn chunk_label(filename: &str, index: i64) -> String {
    format!("Source: {}, Chunk: {}", filename, index + 1)
}
