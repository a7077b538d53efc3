//! # docent
//!
//! Document-grounded question answering over a private corpus.
//!
//! Documents are extracted, chunked, embedded and held in an in-memory
//! vector index persisted next to a SQLite store. A question is embedded,
//! matched against the index, and routed: when the best match clears the
//! routing threshold the generation model answers from the matched
//! sections, otherwise it answers from general knowledge with a note.
//!
//! ## Architecture
//!
//! ```text
//!  file ──▶ extract ──▶ chunk ──▶ embedding ──▶ knowledge ──▶ persist
//!                         │                         │      (vectors.bin +
//!                         ▼                         │       records.json)
//!                       store (SQLite) ◀── reindex ─┘
//!
//!  question ──▶ knowledge.search ──▶ score ──▶ router ──▶ answer ──▶ generation
//!                                                 │
//!                                                 └──▶ store (chat log)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env overrides, validation |
//! | [`logging`] | tracing subscriber setup |
//! | [`models`] | Core data types |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`store`] | Queries over the authoritative store |
//! | [`extract`] | Text extraction per file format |
//! | [`chunk`] | Paragraph chunking with word overlap |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory exact nearest-neighbour index |
//! | [`persist`] | Durable vector/record pair |
//! | [`score`] | Distance to similarity, ranking |
//! | [`knowledge`] | Knowledge base service object |
//! | [`generation`] | Ollama client |
//! | [`answer`] | Prompts, fallback, refinement |
//! | [`router`] | Document vs. general routing and chat logging |
//! | [`ingest`] | File ingestion and deletion |
//! | [`app`] | Process-start wiring |

pub mod answer;
pub mod app;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod knowledge;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod persist;
pub mod router;
pub mod score;
pub mod store;
