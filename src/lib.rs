//! # notes-rag
//!
//! Retrieval-augmented question answering over a personal notes vault
//! (markdown notes plus PDFs).
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │   Vault   │──▶│ Normalizer │──▶│ Chunk+Embed │──▶│ Vector index │
//! │ md/pdf/txt│   │  → .txt    │   │  (tiktoken) │   │ SQLite / mem │
//! └───────────┘   └────────────┘   └─────────────┘   └──────┬───────┘
//!                                                           │
//!                     question ──▶ Retriever ◀──────────────┘
//!                                      │
//!                                      ▼
//!                              Synthesizer (LLM) ──▶ answer
//! ```
//!
//! The runtime-free pieces (models, chunker, traits, retriever, synthesizer)
//! live in the `notes-rag-core` crate. This crate adds configuration,
//! filesystem normalization, the OpenAI clients, the SQLite index, the
//! orchestrator, and the HTTP server.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`normalize`] | Vault scanning and text conversion |
//! | [`embedding`] | OpenAI embeddings and provider selection |
//! | [`llm`] | OpenAI chat completions |
//! | [`sqlite_index`] | SQLite vector index |
//! | [`pipeline`] | Ingestion and query orchestration |
//! | [`server`] | HTTP API |

pub mod config;
pub mod embedding;
pub mod llm;
pub mod normalize;
pub mod pipeline;
pub mod server;
pub mod sqlite_index;
