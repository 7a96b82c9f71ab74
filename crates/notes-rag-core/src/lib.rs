//! # notes-rag core
//!
//! Runtime-free logic for the notes question-answering pipeline: data
//! models, the token chunker, the embedding and vector index traits, the
//! retriever, and the answer synthesizer.
//!
//! This crate contains no tokio, sqlx, HTTP client, or filesystem walking.
//! Concrete providers (OpenAI, SQLite) live in the `notes-rag` app crate and
//! are injected through the traits defined here.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod retrieve;
pub mod synthesize;
