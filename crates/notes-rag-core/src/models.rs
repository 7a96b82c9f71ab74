//! Core data models shared by the ingestion and query paths.
//!
//! These types represent the normalized documents, chunks, index entries,
//! and retrieval results that flow through the pipeline.

use serde::Serialize;

/// A source file converted to canonical plain text.
///
/// `relative_path` mirrors the source tree with `/` separators and the
/// original extension replaced by `.txt` (e.g. `notes/a.txt`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDocument {
    pub relative_path: String,
    pub text: String,
}

impl NormalizedDocument {
    pub fn new(relative_path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            text: text.into(),
        }
    }
}

/// A token-bounded segment of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// `relative_path` of the owning [`NormalizedDocument`].
    pub owner_document: String,
    /// Position within the owning document, contiguous from 0.
    pub sequence_index: usize,
    pub text: String,
    /// Number of tokens in this chunk; never exceeds the configured chunk size.
    pub token_count: usize,
}

impl Chunk {
    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            owner_document: self.owner_document.clone(),
            sequence_index: self.sequence_index,
        }
    }
}

/// Provenance stored alongside every indexed vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkMetadata {
    pub owner_document: String,
    pub sequence_index: usize,
}

/// Logical partition of the vector index: a namespace plus a key prefix.
///
/// Ingestion and querying must use the same scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexScope {
    pub namespace: String,
    pub key_prefix: String,
}

impl IndexScope {
    pub fn new(namespace: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key_prefix: key_prefix.into(),
        }
    }

    /// Generate a fresh entry key: the key prefix followed by a random UUID.
    pub fn entry_key(&self) -> String {
        format!("{}{}", self.key_prefix, uuid::Uuid::new_v4())
    }
}

/// A vector plus the chunk it was computed from, ready for upsert.
#[derive(Debug, Clone)]
pub struct IndexedEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub chunk_text: String,
    pub metadata: ChunkMetadata,
}

impl IndexedEntry {
    /// Pair a chunk with its embedding under a freshly generated key.
    pub fn from_chunk(scope: &IndexScope, chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: scope.entry_key(),
            vector,
            chunk_text: chunk.text.clone(),
            metadata: chunk.metadata(),
        }
    }
}

/// A stored chunk returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_text: String,
    pub similarity_score: f32,
    pub metadata: ChunkMetadata,
}

/// The synthesized answer and the context it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResult {
    pub answer: String,
    pub source_chunks: Vec<RetrievedChunk>,
}
