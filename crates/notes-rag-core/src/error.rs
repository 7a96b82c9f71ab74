//! Error taxonomy for the pipeline stages.
//!
//! Each network-dependent stage has its own error type so callers can tell
//! a retrieval failure apart from a synthesis failure.

/// Errors from [`Chunker`](crate::chunk::Chunker).
#[derive(Debug, thiserror::Error)]
pub enum ChunkingError {
    #[error("invalid chunking config: {0}")]
    InvalidConfig(String),
    #[error("unknown token encoding: {0}")]
    UnknownEncoding(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("could not decode tokens {start}..{end} of {document}")]
    Decode {
        document: String,
        start: usize,
        end: usize,
    },
}

/// Errors from an [`Embedder`](crate::embedding::Embedder).
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("missing API key: {0} is not set")]
    MissingApiKey(String),
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("embedding provider returned {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimensions { expected: usize, actual: usize },
}

/// Errors at the vector index boundary.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("vector index session is not connected")]
    NotConnected,
    #[error("failed to connect to vector index: {0}")]
    Connect(String),
    #[error("vector index write failed: {0}")]
    Write(String),
    #[error("vector index query failed: {0}")]
    Query(String),
    #[error("namespace {namespace} stores {expected}-dimension vectors, got {actual}")]
    DimensionMismatch {
        namespace: String,
        expected: usize,
        actual: usize,
    },
    #[error("namespace {namespace} was indexed with {expected}, got {actual}")]
    ModelMismatch {
        namespace: String,
        expected: String,
        actual: String,
    },
}

/// Errors from [`Retriever::retrieve`](crate::retrieve::Retriever::retrieve).
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Errors from the language model stage.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("invalid prompt template: {0}")]
    Template(String),
    #[error("missing API key: {0} is not set")]
    MissingApiKey(String),
    #[error("language model request failed: {0}")]
    Provider(String),
    #[error("language model timed out after {0}s")]
    Timeout(u64),
    #[error("language model returned an empty response")]
    EmptyResponse,
}

/// Any failure on the query path, tagged by the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("could not open index session: {0}")]
    Connect(IndexError),
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("answer synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),
}

impl QueryError {
    /// Short machine-readable label for the failing stage.
    pub fn stage(&self) -> &'static str {
        match self {
            QueryError::Connect(_) => "connect",
            QueryError::Retrieval(_) => "retrieval",
            QueryError::Synthesis(_) => "synthesis",
        }
    }
}
