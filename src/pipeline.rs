//! Pipeline orchestrator.
//!
//! [`RagPipeline`] wires the normalizer, chunker, embedder, vector index,
//! retriever, and synthesizer into the two flows the CLI and server expose:
//!
//! ```text
//! ingestion:  normalized .txt ─▶ chunk ─▶ embed ─▶ connect ─▶ replace | upsert ─▶ disconnect
//! query:      question ─▶ connect ─▶ embed + top-k ─▶ prompt ─▶ LLM ─▶ disconnect ─▶ answer
//! ```
//!
//! Every flow opens its own index session and disconnects it on every exit
//! path, including failures in retrieval or synthesis. All embeddings for a
//! run are computed before the index is touched, so an embedding failure
//! leaves the index as it was.
//!
//! Normalization and ingestion are serialised by a run lock; queries never
//! take it.

use anyhow::{Context, Result};
use notes_rag_core::chunk::Chunker;
use notes_rag_core::embedding::Embedder;
use notes_rag_core::error::{IndexError, QueryError};
use notes_rag_core::index::memory::InMemoryIndex;
use notes_rag_core::index::{IndexSession, VectorIndex};
use notes_rag_core::models::{AnswerResult, IndexScope, IndexedEntry, RetrievedChunk};
use notes_rag_core::retrieve::Retriever;
use notes_rag_core::synthesize::{Generator, PromptTemplate, Synthesizer};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{Config, IndexLocation};
use crate::embedding::create_embedder;
use crate::llm::OpenAiGenerator;
use crate::normalize::{self, NormalizeReport};
use crate::sqlite_index::SqliteIndex;

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub entries: usize,
    /// Entries removed from the namespace before upserting.
    pub cleared: u64,
}

pub struct RagPipeline {
    config: Config,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunker: Chunker,
    retriever: Retriever,
    synthesizer: Synthesizer,
    run_lock: Mutex<()>,
}

impl RagPipeline {
    /// Build a pipeline from explicit providers.
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        let chunker = Chunker::new(config.chunking.to_chunker_config())
            .context("Failed to build chunker")?;

        let template = match &config.llm.prompt_path {
            Some(path) => PromptTemplate::from_file(path)
                .with_context(|| format!("Failed to load prompt template {}", path.display()))?,
            None => PromptTemplate::default(),
        };

        let retriever = Retriever::new(embedder.clone(), config.index.scope())
            .with_min_score(config.retrieval.min_score);
        let synthesizer = Synthesizer::new(generator, template);

        Ok(Self {
            config,
            embedder,
            index,
            chunker,
            retriever,
            synthesizer,
            run_lock: Mutex::new(()),
        })
    }

    /// Build a pipeline with the providers named in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator: Arc<dyn Generator> = Arc::new(OpenAiGenerator::new(&config.llm)?);
        let index = create_index(config)?;
        Self::new(config.clone(), embedder, generator, index)
    }

    pub fn scope(&self) -> &IndexScope {
        self.retriever.scope()
    }

    /// Convert the source vault into the normalized directory.
    pub async fn normalize(&self) -> Result<NormalizeReport> {
        let _guard = self.run_lock.lock().await;
        let source = self.config.paths.source_dir.clone();
        let dest = self.config.paths.normalized_dir.clone();
        let settings = self.config.normalize.clone();

        tokio::task::spawn_blocking(move || normalize::normalize(&source, &dest, &settings))
            .await
            .context("Normalization task failed")?
    }

    /// Chunk, embed, and index every normalized document.
    ///
    /// With `ingest.rebuild` the namespace's entries are replaced atomically,
    /// so the index mirrors the current notes exactly and a failed write
    /// keeps the previous index.
    pub async fn ingest(&self) -> Result<IngestReport> {
        let _guard = self.run_lock.lock().await;

        let dir = self.config.paths.normalized_dir.clone();
        let docs = tokio::task::spawn_blocking(move || normalize::load_normalized(&dir))
            .await
            .context("Loading task failed")??;

        let chunks = self.chunker.split(&docs);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        info!(
            documents = docs.len(),
            chunks = chunks.len(),
            model = self.embedder.model_name(),
            "embedding chunks"
        );
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .context("Embedding failed; index left unchanged")?;

        let scope = self.scope().clone();
        let entries: Vec<IndexedEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedEntry::from_chunk(&scope, chunk, vector))
            .collect();

        let mut session = self
            .index
            .connect()
            .await
            .context("Failed to connect to vector index")?;
        let written = write_entries(session.as_mut(), &entries, &scope, self.config.ingest.rebuild).await;
        let released = session.disconnect().await;
        let cleared = written.context("Failed to write vector index")?;
        released.context("Failed to disconnect from vector index")?;

        let report = IngestReport {
            documents: docs.len(),
            chunks: chunks.len(),
            entries: entries.len(),
            cleared,
        };
        info!(
            documents = report.documents,
            chunks = report.chunks,
            entries = report.entries,
            cleared = report.cleared,
            namespace = %scope.namespace,
            "ingestion complete"
        );
        Ok(report)
    }

    /// Top-k chunks for `question`, in their own session.
    pub async fn retrieve(&self, question: &str, k: i64) -> Result<Vec<RetrievedChunk>, QueryError> {
        let mut session = self.index.connect().await.map_err(QueryError::Connect)?;
        let result = self
            .retriever
            .retrieve(session.as_mut(), question, k)
            .await
            .map_err(QueryError::from);
        release(session.as_mut()).await;
        result
    }

    /// Answer `question` from the notes.
    pub async fn ask(&self, question: &str) -> Result<AnswerResult, QueryError> {
        let mut session = self.index.connect().await.map_err(QueryError::Connect)?;
        let result = self.answer_in(session.as_mut(), question).await;
        release(session.as_mut()).await;
        result
    }

    async fn answer_in(
        &self,
        session: &mut dyn IndexSession,
        question: &str,
    ) -> Result<AnswerResult, QueryError> {
        let context = self
            .retriever
            .retrieve(session, question, self.config.retrieval.k)
            .await?;
        Ok(self.synthesizer.synthesize(question, context).await?)
    }
}

/// Rebuilds swap the scope in one atomic write, so a failed run leaves the
/// previous entries queryable.
async fn write_entries(
    session: &mut dyn IndexSession,
    entries: &[IndexedEntry],
    scope: &IndexScope,
    rebuild: bool,
) -> Result<u64, IndexError> {
    if rebuild {
        return session.replace(entries, scope).await;
    }
    session.upsert(entries, scope).await?;
    Ok(0)
}

async fn release(session: &mut dyn IndexSession) {
    if let Err(e) = session.disconnect().await {
        warn!(error = %e, "failed to disconnect from vector index");
    }
}

/// Open the index named by `index.url`.
pub fn create_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    match config.index.location()? {
        IndexLocation::Sqlite(path) => Ok(Arc::new(SqliteIndex::new(
            path,
            config.embedding.model.clone(),
        ))),
        IndexLocation::Memory => Ok(Arc::new(InMemoryIndex::new())),
    }
}
