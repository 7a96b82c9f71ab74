//! Query-time retrieval: embed the question, fetch the nearest chunks.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::Embedder;
use crate::error::RetrievalError;
use crate::index::IndexSession;
use crate::models::{IndexScope, RetrievedChunk};

/// Finds the chunks most similar to a question within one [`IndexScope`].
///
/// The embedder must be the same model that produced the indexed vectors.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    scope: IndexScope,
    min_score: f32,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, scope: IndexScope) -> Self {
        Self {
            embedder,
            scope,
            min_score: 0.0,
        }
    }

    /// Drop results scoring below `min_score`.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn scope(&self) -> &IndexScope {
        &self.scope
    }

    /// Return up to `k` chunks ordered by decreasing similarity.
    ///
    /// `k <= 0` or a blank question returns an empty list without calling
    /// the embedding provider.
    pub async fn retrieve(
        &self,
        session: &mut dyn IndexSession,
        question: &str,
        k: i64,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        if k <= 0 || question.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(question).await?;
        let mut results = session.query(&vector, k as usize, &self.scope).await?;
        results.retain(|r| r.similarity_score >= self.min_score);

        debug!(
            k,
            returned = results.len(),
            namespace = %self.scope.namespace,
            "retrieved chunks"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::error::EmbeddingError;
    use crate::index::memory::InMemoryIndex;
    use crate::index::VectorIndex;
    use crate::models::{Chunk, IndexedEntry};

    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_batch(texts).await
        }
    }

    fn scope() -> IndexScope {
        IndexScope::new("obsidian-embeddings", "obsidian:")
    }

    fn chunk(doc: &str, seq: usize, text: &str) -> Chunk {
        Chunk {
            owner_document: doc.to_string(),
            sequence_index: seq,
            text: text.to_string(),
            token_count: 0,
        }
    }

    async fn seeded(texts: &[&str]) -> (InMemoryIndex, Arc<CountingEmbedder>) {
        let embedder = Arc::new(CountingEmbedder {
            inner: HashingEmbedder::new(512),
            calls: AtomicUsize::new(0),
        });
        let index = InMemoryIndex::new();
        let entries: Vec<IndexedEntry> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                IndexedEntry::from_chunk(&scope(), &chunk("a.txt", i, t), embedder.inner.embed_sync(t))
            })
            .collect();
        let mut session = index.connect().await.unwrap();
        session.upsert(&entries, &scope()).await.unwrap();
        session.disconnect().await.unwrap();
        (index, embedder)
    }

    #[tokio::test]
    async fn most_similar_chunk_comes_first() {
        let (index, embedder) = seeded(&[
            "Tomatoes need full sunlight.",
            "Paris is the capital of France.",
            "Rust has no garbage collector.",
        ])
        .await;
        let retriever = Retriever::new(embedder, scope());
        let mut session = index.connect().await.unwrap();

        let results = retriever
            .retrieve(session.as_mut(), "What is the capital of France?", 3)
            .await
            .unwrap();
        assert_eq!(results[0].chunk_text, "Paris is the capital of France.");
        for pair in results.windows(2) {
            assert!(pair[0].similarity_score >= pair[1].similarity_score);
        }
        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn k_larger_than_index_returns_everything() {
        let (index, embedder) = seeded(&["Paris is the capital of France."]).await;
        let retriever = Retriever::new(embedder, scope());
        let mut session = index.connect().await.unwrap();
        let results = retriever
            .retrieve(session.as_mut(), "capital of France", 3)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn non_positive_k_skips_provider() {
        let (index, embedder) = seeded(&["anything"]).await;
        let retriever = Retriever::new(embedder.clone(), scope());
        let mut session = index.connect().await.unwrap();

        assert!(retriever.retrieve(session.as_mut(), "q", 0).await.unwrap().is_empty());
        assert!(retriever.retrieve(session.as_mut(), "q", -2).await.unwrap().is_empty());
        assert!(retriever.retrieve(session.as_mut(), "   ", 4).await.unwrap().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn min_score_filters_unrelated_chunks() {
        let (index, embedder) = seeded(&[
            "Paris is the capital of France.",
            "Tomatoes need full sunlight.",
        ])
        .await;
        let retriever = Retriever::new(embedder, scope()).with_min_score(0.5);
        let mut session = index.connect().await.unwrap();
        let results = retriever
            .retrieve(session.as_mut(), "What is the capital of France?", 4)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].chunk_text.contains("Paris"));
    }

    #[tokio::test]
    async fn empty_index_returns_nothing() {
        let index = InMemoryIndex::new();
        let retriever = Retriever::new(Arc::new(HashingEmbedder::new(64)), scope());
        let mut session = index.connect().await.unwrap();
        let results = retriever
            .retrieve(session.as_mut(), "anything at all", 4)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn disconnected_session_surfaces_index_error() {
        let index = InMemoryIndex::new();
        let retriever = Retriever::new(Arc::new(HashingEmbedder::new(64)), scope());
        let mut session = index.connect().await.unwrap();
        session.disconnect().await.unwrap();
        let err = retriever
            .retrieve(session.as_mut(), "question", 4)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Index(crate::error::IndexError::NotConnected)
        ));
    }
}
