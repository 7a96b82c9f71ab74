//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait hands out [`IndexSession`]s: one scoped
//! connection per ingestion run or query. Every read and write goes
//! through a session, and a session that has been disconnected rejects
//! further calls with [`IndexError::NotConnected`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](IndexSession::upsert) | Bulk insert entries under a scope |
//! | [`query`](IndexSession::query) | Top-k cosine similarity search within a scope |
//! | [`replace`](IndexSession::replace) | Atomically swap a scope's entries for new ones |
//! | [`clear`](IndexSession::clear) | Drop every entry (and the dimension stamp) of a scope |
//! | [`disconnect`](IndexSession::disconnect) | Release the connection |
//!
//! # Dimension guard
//!
//! The first upsert into a scope stamps its vector length into index
//! metadata. Later upserts or queries with a different length fail with
//! [`IndexError::DimensionMismatch`] instead of silently comparing
//! incompatible vectors.

pub mod memory;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::{IndexScope, IndexedEntry, RetrievedChunk};

/// Factory for scoped index connections.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Acquire a new session. The caller must [`disconnect`](IndexSession::disconnect) it.
    async fn connect(&self) -> Result<Box<dyn IndexSession>, IndexError>;
}

/// One acquired connection to the vector index.
#[async_trait]
pub trait IndexSession: Send {
    /// Store `entries` under `scope`. No deduplication is performed.
    async fn upsert(&mut self, entries: &[IndexedEntry], scope: &IndexScope)
        -> Result<(), IndexError>;

    /// Replace every entry of `scope` with `entries` as one atomic write,
    /// returning how many entries were removed. On failure the scope keeps
    /// its previous contents.
    async fn replace(
        &mut self,
        entries: &[IndexedEntry],
        scope: &IndexScope,
    ) -> Result<u64, IndexError>;

    /// Return up to `k` entries of `scope` ordered by decreasing cosine
    /// similarity to `vector`. Fewer than `k` only if fewer entries exist.
    async fn query(
        &mut self,
        vector: &[f32],
        k: usize,
        scope: &IndexScope,
    ) -> Result<Vec<RetrievedChunk>, IndexError>;

    /// Remove every entry of `scope`, returning how many were removed.
    async fn clear(&mut self, scope: &IndexScope) -> Result<u64, IndexError>;

    /// Release the connection. Idempotent.
    async fn disconnect(&mut self) -> Result<(), IndexError>;

    fn is_connected(&self) -> bool;
}

/// Reject vectors whose length differs from the scope's stamped dimension.
pub fn check_dims(
    scope: &IndexScope,
    stamped: Option<usize>,
    actual: usize,
) -> Result<(), IndexError> {
    match stamped {
        Some(expected) if expected != actual => Err(IndexError::DimensionMismatch {
            namespace: scope.namespace.clone(),
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}

/// Sort by decreasing similarity and keep the first `k`.
pub fn rank_top_k(mut results: Vec<RetrievedChunk>, k: usize) -> Vec<RetrievedChunk> {
    results.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(k);
    results
}

/// Dimension shared by every entry of a batch, or an error if they differ.
pub fn batch_dims(entries: &[IndexedEntry], scope: &IndexScope) -> Result<Option<usize>, IndexError> {
    let Some(first) = entries.first() else {
        return Ok(None);
    };
    let dims = first.vector.len();
    if dims == 0 {
        return Err(IndexError::Write("cannot index an empty vector".to_string()));
    }
    for entry in entries {
        check_dims(scope, Some(dims), entry.vector.len())?;
    }
    Ok(Some(dims))
}
