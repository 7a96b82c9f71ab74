//! In-memory [`VectorIndex`] implementation for tests and ephemeral runs.
//!
//! Uses a `HashMap` behind `std::sync::RwLock` shared by every session.
//! Search is brute-force cosine similarity over the scope's entries.
//! The index also counts open sessions so callers can verify that every
//! acquired connection was released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::IndexError;
use crate::models::{IndexScope, IndexedEntry, RetrievedChunk};

use super::{batch_dims, check_dims, rank_top_k, IndexSession, VectorIndex};

#[derive(Default)]
struct ScopeData {
    dims: Option<usize>,
    entries: Vec<IndexedEntry>,
}

type Shared = Arc<RwLock<HashMap<IndexScope, ScopeData>>>;

/// In-memory vector index.
#[derive(Clone, Default)]
pub struct InMemoryIndex {
    scopes: Shared,
    open: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions acquired and not yet disconnected.
    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Total sessions ever acquired.
    pub fn total_connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of entries stored under `scope`.
    pub fn len(&self, scope: &IndexScope) -> usize {
        let scopes = self.scopes.read().unwrap_or_else(|e| e.into_inner());
        scopes.get(scope).map(|d| d.entries.len()).unwrap_or(0)
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn connect(&self) -> Result<Box<dyn IndexSession>, IndexError> {
        self.open.fetch_add(1, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySession {
            scopes: self.scopes.clone(),
            open: self.open.clone(),
            connected: true,
        }))
    }
}

struct InMemorySession {
    scopes: Shared,
    open: Arc<AtomicUsize>,
    connected: bool,
}

impl InMemorySession {
    fn ensure_connected(&self) -> Result<(), IndexError> {
        if self.connected {
            Ok(())
        } else {
            Err(IndexError::NotConnected)
        }
    }

    fn release(&mut self) {
        if self.connected {
            self.connected = false;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl IndexSession for InMemorySession {
    async fn upsert(
        &mut self,
        entries: &[IndexedEntry],
        scope: &IndexScope,
    ) -> Result<(), IndexError> {
        self.ensure_connected()?;
        let Some(dims) = batch_dims(entries, scope)? else {
            return Ok(());
        };
        let mut scopes = self
            .scopes
            .write()
            .map_err(|e| IndexError::Write(e.to_string()))?;
        let data = scopes.entry(scope.clone()).or_default();
        check_dims(scope, data.dims, dims)?;
        data.dims = Some(dims);
        data.entries.extend(entries.iter().cloned());
        Ok(())
    }

    async fn replace(
        &mut self,
        entries: &[IndexedEntry],
        scope: &IndexScope,
    ) -> Result<u64, IndexError> {
        self.ensure_connected()?;
        let dims = batch_dims(entries, scope)?;
        let mut scopes = self
            .scopes
            .write()
            .map_err(|e| IndexError::Write(e.to_string()))?;
        let previous = match dims {
            Some(dims) => scopes.insert(
                scope.clone(),
                ScopeData {
                    dims: Some(dims),
                    entries: entries.to_vec(),
                },
            ),
            None => scopes.remove(scope),
        };
        Ok(previous.map(|d| d.entries.len() as u64).unwrap_or(0))
    }

    async fn query(
        &mut self,
        vector: &[f32],
        k: usize,
        scope: &IndexScope,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        self.ensure_connected()?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let scopes = self
            .scopes
            .read()
            .map_err(|e| IndexError::Query(e.to_string()))?;
        let Some(data) = scopes.get(scope) else {
            return Ok(Vec::new());
        };
        check_dims(scope, data.dims, vector.len())?;

        let results = data
            .entries
            .iter()
            .map(|entry| RetrievedChunk {
                chunk_text: entry.chunk_text.clone(),
                similarity_score: cosine_similarity(vector, &entry.vector),
                metadata: entry.metadata.clone(),
            })
            .collect();
        Ok(rank_top_k(results, k))
    }

    async fn clear(&mut self, scope: &IndexScope) -> Result<u64, IndexError> {
        self.ensure_connected()?;
        let mut scopes = self
            .scopes
            .write()
            .map_err(|e| IndexError::Write(e.to_string()))?;
        Ok(scopes
            .remove(scope)
            .map(|d| d.entries.len() as u64)
            .unwrap_or(0))
    }

    async fn disconnect(&mut self) -> Result<(), IndexError> {
        self.release();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
