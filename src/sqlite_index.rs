//! SQLite-backed [`VectorIndex`].
//!
//! Each [`connect`](VectorIndex::connect) opens a fresh connection pool and
//! applies the schema; [`disconnect`](IndexSession::disconnect) closes it.
//! Vectors are stored as little-endian `f32` BLOBs and searched with
//! brute-force cosine similarity in Rust.
//!
//! # Schema
//!
//! ```sql
//! index_entries(id, namespace, key_prefix, vector, chunk_text,
//!               owner_document, sequence_index, created_at)
//! index_meta(namespace, key_prefix, dims, model, updated_at)
//! ```
//!
//! `index_meta` holds the dimension and model stamp written by the first
//! upsert into a scope. Writes and queries from a session configured with a
//! different model are rejected. [`replace`](IndexSession::replace) deletes
//! and rewrites a scope inside one transaction.

use async_trait::async_trait;
use notes_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use notes_rag_core::error::IndexError;
use notes_rag_core::index::{batch_dims, check_dims, rank_top_k, IndexSession, VectorIndex};
use notes_rag_core::models::{ChunkMetadata, IndexScope, IndexedEntry, RetrievedChunk};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::Row;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct SqliteIndex {
    path: PathBuf,
    model: String,
}

impl SqliteIndex {
    /// `model` is recorded next to the dimension stamp and checked on
    /// every later write and query.
    pub fn new(path: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            model: model.into(),
        }
    }
}

async fn open_pool(path: &Path) -> Result<SqlitePool, IndexError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::Connect(e.to_string()))?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| IndexError::Connect(e.to_string()))
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            id TEXT PRIMARY KEY,
            namespace TEXT NOT NULL,
            key_prefix TEXT NOT NULL,
            vector BLOB NOT NULL,
            chunk_text TEXT NOT NULL,
            owner_document TEXT NOT NULL,
            sequence_index INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            namespace TEXT NOT NULL,
            key_prefix TEXT NOT NULL,
            dims INTEGER NOT NULL,
            model TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, key_prefix)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_index_entries_scope ON index_entries(namespace, key_prefix)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn connect(&self) -> Result<Box<dyn IndexSession>, IndexError> {
        let pool = open_pool(&self.path).await?;
        if let Err(e) = run_migrations(&pool).await {
            pool.close().await;
            return Err(IndexError::Connect(e.to_string()));
        }
        debug!(path = %self.path.display(), "opened vector index");
        Ok(Box::new(SqliteSession {
            pool: Some(pool),
            model: self.model.clone(),
        }))
    }
}

struct SqliteSession {
    pool: Option<SqlitePool>,
    model: String,
}

impl SqliteSession {
    fn pool(&self) -> Result<&SqlitePool, IndexError> {
        self.pool.as_ref().ok_or(IndexError::NotConnected)
    }
}

fn write_err(e: sqlx::Error) -> IndexError {
    IndexError::Write(e.to_string())
}

fn query_err(e: sqlx::Error) -> IndexError {
    IndexError::Query(e.to_string())
}

/// Dimension and model recorded by the first write into a scope.
struct Stamp {
    dims: usize,
    model: String,
}

impl Stamp {
    fn check(&self, scope: &IndexScope, model: &str, dims: usize) -> Result<(), IndexError> {
        if self.model != model {
            return Err(IndexError::ModelMismatch {
                namespace: scope.namespace.clone(),
                expected: self.model.clone(),
                actual: model.to_string(),
            });
        }
        check_dims(scope, Some(self.dims), dims)
    }
}

async fn read_stamp<'e, E>(executor: E, scope: &IndexScope) -> Result<Option<Stamp>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let row: Option<(i64, String)> = sqlx::query_as(
        "SELECT dims, model FROM index_meta WHERE namespace = ? AND key_prefix = ?",
    )
    .bind(scope.namespace.clone())
    .bind(scope.key_prefix.clone())
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|(dims, model)| Stamp {
        dims: dims as usize,
        model,
    }))
}

async fn delete_scope(conn: &mut SqliteConnection, scope: &IndexScope) -> Result<u64, sqlx::Error> {
    let removed = sqlx::query("DELETE FROM index_entries WHERE namespace = ? AND key_prefix = ?")
        .bind(&scope.namespace)
        .bind(&scope.key_prefix)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM index_meta WHERE namespace = ? AND key_prefix = ?")
        .bind(&scope.namespace)
        .bind(&scope.key_prefix)
        .execute(&mut *conn)
        .await?;
    Ok(removed)
}

/// Check or write the scope stamp, then insert `entries`.
async fn insert_entries(
    conn: &mut SqliteConnection,
    entries: &[IndexedEntry],
    scope: &IndexScope,
    model: &str,
) -> Result<(), IndexError> {
    let Some(dims) = batch_dims(entries, scope)? else {
        return Ok(());
    };
    let now = chrono::Utc::now().timestamp();

    match read_stamp(&mut *conn, scope).await.map_err(write_err)? {
        Some(stamp) => stamp.check(scope, model, dims)?,
        None => {
            sqlx::query(
                "INSERT INTO index_meta (namespace, key_prefix, dims, model, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&scope.namespace)
            .bind(&scope.key_prefix)
            .bind(dims as i64)
            .bind(model)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(write_err)?;
        }
    }

    for entry in entries {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO index_entries
                (id, namespace, key_prefix, vector, chunk_text, owner_document, sequence_index, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&scope.namespace)
        .bind(&scope.key_prefix)
        .bind(vec_to_blob(&entry.vector))
        .bind(&entry.chunk_text)
        .bind(&entry.metadata.owner_document)
        .bind(entry.metadata.sequence_index as i64)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(write_err)?;
    }
    Ok(())
}

#[async_trait]
impl IndexSession for SqliteSession {
    async fn upsert(
        &mut self,
        entries: &[IndexedEntry],
        scope: &IndexScope,
    ) -> Result<(), IndexError> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await.map_err(write_err)?;
        insert_entries(&mut tx, entries, scope, &self.model).await?;
        tx.commit().await.map_err(write_err)?;
        Ok(())
    }

    async fn replace(
        &mut self,
        entries: &[IndexedEntry],
        scope: &IndexScope,
    ) -> Result<u64, IndexError> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await.map_err(write_err)?;
        let removed = delete_scope(&mut tx, scope).await.map_err(write_err)?;
        insert_entries(&mut tx, entries, scope, &self.model).await?;
        tx.commit().await.map_err(write_err)?;
        debug!(removed, written = entries.len(), "replaced scope");
        Ok(removed)
    }

    async fn query(
        &mut self,
        vector: &[f32],
        k: usize,
        scope: &IndexScope,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        let pool = self.pool()?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let Some(stamp) = read_stamp(pool, scope).await.map_err(query_err)? else {
            return Ok(Vec::new());
        };
        stamp.check(scope, &self.model, vector.len())?;

        // Fetch all vectors and compute cosine similarity in Rust
        let rows = sqlx::query(
            r#"
            SELECT vector, chunk_text, owner_document, sequence_index
            FROM index_entries
            WHERE namespace = ? AND key_prefix = ?
            "#,
        )
        .bind(&scope.namespace)
        .bind(&scope.key_prefix)
        .fetch_all(pool)
        .await
        .map_err(query_err)?;

        let results = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let sequence_index: i64 = row.get("sequence_index");
                RetrievedChunk {
                    chunk_text: row.get("chunk_text"),
                    similarity_score: cosine_similarity(vector, &blob_to_vec(&blob)),
                    metadata: ChunkMetadata {
                        owner_document: row.get("owner_document"),
                        sequence_index: sequence_index as usize,
                    },
                }
            })
            .collect();

        Ok(rank_top_k(results, k))
    }

    async fn clear(&mut self, scope: &IndexScope) -> Result<u64, IndexError> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await.map_err(write_err)?;
        let removed = delete_scope(&mut tx, scope).await.map_err(write_err)?;
        tx.commit().await.map_err(write_err)?;
        Ok(removed)
    }

    async fn disconnect(&mut self) -> Result<(), IndexError> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.pool.is_some()
    }
}
