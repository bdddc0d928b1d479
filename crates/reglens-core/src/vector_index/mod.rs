//! Persistent vector index with cosine top-k search.
//!
//! Embeddings live in `SQLite` with WAL mode, keyed uniquely by file path.
//! Search scores every candidate row exactly, so results always match
//! brute-force cosine ordering; at the scale this index serves (thousands
//! of files) that is also the fastest honest answer. Ties are broken by
//! ascending file path so that results are deterministic.
//!
//! All public entry points are async and push the blocking `SQLite` work
//! onto the runtime's worker pool.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;


/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors raised by the vector index.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VectorIndexError {
    /// Database error from `SQLite`.
    #[error("vector index storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The index cannot serve requests at all. Surfaced as 503 upstream.
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    /// A vector with the wrong dimension was offered or read back.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the index was opened with.
        expected: usize,
        /// Dimension actually seen.
        actual: usize,
    },
}

/// One stored embedding row.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    /// Repository-relative path, unique within the index.
    pub file_path: String,
    /// Full text content of the file at index time.
    pub content: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 last-update timestamp.
    pub updated_at: String,
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Repository-relative path.
    pub file_path: String,
    /// Stored file content.
    pub content: String,
    /// Cosine similarity against the query vector.
    pub score: f32,
}

/// `SQLite`-backed vector index.
#[derive(Clone)]
pub struct SqliteVectorIndex {
    conn: Arc<Mutex<Connection>>,
    dimension: usize,
}

impl SqliteVectorIndex {
    /// Opens or creates an index at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self, VectorIndexError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
        })
    }

    /// Creates an in-memory index for testing.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be initialized.
    pub fn in_memory(dimension: usize) -> Result<Self, VectorIndexError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
        })
    }

    /// Dimension this index accepts.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Inserts or replaces the embedding for `file_path`, refreshing
    /// `updated_at` on replacement.
    ///
    /// # Errors
    ///
    /// Returns an error on dimension mismatch or storage failure.
    pub async fn upsert(
        &self,
        file_path: String,
        content: String,
        vector: Vec<f32>,
    ) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let now = Utc::now().to_rfc3339();
            let blob = vector_to_blob(&vector);
            let guard = conn.lock().unwrap();
            guard.execute(
                "INSERT INTO embeddings (file_path, content, vector, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT (file_path) DO UPDATE SET
                     content = excluded.content,
                     vector = excluded.vector,
                     updated_at = excluded.updated_at",
                params![file_path, content, blob, now],
            )?;
            Ok(())
        })
        .await
    }

    /// Returns the `top_k` rows most similar to `query`, strictly ordered
    /// by descending score, with ties broken by ascending file path, and
    /// filtered to `score >= threshold`.
    ///
    /// # Errors
    ///
    /// Returns an error on dimension mismatch or storage failure.
    pub async fn search(
        &self,
        query: Vec<f32>,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let conn = Arc::clone(&self.conn);
        let dimension = self.dimension;
        run_blocking(move || {
            let guard = conn.lock().unwrap();
            let mut stmt =
                guard.prepare("SELECT file_path, content, vector FROM embeddings")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?;

            let mut hits = Vec::new();
            for row in rows {
                let (file_path, content, blob) = row?;
                let vector = blob_to_vector(&blob, dimension)?;
                let score = cosine_similarity(&query, &vector);
                if score >= threshold {
                    hits.push(SearchHit {
                        file_path,
                        content,
                        score,
                    });
                }
            }

            hits.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| a.file_path.cmp(&b.file_path))
            });
            hits.truncate(top_k);
            Ok(hits)
        })
        .await
    }

    /// Removes the embedding stored for `file_path`.
    ///
    /// Returns `true` when a row was removed; deleting an absent path is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn delete(&self, file_path: String) -> Result<bool, VectorIndexError> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let guard = conn.lock().unwrap();
            let removed = guard.execute(
                "DELETE FROM embeddings WHERE file_path = ?1",
                params![file_path],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    /// Deletes every row whose path is not in `keep`, returning the
    /// number of rows pruned. The indexer uses this to reconcile the
    /// index with a source tree that has lost files since the previous
    /// cycle.
    ///
    /// # Errors
    ///
    /// Returns an error when the scan or a delete fails; on error no
    /// rows are removed.
    pub async fn retain(&self, keep: HashSet<String>) -> Result<usize, VectorIndexError> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let mut guard = conn.lock().unwrap();
            let tx = guard.transaction()?;
            let stale: Vec<String> = {
                let mut stmt = tx.prepare("SELECT file_path FROM embeddings")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut stale = Vec::new();
                for row in rows {
                    let path = row?;
                    if !keep.contains(&path) {
                        stale.push(path);
                    }
                }
                stale
            };
            for path in &stale {
                tx.execute("DELETE FROM embeddings WHERE file_path = ?1", params![path])?;
            }
            tx.commit()?;
            Ok(stale.len())
        })
        .await
    }

    /// Number of stored embeddings.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn count(&self) -> Result<usize, VectorIndexError> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let guard = conn.lock().unwrap();
            let count: i64 =
                guard.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await
    }

    /// Fetches the stored record for one path, if present.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn get(
        &self,
        file_path: String,
    ) -> Result<Option<EmbeddingRecord>, VectorIndexError> {
        let conn = Arc::clone(&self.conn);
        let dimension = self.dimension;
        run_blocking(move || {
            let guard = conn.lock().unwrap();
            let record = guard
                .query_row(
                    "SELECT file_path, content, vector, created_at, updated_at
                     FROM embeddings WHERE file_path = ?1",
                    params![file_path],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()?;
            match record {
                Some((file_path, content, blob, created_at, updated_at)) => {
                    Ok(Some(EmbeddingRecord {
                        file_path,
                        content,
                        vector: blob_to_vector(&blob, dimension)?,
                        created_at,
                        updated_at,
                    }))
                }
                None => Ok(None),
            }
        })
        .await
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, VectorIndexError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, VectorIndexError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| VectorIndexError::Unavailable(format!("worker task failed: {err}")))?
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8], dimension: usize) -> Result<Vec<f32>, VectorIndexError> {
    if blob.len() != dimension * 4 {
        return Err(VectorIndexError::DimensionMismatch {
            expected: dimension,
            actual: blob.len() / 4,
        });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(chunk);
            f32::from_le_bytes(bytes)
        })
        .collect())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
