//! Offline repository indexer.
//!
//! Walks a source tree, encodes every matching file, and reconciles the
//! vector index with what is on disk: current files are upserted and
//! rows for files no longer present are pruned, so after a completed
//! cycle the index cardinality equals the source-file count. Re-running
//! over an unchanged tree produces the same cardinality. A file that
//! cannot be read or encoded is logged and skipped; an index-level
//! failure aborts the cycle.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::embedding::HashingEncoder;
use crate::vector_index::{SqliteVectorIndex, VectorIndexError};

/// Directories never descended into.
const SKIPPED_DIRS: [&str; 7] = [
    ".git",
    "__pycache__",
    "node_modules",
    "target",
    "venv",
    ".venv",
    "vendor",
];

/// Files larger than this are skipped rather than embedded.
const MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Errors that abort an indexing cycle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IndexerError {
    /// The repository root does not exist or is not a directory.
    #[error("repository path is not a directory: {}", .path.display())]
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// Walking the tree failed.
    #[error("failed to read {}: {}", .path.display(), .source)]
    Walk {
        /// The path being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The vector index rejected an operation.
    #[error(transparent)]
    Index(#[from] VectorIndexError),
}

/// Outcome of one indexing cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Files encoded and upserted.
    pub indexed: usize,
    /// Files skipped (unreadable, binary, oversized, or unencodable).
    pub skipped: usize,
    /// Stale rows removed for files no longer in the tree.
    pub pruned: usize,
}

/// Walks a source tree and keeps the vector index consistent with it.
pub struct RepositoryIndexer {
    encoder: Arc<HashingEncoder>,
    index: SqliteVectorIndex,
    extensions: Vec<String>,
}

impl RepositoryIndexer {
    /// Creates an indexer for the given extension set (for example
    /// `["py"]`).
    #[must_use]
    pub fn new(
        encoder: Arc<HashingEncoder>,
        index: SqliteVectorIndex,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            encoder,
            index,
            extensions,
        }
    }

    /// Indexes every matching file under `repo_path`, then prunes index
    /// rows whose paths are absent from the tree. A file that still
    /// exists but was skipped this cycle keeps its previous row.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError`] when the root is invalid, the walk fails,
    /// or the index itself rejects an operation. Per-file read and encode
    /// failures are logged and counted, not raised.
    pub async fn index(&self, repo_path: &Path) -> Result<IndexReport, IndexerError> {
        if !repo_path.is_dir() {
            return Err(IndexerError::NotADirectory {
                path: repo_path.to_path_buf(),
            });
        }

        let mut files = Vec::new();
        collect_files(repo_path, repo_path, &self.extensions, &mut files)?;
        files.sort();
        let keep: HashSet<String> = files
            .iter()
            .map(|path| path.to_string_lossy().replace('\\', "/"))
            .collect();

        let mut report = IndexReport::default();
        for relative in files {
            let absolute = repo_path.join(&relative);
            match std::fs::metadata(&absolute) {
                Ok(meta) if meta.len() > MAX_FILE_BYTES => {
                    debug!(file = %relative.display(), bytes = meta.len(), "skipping oversized file");
                    report.skipped += 1;
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(file = %relative.display(), error = %err, "skipping unreadable file");
                    report.skipped += 1;
                    continue;
                }
            }

            let content = match std::fs::read_to_string(&absolute) {
                Ok(content) => content,
                Err(err) => {
                    // Binary or non-UTF-8 content lands here.
                    warn!(file = %relative.display(), error = %err, "skipping unreadable file");
                    report.skipped += 1;
                    continue;
                }
            };

            let vector = match self.encoder.encode(&content) {
                Ok(vector) => vector,
                Err(err) => {
                    warn!(file = %relative.display(), error = %err, "skipping unencodable file");
                    report.skipped += 1;
                    continue;
                }
            };

            let key = relative.to_string_lossy().replace('\\', "/");
            self.index.upsert(key, content, vector).await?;
            report.indexed += 1;
        }

        report.pruned = self.index.retain(keep).await?;

        info!(
            indexed = report.indexed,
            skipped = report.skipped,
            pruned = report.pruned,
            "indexing cycle complete"
        );
        Ok(report)
    }
}

fn collect_files(
    root: &Path,
    dir: &Path,
    extensions: &[String],
    out: &mut Vec<PathBuf>,
) -> Result<(), IndexerError> {
    let entries = std::fs::read_dir(dir).map_err(|source| IndexerError::Walk {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| IndexerError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if path.is_dir() {
            if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()) {
                continue;
            }
            collect_files(root, &path, extensions, out)?;
        } else if matches_extension(&path, extensions) {
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_path_buf());
            }
        }
    }
    Ok(())
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn encoder() -> Arc<HashingEncoder> {
        Arc::new(HashingEncoder::from_identity("feature-hash-v1/64").expect("model"))
    }

    fn write(dir: &TempDir, path: &str, content: &[u8]) {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(full, content).expect("write");
    }

    fn fixture_repo() -> TempDir {
        let dir = TempDir::new().expect("temp dir");
        write(&dir, "api/endpoints.py", b"def create_pix_key(): pass");
        write(&dir, "domain/validators.py", b"def validate_key(): pass");
        write(&dir, "README.md", b"# docs, not source");
        write(&dir, "__pycache__/cached.py", b"ignored");
        write(&dir, ".hidden/secret.py", b"ignored");
        dir
    }

    #[tokio::test]
    async fn indexes_matching_files_only() {
        let repo = fixture_repo();
        let index = SqliteVectorIndex::in_memory(64).expect("open");
        let indexer = RepositoryIndexer::new(encoder(), index.clone(), vec!["py".to_string()]);

        let report = indexer.index(repo.path()).await.expect("index");
        assert_eq!(report.indexed, 2);
        assert_eq!(index.count().await.expect("count"), 2);
        assert!(index
            .get("api/endpoints.py".to_string())
            .await
            .expect("get")
            .is_some());
        assert!(index
            .get("README.md".to_string())
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn deleted_files_are_pruned_on_reindex() {
        let repo = TempDir::new().expect("temp dir");
        write(&repo, "a.py", b"first module");
        write(&repo, "b.py", b"second module");

        let index = SqliteVectorIndex::in_memory(64).expect("open");
        let indexer = RepositoryIndexer::new(encoder(), index.clone(), vec!["py".to_string()]);
        indexer.index(repo.path()).await.expect("first cycle");
        assert_eq!(index.count().await.expect("count"), 2);

        std::fs::remove_file(repo.path().join("a.py")).expect("remove");
        let report = indexer.index(repo.path()).await.expect("second cycle");

        // Cardinality tracks the tree: the stale row is gone.
        assert_eq!(report.pruned, 1);
        assert_eq!(index.count().await.expect("count"), 1);
        assert!(index
            .get("a.py".to_string())
            .await
            .expect("get")
            .is_none());
        assert!(index
            .get("b.py".to_string())
            .await
            .expect("get")
            .is_some());
    }

    #[tokio::test]
    async fn reindexing_is_idempotent() {
        let repo = fixture_repo();
        let index = SqliteVectorIndex::in_memory(64).expect("open");
        let indexer = RepositoryIndexer::new(encoder(), index.clone(), vec!["py".to_string()]);

        indexer.index(repo.path()).await.expect("first cycle");
        let first = index.count().await.expect("count");
        indexer.index(repo.path()).await.expect("second cycle");
        let second = index.count().await.expect("count");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn invalid_utf8_files_are_skipped() {
        let repo = TempDir::new().expect("temp dir");
        write(&repo, "good.py", b"print('ok')");
        write(&repo, "bad.py", &[0xff, 0xfe, 0x00, 0x80]);

        let index = SqliteVectorIndex::in_memory(64).expect("open");
        let indexer = RepositoryIndexer::new(encoder(), index.clone(), vec!["py".to_string()]);

        let report = indexer.index(repo.path()).await.expect("index");
        assert_eq!(report.indexed, 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn missing_root_aborts() {
        let index = SqliteVectorIndex::in_memory(64).expect("open");
        let indexer = RepositoryIndexer::new(encoder(), index, vec!["py".to_string()]);

        let result = indexer.index(Path::new("/definitely/not/here")).await;
        assert!(matches!(result, Err(IndexerError::NotADirectory { .. })));
    }

    #[tokio::test]
    async fn updated_content_replaces_row() {
        let repo = TempDir::new().expect("temp dir");
        write(&repo, "a.py", b"first version of the module");

        let index = SqliteVectorIndex::in_memory(64).expect("open");
        let indexer = RepositoryIndexer::new(encoder(), index.clone(), vec!["py".to_string()]);
        indexer.index(repo.path()).await.expect("index");

        write(&repo, "a.py", b"second version entirely rewritten");
        indexer.index(repo.path()).await.expect("reindex");

        let record = index
            .get("a.py".to_string())
            .await
            .expect("get")
            .expect("present");
        assert!(record.content.contains("second version"));
        assert_eq!(index.count().await.expect("count"), 1);
    }
}
