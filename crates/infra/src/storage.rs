//! Storage gateway: retried, chunked and batched operations over a [`BlobStore`].
//!
//! | Operation | Remote calls | Failure behaviour |
//! |-----------|--------------|-------------------|
//! | `upload` | 1..=max_attempts `upload` | retried per policy, last fault wrapped with the path |
//! | `delete_many` | one `remove` per chunk of ≤ 1000, sequential | first failing chunk aborts, later chunks never run |
//! | `list_recursive` | one `list` | leaves only, expanded to `prefix/name`; a cut-off listing is an error |
//! | `move_many` | ≤ 10 moves in flight | fail-together |
//! | `move_many_settled` | ≤ 10 moves in flight | collect-all |

use thiserror::Error;
use tracing::{debug, info, warn};

use forgepress_content::FileMove;
use forgepress_core::{Classify, Fault, FaultKind};

use crate::batch::{BatchOutcome, BatchProcessor, PartialBatchError};
use crate::blob_store::{BlobStore, SortBy};
use crate::config::StorageConfig;
use crate::retry::execute_with_retry;

/// Storage gateway error. Every variant names the path or chunk that failed.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("upload of '{path}' failed: {source}")]
    Upload { path: String, source: Fault },

    #[error("delete chunk {chunk} of {total} failed: {source}")]
    DeleteChunk {
        chunk: usize,
        total: usize,
        source: Fault,
    },

    #[error("listing '{prefix}' failed: {source}")]
    List { prefix: String, source: Fault },

    /// The listing had more than `limit` entries, so some files would go unseen.
    #[error("listing '{prefix}' exceeds {limit} entries")]
    ListTruncated { prefix: String, limit: usize },

    #[error("move '{from}' -> '{to}' failed: {source}")]
    Move {
        from: String,
        to: String,
        source: Fault,
    },

    #[error(transparent)]
    PartialBatch(#[from] PartialBatchError),
}

impl StorageError {
    /// The remote fault behind this error, if it wraps exactly one.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            StorageError::Upload { source, .. }
            | StorageError::DeleteChunk { source, .. }
            | StorageError::List { source, .. }
            | StorageError::Move { source, .. } => Some(source),
            StorageError::ListTruncated { .. } | StorageError::PartialBatch(_) => None,
        }
    }
}

impl Classify for StorageError {
    fn fault_kind(&self) -> FaultKind {
        self.fault().map(|f| f.kind).unwrap_or(FaultKind::Internal)
    }

    fn is_transient(&self) -> bool {
        self.fault().is_some_and(|f| f.transient)
    }
}

/// High-level file operations used by the content service.
#[derive(Debug, Clone)]
pub struct StorageGateway<B> {
    store: B,
    config: StorageConfig,
}

impl<B: BlobStore> StorageGateway<B> {
    pub fn new(store: B) -> Self {
        Self::with_config(store, StorageConfig::default())
    }

    pub fn with_config(store: B, config: StorageConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Upload one file, retrying transient faults.
    pub async fn upload(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let overwrite = self.config.upload_overwrite;
        execute_with_retry(&self.config.upload_retry, "storage.upload", || {
            self.store.upload(path, bytes, overwrite)
        })
        .await
        .map_err(|source| StorageError::Upload {
            path: path.to_string(),
            source,
        })?;

        debug!(path, size = bytes.len(), "uploaded file");
        Ok(())
    }

    /// Remove `paths` in sequential chunks. Returns how many paths were submitted.
    pub async fn delete_many(&self, paths: Vec<String>) -> Result<usize, StorageError> {
        if paths.is_empty() {
            return Ok(0);
        }

        let chunk_size = self.config.delete_chunk_size.max(1);
        let total = paths.len().div_ceil(chunk_size);

        for (i, chunk) in paths.chunks(chunk_size).enumerate() {
            self.store
                .remove(chunk)
                .await
                .map_err(|source| StorageError::DeleteChunk {
                    chunk: i + 1,
                    total,
                    source,
                })?;
            debug!(chunk = i + 1, total, size = chunk.len(), "deleted chunk");
        }

        info!(count = paths.len(), chunks = total, "deleted files");
        Ok(paths.len())
    }

    /// Every file below `prefix`, as full paths.
    ///
    /// Relies on the store returning all leaf descendants from a single listing.
    /// `list_limit` bounds the entries of that listing, folder placeholders
    /// included; a listing with more entries fails instead of returning a
    /// partial set.
    pub async fn list_recursive(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = prefix.trim_end_matches('/');
        let limit = self.config.list_limit;
        let entries = self
            .store
            .list(prefix, limit.saturating_add(1), SortBy::NameAsc)
            .await
            .map_err(|source| StorageError::List {
                prefix: prefix.to_string(),
                source,
            })?;

        if entries.len() > limit {
            warn!(prefix, limit, "listing exceeds the limit");
            return Err(StorageError::ListTruncated {
                prefix: prefix.to_string(),
                limit,
            });
        }

        Ok(entries
            .into_iter()
            .filter(|e| e.is_leaf)
            .map(|e| format!("{prefix}/{}", e.name))
            .collect())
    }

    /// Move every pair, at most `move_batch_size` in flight; stop at the first failing window.
    ///
    /// Moves already completed by sibling items are not undone here.
    pub async fn move_many(&self, moves: Vec<FileMove>) -> Result<Vec<FileMove>, StorageError> {
        if moves.is_empty() {
            return Ok(Vec::new());
        }
        let processor = BatchProcessor::new(self.config.move_batch_size);
        processor
            .process(moves, |mv: FileMove| async move { self.move_one(mv).await })
            .await
    }

    /// Move every pair, collecting successes and failures side by side.
    pub async fn move_many_settled(
        &self,
        moves: Vec<FileMove>,
    ) -> BatchOutcome<FileMove, FileMove, StorageError> {
        let processor = BatchProcessor::new(self.config.move_batch_size);
        processor
            .process_settled(moves, |mv: FileMove| async move { self.move_one(mv).await })
            .await
    }

    /// Native move, falling back to copy + delete-source when the store refuses.
    async fn move_one(&self, mv: FileMove) -> Result<FileMove, StorageError> {
        let native = match self.store.move_object(&mv.from, &mv.to).await {
            Ok(()) => return Ok(mv),
            Err(fault) => fault,
        };
        debug!(from = %mv.from, to = %mv.to, error = %native, "native move failed, copying instead");

        if let Err(source) = self.store.copy_object(&mv.from, &mv.to).await {
            return Err(StorageError::Move {
                from: mv.from,
                to: mv.to,
                source,
            });
        }

        if let Err(source) = self.store.remove(std::slice::from_ref(&mv.from)).await {
            // Undo the copy so the pair is either fully moved or not moved at all.
            if let Err(cleanup) = self.store.remove(std::slice::from_ref(&mv.to)).await {
                warn!(path = %mv.to, error = %cleanup, "failed to remove copied file after move failure");
            }
            return Err(StorageError::Move {
                from: mv.from,
                to: mv.to,
                source,
            });
        }

        Ok(mv)
    }
}
