//! Embedding indexer.
//!
//! Turns chunks into vectors through an [`EmbeddingService`] and writes
//! them to a [`Store`]. Chunks whose content hash already has a vector for
//! the active model are skipped, so re-indexing an unchanged document makes
//! no embedding calls.

use std::sync::Arc;
use std::time::Duration;

use crate::embedding::EmbeddingService;
use crate::error::{with_deadline, QaError, Result};
use crate::models::{Chunk, EmbeddingRecord, KbStats, VectorMetadata};
use crate::store::Store;

pub const DEFAULT_BATCH_SIZE: usize = 64;

/// A chunk that could not be embedded or written.
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub chunk_id: String,
    pub error: QaError,
}

/// Outcome of indexing a set of chunks.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    /// Chunk ids whose vectors are in the index after this call.
    pub indexed: Vec<String>,
    /// How many of `indexed` already had an up-to-date vector.
    pub reused: usize,
    pub failures: Vec<ChunkFailure>,
}

impl IndexReport {
    /// Fail with the first underlying error when nothing was indexed.
    pub fn into_result(self) -> Result<Self> {
        if self.indexed.is_empty() {
            if let Some(first) = self.failures.first() {
                return Err(first.error.clone());
            }
        }
        Ok(self)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.chunk_id, f.error))
            .collect()
    }

    fn fail_all(&mut self, chunks: &[&Chunk], error: &QaError) {
        for chunk in chunks {
            self.failures.push(ChunkFailure {
                chunk_id: chunk.chunk_id.clone(),
                error: error.clone(),
            });
        }
    }
}

pub struct Indexer {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingService>,
    batch_size: usize,
    timeout: Duration,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingService>,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    /// Embed and store vectors for `chunks`.
    ///
    /// Never fails as a whole; per-chunk problems are collected in the
    /// report. Use [`IndexReport::into_result`] to turn a total failure
    /// into an error.
    pub async fn index(&self, chunks: &[Chunk]) -> IndexReport {
        let model = self.embedder.model_name().to_string();
        let mut report = IndexReport::default();
        let mut pending: Vec<&Chunk> = Vec::new();

        for chunk in chunks {
            match self.store.embedded_hash(&chunk.chunk_id, &model).await {
                Ok(Some(hash)) if hash == chunk.hash => {
                    report.indexed.push(chunk.chunk_id.clone());
                    report.reused += 1;
                }
                Ok(_) => pending.push(chunk),
                Err(e) => report.failures.push(ChunkFailure {
                    chunk_id: chunk.chunk_id.clone(),
                    error: e,
                }),
            }
        }

        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = match with_deadline(
                "embedding service",
                self.timeout,
                self.embedder.embed_batch(&texts),
            )
            .await
            {
                Ok(vectors) if vectors.len() == batch.len() => vectors,
                Ok(vectors) => {
                    let err = QaError::EmbeddingService(format!(
                        "returned {} vectors for {} texts",
                        vectors.len(),
                        batch.len()
                    ));
                    tracing::warn!(error = %err, "embedding batch rejected");
                    report.fail_all(batch, &err);
                    continue;
                }
                Err(err) => {
                    tracing::warn!(error = %err, chunks = batch.len(), "embedding batch failed");
                    report.fail_all(batch, &err);
                    continue;
                }
            };

            for (chunk, vector) in batch.iter().zip(vectors) {
                if vector.len() != self.embedder.dims() {
                    report.failures.push(ChunkFailure {
                        chunk_id: chunk.chunk_id.clone(),
                        error: QaError::EmbeddingService(format!(
                            "expected {} dimensions, got {}",
                            self.embedder.dims(),
                            vector.len()
                        )),
                    });
                    continue;
                }
                let record = EmbeddingRecord {
                    chunk_id: chunk.chunk_id.clone(),
                    vector,
                    model: model.clone(),
                    content_hash: chunk.hash.clone(),
                    metadata: VectorMetadata {
                        source_name: chunk.source_name.clone(),
                        document_id: chunk.document_id.clone(),
                    },
                };
                match self.store.upsert_vector(&record).await {
                    Ok(()) => report.indexed.push(chunk.chunk_id.clone()),
                    Err(e) => {
                        tracing::warn!(
                            chunk_id = %chunk.chunk_id,
                            error = %e,
                            "vector write failed"
                        );
                        report.failures.push(ChunkFailure {
                            chunk_id: chunk.chunk_id.clone(),
                            error: e,
                        });
                    }
                }
            }
        }

        tracing::debug!(
            indexed = report.indexed.len(),
            reused = report.reused,
            failed = report.failures.len(),
            "index pass complete"
        );
        report
    }

    /// Discard the entire namespace.
    pub async fn rebuild(&self) -> Result<()> {
        tracing::info!(namespace = self.store.namespace(), "rebuilding index");
        self.store.delete_all().await
    }

    pub async fn stats(&self) -> Result<KbStats> {
        self.store.stats().await
    }
}
