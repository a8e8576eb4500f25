//! Storage abstraction for the knowledge base.
//!
//! The [`Store`] trait is the persistent vector index seen by the pipeline:
//! documents, their chunks, and one embedding per chunk, all scoped to a
//! collection namespace. The app crate provides a SQLite implementation;
//! [`memory::InMemoryStore`] backs tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::cmp::Ordering;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chunk, Document, DocumentFormat, EmbeddingRecord, KbStats};

/// Collection namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "qa_agent_docs";

/// A chunk returned from vector search.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk: Chunk,
    /// Ingestion order assigned by the store on first insert.
    pub ordinal: i64,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](Store::upsert_document) | Insert or replace a document |
/// | [`replace_chunks`](Store::replace_chunks) | Reconcile a document's chunk set |
/// | [`upsert_vector`](Store::upsert_vector) | Store the embedding for a chunk |
/// | [`embedded_hash`](Store::embedded_hash) | Content hash behind a stored vector |
/// | [`vector_search`](Store::vector_search) | Top-k by cosine similarity |
/// | [`delete_all`](Store::delete_all) | Drop the whole namespace |
#[async_trait]
pub trait Store: Send + Sync {
    /// The collection namespace this store reads and writes.
    fn namespace(&self) -> &str;

    /// Insert a document or replace the one with the same id.
    async fn upsert_document(&self, doc: &Document) -> Result<()>;

    /// Make `chunks` the complete chunk set of `document_id`.
    ///
    /// Chunks that disappeared are deleted with their vectors. Chunks whose
    /// hash changed are updated and lose their vector. Unchanged chunks keep
    /// their vector and their ordinal.
    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Store or overwrite the vector for `record.chunk_id`.
    async fn upsert_vector(&self, record: &EmbeddingRecord) -> Result<()>;

    /// Content hash recorded with the chunk's vector for `model`, if any.
    async fn embedded_hash(&self, chunk_id: &str, model: &str) -> Result<Option<String>>;

    /// The `k` chunks most similar to `query_vec`, ranked by [`rank_candidates`].
    async fn vector_search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ChunkCandidate>>;

    /// Distinct embedding models present in the namespace.
    async fn indexed_models(&self) -> Result<Vec<String>>;

    async fn stats(&self) -> Result<KbStats>;

    /// The most recently ingested document of `format`.
    async fn latest_document(&self, format: DocumentFormat) -> Result<Option<Document>>;

    /// Discard every document, chunk and vector in the namespace.
    async fn delete_all(&self) -> Result<()>;
}

/// Order candidates by descending score, then ingestion order, then chunk
/// id, keeping the first `k`.
pub fn rank_candidates(mut candidates: Vec<ChunkCandidate>, k: usize) -> Vec<ChunkCandidate> {
    candidates.sort_by(candidate_order);
    candidates.truncate(k);
    candidates
}

fn candidate_order(a: &ChunkCandidate, b: &ChunkCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.ordinal.cmp(&b.ordinal))
        .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
}
