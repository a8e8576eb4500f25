//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap`s behind a single `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over all stored vectors.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{QaError, Result};
use crate::models::{Chunk, Document, DocumentFormat, EmbeddingRecord, KbStats};

use super::{rank_candidates, ChunkCandidate, Store, DEFAULT_NAMESPACE};

struct StoredDoc {
    doc: Document,
    /// Bumped on every upsert; the highest value is the latest document.
    revision: u64,
}

struct StoredChunk {
    chunk: Chunk,
    ordinal: i64,
}

struct StoredVector {
    vector: Vec<f32>,
    model: String,
    content_hash: String,
}

#[derive(Default)]
struct State {
    docs: HashMap<String, StoredDoc>,
    chunks: HashMap<String, StoredChunk>,
    vectors: HashMap<String, StoredVector>,
    next_ordinal: i64,
    next_revision: u64,
}

pub struct InMemoryStore {
    namespace: String,
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| QaError::IndexRead("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| QaError::IndexWrite("in-memory store lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        let mut state = self.write()?;
        state.next_revision += 1;
        let revision = state.next_revision;
        state.docs.insert(
            doc.id.clone(),
            StoredDoc {
                doc: doc.clone(),
                revision,
            },
        );
        Ok(())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        if !state.docs.contains_key(document_id) {
            return Err(QaError::IndexWrite(format!(
                "cannot store chunks for unknown document {document_id}"
            )));
        }

        let keep: HashSet<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        let stale: Vec<String> = state
            .chunks
            .values()
            .filter(|sc| sc.chunk.document_id == document_id)
            .filter(|sc| !keep.contains(sc.chunk.chunk_id.as_str()))
            .map(|sc| sc.chunk.chunk_id.clone())
            .collect();
        for id in stale {
            state.chunks.remove(&id);
            state.vectors.remove(&id);
        }

        for chunk in chunks {
            let changed = match state.chunks.get_mut(&chunk.chunk_id) {
                Some(existing) if existing.chunk.hash == chunk.hash => {
                    existing.chunk = chunk.clone();
                    false
                }
                Some(existing) => {
                    existing.chunk = chunk.clone();
                    true
                }
                None => {
                    state.next_ordinal += 1;
                    let ordinal = state.next_ordinal;
                    state.chunks.insert(
                        chunk.chunk_id.clone(),
                        StoredChunk {
                            chunk: chunk.clone(),
                            ordinal,
                        },
                    );
                    false
                }
            };
            if changed {
                state.vectors.remove(&chunk.chunk_id);
            }
        }
        Ok(())
    }

    async fn upsert_vector(&self, record: &EmbeddingRecord) -> Result<()> {
        let mut state = self.write()?;
        if !state.chunks.contains_key(&record.chunk_id) {
            return Err(QaError::IndexWrite(format!(
                "cannot store vector for unknown chunk {}",
                record.chunk_id
            )));
        }
        state.vectors.insert(
            record.chunk_id.clone(),
            StoredVector {
                vector: record.vector.clone(),
                model: record.model.clone(),
                content_hash: record.content_hash.clone(),
            },
        );
        Ok(())
    }

    async fn embedded_hash(&self, chunk_id: &str, model: &str) -> Result<Option<String>> {
        let state = self.read()?;
        Ok(state
            .vectors
            .get(chunk_id)
            .filter(|sv| sv.model == model)
            .map(|sv| sv.content_hash.clone()))
    }

    async fn vector_search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ChunkCandidate>> {
        let state = self.read()?;
        let candidates = state
            .vectors
            .iter()
            .filter_map(|(chunk_id, sv)| {
                state.chunks.get(chunk_id).map(|sc| ChunkCandidate {
                    chunk: sc.chunk.clone(),
                    ordinal: sc.ordinal,
                    score: cosine_similarity(query_vec, &sv.vector),
                })
            })
            .collect();
        Ok(rank_candidates(candidates, k))
    }

    async fn indexed_models(&self) -> Result<Vec<String>> {
        let state = self.read()?;
        let mut models: Vec<String> = state
            .vectors
            .values()
            .map(|sv| sv.model.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        models.sort();
        Ok(models)
    }

    async fn stats(&self) -> Result<KbStats> {
        let state = self.read()?;
        Ok(KbStats {
            document_count: state.docs.len(),
            chunk_count: state.chunks.len(),
            embedded_count: state.vectors.len(),
            has_target_page: state
                .docs
                .values()
                .any(|sd| sd.doc.format == DocumentFormat::Html),
        })
    }

    async fn latest_document(&self, format: DocumentFormat) -> Result<Option<Document>> {
        let state = self.read()?;
        Ok(state
            .docs
            .values()
            .filter(|sd| sd.doc.format == format)
            .max_by_key(|sd| sd.revision)
            .map(|sd| sd.doc.clone()))
    }

    async fn delete_all(&self) -> Result<()> {
        let mut state = self.write()?;
        state.docs.clear();
        state.chunks.clear();
        state.vectors.clear();
        Ok(())
    }
}
