//! Top-k semantic retrieval over the vector index.

use std::sync::Arc;
use std::time::Duration;

use crate::embedding::{embed_one, EmbeddingService};
use crate::error::{with_deadline, QaError, Result};
use crate::models::RetrievalResult;
use crate::store::Store;

pub const DEFAULT_K: usize = 8;
pub const MAX_K: usize = 50;

/// Reject `k` outside `[1, MAX_K]`.
pub fn validate_k(k: usize) -> Result<usize> {
    if k == 0 || k > MAX_K {
        return Err(QaError::InvalidRequest(format!(
            "k must be between 1 and {MAX_K}, got {k}"
        )));
    }
    Ok(k)
}

pub struct Retriever {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingService>,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingService>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            timeout,
        }
    }

    /// The `k` chunks most similar to `text`, best first.
    ///
    /// An empty index or a blank query yields an empty result without
    /// calling the embedding service.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        let k = validate_k(k)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let models = self.store.indexed_models().await?;
        if models.is_empty() {
            return Ok(Vec::new());
        }
        let query_model = self.embedder.model_name();
        if let Some(indexed) = models.iter().find(|m| m.as_str() != query_model) {
            return Err(QaError::EmbeddingModelMismatch {
                indexed: indexed.clone(),
                query: query_model.to_string(),
            });
        }

        let vector = with_deadline(
            "embedding service",
            self.timeout,
            embed_one(self.embedder.as_ref(), text),
        )
        .await?;

        let candidates = self.store.vector_search(&vector, k).await?;
        tracing::debug!(k, hits = candidates.len(), "retrieval complete");

        Ok(candidates
            .into_iter()
            .map(|c| RetrievalResult {
                chunk: c.chunk,
                similarity_score: c.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunker;
    use crate::embedding::HashingEmbedder;
    use crate::index::Indexer;
    use crate::models::{Document, DocumentFormat, ParsedDocument};
    use crate::store::memory::InMemoryStore;

    async fn ingest(
        store: &Arc<InMemoryStore>,
        embedder: &Arc<HashingEmbedder>,
        name: &str,
        text: &str,
    ) {
        let doc = Document::from_parsed(ParsedDocument {
            source_name: name.into(),
            format: DocumentFormat::Markdown,
            content: text.into(),
            raw_content: text.into(),
        });
        let chunks = Chunker::default().split(&doc).unwrap();
        store.upsert_document(&doc).await.unwrap();
        store.replace_chunks(&doc.id, &chunks).await.unwrap();
        Indexer::new(store.clone(), embedder.clone(), 8, Duration::from_secs(5))
            .index(&chunks)
            .await
            .into_result()
            .unwrap();
    }

    #[tokio::test]
    async fn test_k_bounds_enforced() {
        let retriever = Retriever::new(
            Arc::new(InMemoryStore::default()),
            Arc::new(HashingEmbedder::new(8)),
            Duration::from_secs(1),
        );
        assert!(matches!(
            retriever.query("x", 0).await,
            Err(QaError::InvalidRequest(_))
        ));
        assert!(matches!(
            retriever.query("x", 51).await,
            Err(QaError::InvalidRequest(_))
        ));
        assert!(retriever.query("x", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_best_match_first_and_ties_by_ingestion_order() {
        let store = Arc::new(InMemoryStore::default());
        let embedder = Arc::new(HashingEmbedder::new(128));
        ingest(&store, &embedder, "shipping.md", "express shipping costs ten dollars").await;
        ingest(&store, &embedder, "first.md", "discount code").await;
        ingest(&store, &embedder, "second.md", "discount code").await;

        let retriever = Retriever::new(store, embedder, Duration::from_secs(5));
        let results = retriever.query("discount code", 3).await.unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.source_name()).collect();
        assert_eq!(names, vec!["first.md", "second.md", "shipping.md"]);
        assert!(results[0].similarity_score >= results[2].similarity_score);
    }

    #[tokio::test]
    async fn test_model_mismatch_detected() {
        let store = Arc::new(InMemoryStore::default());
        ingest(&store, &Arc::new(HashingEmbedder::new(16)), "a.md", "alpha").await;
        let retriever = Retriever::new(
            store,
            Arc::new(HashingEmbedder::new(32)),
            Duration::from_secs(5),
        );
        let err = retriever.query("alpha", 4).await.unwrap_err();
        match err {
            QaError::EmbeddingModelMismatch { indexed, query } => {
                assert_eq!(indexed, "hashing-16");
                assert_eq!(query, "hashing-32");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
