//! SQLite-backed [`Store`] implementation.
//!
//! Every row carries the collection namespace, so several knowledge bases
//! can share one database file. Vector search is brute-force cosine
//! similarity over the namespace's vectors, ranked with
//! [`rank_candidates`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use qa_harness_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use qa_harness_core::models::{Chunk, Document, DocumentFormat, EmbeddingRecord, KbStats};
use qa_harness_core::store::{rank_candidates, ChunkCandidate, Store};
use qa_harness_core::{QaError, Result};

pub struct SqliteStore {
    pool: SqlitePool,
    namespace: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }
}

fn write_err(e: sqlx::Error) -> QaError {
    QaError::IndexWrite(e.to_string())
}

fn read_err(e: sqlx::Error) -> QaError {
    QaError::IndexRead(e.to_string())
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    let start: i64 = row.get("start_offset");
    let end: i64 = row.get("end_offset");
    let sequence: i64 = row.get("sequence_index");
    Chunk {
        chunk_id: row.get("id"),
        document_id: row.get("document_id"),
        source_name: row.get("source_name"),
        text: row.get("text"),
        start_offset: start as usize,
        end_offset: end as usize,
        sequence_index: sequence as usize,
        hash: row.get("hash"),
    }
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let format: String = row.get("format");
    let format = DocumentFormat::from_name(&format)
        .ok_or_else(|| QaError::IndexRead(format!("unknown stored document format '{format}'")))?;
    let micros: i64 = row.get("ingested_at");
    Ok(Document {
        id: row.get("id"),
        source_name: row.get("source_name"),
        format,
        content: row.get("content"),
        raw_content: row.get("raw_content"),
        ingested_at: DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default(),
        content_hash: row.get("content_hash"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (namespace, id, source_name, format, content, raw_content,
                                   ingested_at, content_hash, revision)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?,
                    (SELECT COALESCE(MAX(revision), 0) + 1 FROM documents WHERE namespace = ?))
            ON CONFLICT(namespace, id) DO UPDATE SET
                source_name = excluded.source_name,
                format = excluded.format,
                content = excluded.content,
                raw_content = excluded.raw_content,
                ingested_at = excluded.ingested_at,
                content_hash = excluded.content_hash,
                revision = excluded.revision
            "#,
        )
        .bind(&self.namespace)
        .bind(&doc.id)
        .bind(&doc.source_name)
        .bind(doc.format.as_str())
        .bind(&doc.content)
        .bind(&doc.raw_content)
        .bind(doc.ingested_at.timestamp_micros())
        .bind(&doc.content_hash)
        .bind(&self.namespace)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(write_err)?;

        let known: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM documents WHERE namespace = ? AND id = ?")
                .bind(&self.namespace)
                .bind(document_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(write_err)?;
        if known.is_none() {
            return Err(QaError::IndexWrite(format!(
                "cannot store chunks for unknown document {document_id}"
            )));
        }

        let rows =
            sqlx::query("SELECT id, hash FROM chunks WHERE namespace = ? AND document_id = ?")
                .bind(&self.namespace)
                .bind(document_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(write_err)?;
        let mut existing: HashMap<String, String> = rows
            .iter()
            .map(|row| (row.get("id"), row.get("hash")))
            .collect();

        for chunk in chunks {
            match existing.remove(&chunk.chunk_id) {
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO chunks (namespace, id, document_id, source_name, text,
                                            start_offset, end_offset, sequence_index, hash)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(&self.namespace)
                    .bind(&chunk.chunk_id)
                    .bind(&chunk.document_id)
                    .bind(&chunk.source_name)
                    .bind(&chunk.text)
                    .bind(chunk.start_offset as i64)
                    .bind(chunk.end_offset as i64)
                    .bind(chunk.sequence_index as i64)
                    .bind(&chunk.hash)
                    .execute(&mut *tx)
                    .await
                    .map_err(write_err)?;
                }
                Some(old_hash) => {
                    sqlx::query(
                        r#"
                        UPDATE chunks SET source_name = ?, text = ?, start_offset = ?,
                                          end_offset = ?, sequence_index = ?, hash = ?
                        WHERE namespace = ? AND id = ?
                        "#,
                    )
                    .bind(&chunk.source_name)
                    .bind(&chunk.text)
                    .bind(chunk.start_offset as i64)
                    .bind(chunk.end_offset as i64)
                    .bind(chunk.sequence_index as i64)
                    .bind(&chunk.hash)
                    .bind(&self.namespace)
                    .bind(&chunk.chunk_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(write_err)?;

                    if old_hash != chunk.hash {
                        sqlx::query(
                            "DELETE FROM chunk_vectors WHERE namespace = ? AND chunk_id = ?",
                        )
                        .bind(&self.namespace)
                        .bind(&chunk.chunk_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(write_err)?;
                    }
                }
            }
        }

        // Whatever is left was not in the new chunk set.
        for stale_id in existing.keys() {
            sqlx::query("DELETE FROM chunk_vectors WHERE namespace = ? AND chunk_id = ?")
                .bind(&self.namespace)
                .bind(stale_id)
                .execute(&mut *tx)
                .await
                .map_err(write_err)?;
            sqlx::query("DELETE FROM chunks WHERE namespace = ? AND id = ?")
                .bind(&self.namespace)
                .bind(stale_id)
                .execute(&mut *tx)
                .await
                .map_err(write_err)?;
        }

        tx.commit().await.map_err(write_err)?;
        Ok(())
    }

    async fn upsert_vector(&self, record: &EmbeddingRecord) -> Result<()> {
        let known: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM chunks WHERE namespace = ? AND id = ?")
                .bind(&self.namespace)
                .bind(&record.chunk_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(write_err)?;
        if known.is_none() {
            return Err(QaError::IndexWrite(format!(
                "cannot store vector for unknown chunk {}",
                record.chunk_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (namespace, chunk_id, document_id, source_name, model,
                                       dims, content_hash, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(namespace, chunk_id) DO UPDATE SET
                document_id = excluded.document_id,
                source_name = excluded.source_name,
                model = excluded.model,
                dims = excluded.dims,
                content_hash = excluded.content_hash,
                embedding = excluded.embedding
            "#,
        )
        .bind(&self.namespace)
        .bind(&record.chunk_id)
        .bind(&record.metadata.document_id)
        .bind(&record.metadata.source_name)
        .bind(&record.model)
        .bind(record.vector.len() as i64)
        .bind(&record.content_hash)
        .bind(vec_to_blob(&record.vector))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn embedded_hash(&self, chunk_id: &str, model: &str) -> Result<Option<String>> {
        sqlx::query_scalar(
            "SELECT content_hash FROM chunk_vectors WHERE namespace = ? AND chunk_id = ? AND model = ?",
        )
        .bind(&self.namespace)
        .bind(chunk_id)
        .bind(model)
        .fetch_optional(&self.pool)
        .await
        .map_err(read_err)
    }

    async fn vector_search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ChunkCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT c.ordinal, c.id, c.document_id, c.source_name, c.text, c.start_offset,
                   c.end_offset, c.sequence_index, c.hash, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.namespace = cv.namespace AND c.id = cv.chunk_id
            WHERE cv.namespace = ?
            "#,
        )
        .bind(&self.namespace)
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;

        let candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ChunkCandidate {
                    chunk: chunk_from_row(row),
                    ordinal: row.get("ordinal"),
                    score: cosine_similarity(query_vec, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank_candidates(candidates, k))
    }

    async fn indexed_models(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT model FROM chunk_vectors WHERE namespace = ? ORDER BY model",
        )
        .bind(&self.namespace)
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)
    }

    async fn stats(&self) -> Result<KbStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM documents WHERE namespace = ?1) AS documents,
                (SELECT COUNT(*) FROM chunks WHERE namespace = ?1) AS chunks,
                (SELECT COUNT(*) FROM chunk_vectors WHERE namespace = ?1) AS vectors,
                EXISTS(SELECT 1 FROM documents WHERE namespace = ?1 AND format = 'html') AS has_page
            "#,
        )
        .bind(&self.namespace)
        .fetch_one(&self.pool)
        .await
        .map_err(read_err)?;

        let documents: i64 = row.get("documents");
        let chunks: i64 = row.get("chunks");
        let vectors: i64 = row.get("vectors");
        let has_page: i64 = row.get("has_page");
        Ok(KbStats {
            document_count: documents as usize,
            chunk_count: chunks as usize,
            embedded_count: vectors as usize,
            has_target_page: has_page != 0,
        })
    }

    async fn latest_document(&self, format: DocumentFormat) -> Result<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT id, source_name, format, content, raw_content, ingested_at, content_hash
            FROM documents
            WHERE namespace = ? AND format = ?
            ORDER BY revision DESC
            LIMIT 1
            "#,
        )
        .bind(&self.namespace)
        .bind(format.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(read_err)?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn delete_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(write_err)?;
        for table in ["chunk_vectors", "chunks", "documents"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE namespace = ?"))
                .bind(&self.namespace)
                .execute(&mut *tx)
                .await
                .map_err(write_err)?;
        }
        tx.commit().await.map_err(write_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_path;
    use crate::migrate::run_migrations;
    use qa_harness_core::chunk::Chunker;
    use qa_harness_core::models::{ParsedDocument, VectorMetadata};
    use tempfile::TempDir;

    async fn store(tmp: &TempDir, namespace: &str) -> SqliteStore {
        let pool = connect_path(&tmp.path().join("qa.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool, namespace)
    }

    fn doc(name: &str, format: DocumentFormat, content: &str) -> Document {
        Document::from_parsed(ParsedDocument {
            source_name: name.to_string(),
            format,
            content: content.to_string(),
            raw_content: content.to_string(),
        })
    }

    fn record(chunk: &Chunk, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            chunk_id: chunk.chunk_id.clone(),
            vector,
            model: "test-model".to_string(),
            content_hash: chunk.hash.clone(),
            metadata: VectorMetadata {
                source_name: chunk.source_name.clone(),
                document_id: chunk.document_id.clone(),
            },
        }
    }

    #[tokio::test]
    async fn test_document_roundtrip_and_latest_page() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, "ns").await;
        let first = doc("a.html", DocumentFormat::Html, "<p>a</p>");
        let second = doc("b.html", DocumentFormat::Html, "<p>b</p>");
        store.upsert_document(&first).await.unwrap();
        store.upsert_document(&second).await.unwrap();

        let latest = store.latest_document(DocumentFormat::Html).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.raw_content, "<p>b</p>");

        // Re-upserting the first page makes it the latest again.
        store.upsert_document(&first).await.unwrap();
        let latest = store.latest_document(DocumentFormat::Html).await.unwrap().unwrap();
        assert_eq!(latest.id, first.id);
        assert!(store.latest_document(DocumentFormat::Pdf).await.unwrap().is_none());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.document_count, 2);
        assert!(stats.has_target_page);
    }

    #[tokio::test]
    async fn test_replace_chunks_keeps_unchanged_vectors() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, "ns").await;
        let chunker = Chunker::new(40, 10).unwrap();

        let v1 = doc(
            "spec.md",
            DocumentFormat::Markdown,
            "First paragraph here.\n\nSecond paragraph here.",
        );
        store.upsert_document(&v1).await.unwrap();
        let chunks = chunker.split(&v1).unwrap();
        store.replace_chunks(&v1.id, &chunks).await.unwrap();
        for chunk in &chunks {
            store.upsert_vector(&record(chunk, vec![1.0, 0.0])).await.unwrap();
        }
        assert_eq!(store.stats().await.unwrap().embedded_count, chunks.len());

        // Only the second paragraph changes.
        let v2 = doc(
            "spec.md",
            DocumentFormat::Markdown,
            "First paragraph here.\n\nSecond paragraph edited.",
        );
        store.upsert_document(&v2).await.unwrap();
        let new_chunks = chunker.split(&v2).unwrap();
        assert_eq!(new_chunks.len(), 2);
        assert_eq!(new_chunks[0].chunk_id, chunks[0].chunk_id);
        assert_eq!(new_chunks[0].hash, chunks[0].hash);
        assert_ne!(new_chunks[1].hash, chunks[1].hash);
        store.replace_chunks(&v2.id, &new_chunks).await.unwrap();

        let kept = store
            .embedded_hash(&new_chunks[0].chunk_id, "test-model")
            .await
            .unwrap();
        assert_eq!(kept.as_deref(), Some(chunks[0].hash.as_str()));
        let changed = store
            .embedded_hash(&new_chunks[1].chunk_id, "test-model")
            .await
            .unwrap();
        assert!(changed.is_none());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.embedded_count, 1);
    }

    #[tokio::test]
    async fn test_vector_search_ranks_and_tiebreaks() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, "ns").await;
        let chunker = Chunker::default();

        let mut all = Vec::new();
        for (name, text) in [("a.md", "alpha"), ("b.md", "beta"), ("c.md", "gamma")] {
            let d = doc(name, DocumentFormat::Markdown, text);
            store.upsert_document(&d).await.unwrap();
            let chunks = chunker.split(&d).unwrap();
            store.replace_chunks(&d.id, &chunks).await.unwrap();
            all.extend(chunks);
        }
        store.upsert_vector(&record(&all[0], vec![0.0, 1.0])).await.unwrap();
        store.upsert_vector(&record(&all[1], vec![1.0, 0.0])).await.unwrap();
        store.upsert_vector(&record(&all[2], vec![1.0, 0.0])).await.unwrap();

        let hits = store.vector_search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        // Equal scores fall back to ingestion order.
        assert_eq!(hits[0].chunk.source_name, "b.md");
        assert_eq!(hits[1].chunk.source_name, "c.md");
        assert!(hits[0].ordinal < hits[1].ordinal);
        assert_eq!(store.indexed_models().await.unwrap(), vec!["test-model".to_string()]);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let left = store(&tmp, "left").await;
        let right = SqliteStore::new(left.pool.clone(), "right");

        let d = doc("spec.md", DocumentFormat::Markdown, "content");
        left.upsert_document(&d).await.unwrap();
        assert_eq!(left.stats().await.unwrap().document_count, 1);
        assert_eq!(right.stats().await.unwrap(), KbStats::default());

        right.delete_all().await.unwrap();
        assert_eq!(left.stats().await.unwrap().document_count, 1);
        left.delete_all().await.unwrap();
        assert_eq!(left.stats().await.unwrap(), KbStats::default());
    }

    #[tokio::test]
    async fn test_orphan_writes_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, "ns").await;
        let d = doc("spec.md", DocumentFormat::Markdown, "content");
        let chunks = Chunker::default().split(&d).unwrap();

        let err = store.replace_chunks(&d.id, &chunks).await.unwrap_err();
        assert!(matches!(err, QaError::IndexWrite(_)));
        let err = store.upsert_vector(&record(&chunks[0], vec![1.0])).await.unwrap_err();
        assert!(matches!(err, QaError::IndexWrite(_)));
    }
}
