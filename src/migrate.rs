//! Schema creation. Every statement is idempotent, so migrations run on
//! `qa init` and again whenever a session opens the database.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Documents: one row per source name per namespace.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            namespace TEXT NOT NULL,
            id TEXT NOT NULL,
            source_name TEXT NOT NULL,
            format TEXT NOT NULL,
            content TEXT NOT NULL,
            raw_content TEXT NOT NULL,
            ingested_at INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            revision INTEGER NOT NULL,
            PRIMARY KEY (namespace, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunks: `ordinal` records first-insert order and breaks score ties.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            ordinal INTEGER PRIMARY KEY AUTOINCREMENT,
            namespace TEXT NOT NULL,
            id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            source_name TEXT NOT NULL,
            text TEXT NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            sequence_index INTEGER NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(namespace, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One vector per chunk, little-endian f32 blob.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            namespace TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            source_name TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (namespace, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(namespace, document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_format ON documents(namespace, format, revision DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_model ON chunk_vectors(namespace, model)")
        .execute(pool)
        .await?;

    Ok(())
}
