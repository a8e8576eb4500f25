//! Wire a [`Session`] from the application config.

use anyhow::{Context, Result};
use std::sync::Arc;

use qa_harness_core::Session;

use crate::completion::create_completer;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::migrate::run_migrations;
use crate::parser::FileParser;
use crate::sqlite_store::SqliteStore;

/// Open the configured database (creating the schema if needed) and build
/// a session over the configured namespace and providers.
pub async fn open_session(config: &Config) -> Result<Session> {
    let pool = db::connect(config).await?;
    run_migrations(&pool).await?;

    let store = Arc::new(SqliteStore::new(pool, config.index.namespace.clone()));
    let embedder = create_embedder(&config.embedding)?;
    let completer = create_completer(&config.generation)?;

    tracing::debug!(
        namespace = %config.index.namespace,
        embedder = embedder.model_name(),
        completer = completer.model_name(),
        "session opened"
    );

    Session::new(
        store,
        embedder,
        completer,
        Arc::new(FileParser),
        config.session_settings()?,
    )
    .context("Invalid session settings")
}
