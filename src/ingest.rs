//! `qa ingest` and `qa rebuild`.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use crate::config::Config;
use crate::scan::collect_files;
use crate::session::open_session;

/// Ingest every file named by `paths` (directories are walked).
///
/// A failing file is reported and skipped; the command fails at the end if
/// any file failed.
pub async fn run_ingest(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let files = collect_files(paths)?;
    if files.is_empty() {
        bail!("No supported files found under the given paths");
    }

    let session = open_session(config).await?;
    let mut failed = 0usize;

    for file in &files {
        let bytes = std::fs::read(&file.path)
            .with_context(|| format!("Failed to read {}", file.path.display()))?;

        match session.ingest(&bytes, &file.source_name).await {
            Ok(outcome) => {
                println!("ingest {}", outcome.source_name);
                println!("  document: {}", outcome.document_id);
                println!("  format: {}", outcome.format);
                println!("  chunks: {}", outcome.chunks_created);
                println!("  indexed: {}", outcome.indexed.len());
                for warning in &outcome.warnings {
                    println!("  warning: {}", warning);
                }
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(source = %file.source_name, code = e.code(), "ingest failed");
                eprintln!("ingest {} failed: {}", file.source_name, e);
            }
        }
    }

    println!();
    println!("Ingested {} of {} files.", files.len() - failed, files.len());
    if failed > 0 {
        bail!("{} file(s) failed to ingest", failed);
    }
    Ok(())
}

/// Drop every document, chunk and vector in the configured namespace.
pub async fn run_rebuild(config: &Config) -> Result<()> {
    let session = open_session(config).await?;
    session.rebuild().await?;
    println!("Namespace '{}' cleared.", session.namespace());
    Ok(())
}
