//! `qa stats`: knowledge-base counters for the configured namespace.

use anyhow::Result;

use crate::config::Config;
use crate::session::open_session;

pub async fn run_stats(config: &Config) -> Result<()> {
    let session = open_session(config).await?;
    let stats = session.get_stats().await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("QA Harness: Knowledge Base");
    println!("===========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Namespace:   {}", session.namespace());
    println!();
    println!("  Documents:   {}", stats.document_count);
    println!("  Chunks:      {}", stats.chunk_count);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded_count,
        stats.chunk_count,
        if stats.chunk_count > 0 {
            (stats.embedded_count * 100) / stats.chunk_count
        } else {
            0
        }
    );
    println!(
        "  Target page: {}",
        if stats.has_target_page { "yes" } else { "no" }
    );
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
