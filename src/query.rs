//! `qa query`: show the chunks retrieved for a question.

use anyhow::Result;

use crate::config::Config;
use crate::session::open_session;

/// Characters of chunk text shown per result.
const PREVIEW_CHARS: usize = 240;

pub async fn run_query(config: &Config, text: &str, k: Option<usize>) -> Result<()> {
    let session = open_session(config).await?;
    let results = session.query(text, k).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} ({})",
            i + 1,
            result.similarity_score,
            result.source_name(),
            result.chunk.chunk_id
        );
        println!("    {}", preview(&result.chunk.text));
    }
    Ok(())
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
