//! `qa generate` and `qa script`, plus the JSON test-case file they share.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use qa_harness_core::models::TestCase;

use crate::config::Config;
use crate::session::open_session;

/// On-disk form of a generation result. Extra fields are ignored on load,
/// so a saved `GenerationOutcome` is a valid cases file.
#[derive(Debug, Serialize, Deserialize)]
pub struct CasesFile {
    pub test_cases: Vec<TestCase>,
}

pub fn load_cases(path: &Path) -> Result<Vec<TestCase>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read cases file: {}", path.display()))?;
    let file: CasesFile = serde_json::from_str(&content)
        .with_context(|| format!("Invalid cases file: {}", path.display()))?;
    Ok(file.test_cases)
}

pub async fn run_generate(
    config: &Config,
    request: &str,
    chunks: Option<usize>,
    out: Option<&Path>,
) -> Result<()> {
    let session = open_session(config).await?;
    let outcome = session.generate_test_cases(request, chunks).await?;

    for warning in &outcome.warnings {
        eprintln!("warning: {}", warning);
    }
    println!(
        "sources: {}",
        outcome.sources_used.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    println!("test cases: {}", outcome.test_cases.len());

    if let Some(path) = out {
        let json = serde_json::to_string_pretty(&outcome)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("written: {}", path.display());
        return Ok(());
    }

    for case in &outcome.test_cases {
        println!();
        println!("{} [{:?}] {}", case.test_id, case.category, case.title);
        if !case.preconditions.is_empty() {
            println!("  preconditions: {}", case.preconditions);
        }
        for (i, step) in case.steps.iter().enumerate() {
            if step.data.is_empty() {
                println!("  {}. {}", i + 1, step.action);
            } else {
                println!("  {}. {} ({})", i + 1, step.action, step.data);
            }
        }
        println!("  expected: {}", case.expected_result);
        println!(
            "  sources: {}",
            case.source_documents.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    Ok(())
}

pub async fn run_script(
    config: &Config,
    cases_path: &Path,
    test_id: &str,
    html_path: Option<&Path>,
    out: Option<&Path>,
) -> Result<()> {
    let session = open_session(config).await?;
    session.load_test_cases(load_cases(cases_path)?);

    let html = match html_path {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read target page: {}", path.display()))?,
        ),
        None => None,
    };

    let artifact = session.generate_script_for(test_id, html.as_deref()).await?;

    match out {
        Some(path) => {
            std::fs::write(path, &artifact.script_text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("test: {}", artifact.test_id);
            println!("target: {}", artifact.target_source);
            if let Some(description) = &artifact.description {
                println!("description: {}", description);
            }
            println!("elements: {}", artifact.element_refs.join(", "));
            println!("written: {}", path.display());
        }
        None => print!("{}", artifact.script_text),
    }
    Ok(())
}
