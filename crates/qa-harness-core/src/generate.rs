//! Grounded test-case generation.
//!
//! Builds a bounded context window from retrieved chunks, asks the
//! completion service for test cases in a fixed JSON shape, and then
//! enforces the grounding contract on what comes back:
//!
//! - the `{"test_cases": [...]}` envelope must parse, or the call fails
//! - each case must match the schema exactly; malformed cases are dropped
//! - each case must cite at least one source, and only sources whose
//!   chunks were actually sent to the model
//! - missing or duplicate ids cause every surviving case to be renumbered
//!
//! Nothing is repaired: a case is either accepted as emitted or dropped
//! with a warning.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::completion::{CompletionRequest, CompletionService};
use crate::error::{with_deadline, QaError, Result};
use crate::models::{Category, GenerationOutcome, RetrievalResult, TestCase, TestStep};

pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 24_000;

const BLOCK_SEPARATOR: &str =
    "\n--------------------------------------------------------------------------------\n\n";

pub const SYSTEM_PROMPT: &str = "You are a senior QA engineer who designs test cases from product \
documentation. Use only the documentation context you are given. Never introduce features, \
fields, values or behaviors that the context does not state. Every test case must list the \
source documents it is derived from. Reply with a single JSON object and nothing else.";

/// The portion of the retrieved evidence that fits into the prompt.
#[derive(Debug, Clone, Default)]
pub struct ContextWindow {
    pub text: String,
    /// Source names of the chunks included in `text`.
    pub sources: BTreeSet<String>,
    pub chunks_sent: usize,
    pub chunks_omitted: usize,
}

/// Lay out retrieved chunks in rank order, each tagged with its source,
/// stopping before the first chunk that would push the block past
/// `max_chars`. The top-ranked chunk is always included.
pub fn assemble_context(results: &[RetrievalResult], max_chars: usize) -> ContextWindow {
    let mut window = ContextWindow::default();
    let mut used = 0usize;

    for (i, result) in results.iter().enumerate() {
        let block = format!(
            "[Source: {}, Chunk {}]\n{}{}",
            result.chunk.source_name,
            result.chunk.sequence_index + 1,
            result.chunk.text,
            BLOCK_SEPARATOR
        );
        let len = block.chars().count();
        if i > 0 && used + len > max_chars {
            window.chunks_omitted = results.len() - i;
            break;
        }
        used += len;
        window.text.push_str(&block);
        window.sources.insert(result.chunk.source_name.clone());
        window.chunks_sent += 1;
    }

    window
}

/// The user prompt: request, evidence, rules and the output schema.
pub fn build_prompt(user_query: &str, context: &ContextWindow) -> String {
    let allowed = context
        .sources
        .iter()
        .map(|s| format!("\"{s}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"Design test cases for the web application described by the documentation below.

REQUEST:
{user_query}

DOCUMENTATION CONTEXT:
{context}
RULES:
- Derive every test case strictly from the documentation context above.
- Cover the happy path ("positive") and error handling ("negative").
- Use the exact field names, element ids and values the documentation gives.
- "source_documents" lists the documents a case is derived from; allowed values: [{allowed}].
- Do not add keys that are not in the schema.

OUTPUT (JSON object, exactly this shape):
{{
  "test_cases": [
    {{
      "test_id": "TC-001",
      "title": "Short description of the scenario",
      "category": "positive",
      "preconditions": "State required before the first step",
      "steps": [{{"action": "What the tester does", "data": "Input used, or empty"}}],
      "expected_result": "Observable outcome",
      "source_documents": ["document.md"]
    }}
  ]
}}
"#,
        context = context.text,
    )
}

#[derive(Deserialize)]
struct RawEnvelope {
    test_cases: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTestCase {
    #[serde(default)]
    test_id: Option<String>,
    title: String,
    category: Category,
    #[serde(default)]
    preconditions: String,
    steps: Vec<TestStep>,
    expected_result: String,
    #[serde(default)]
    source_documents: Vec<String>,
}

/// Validated cases plus the reasons anything was dropped.
#[derive(Debug, Clone, Default)]
pub struct ParsedCases {
    pub test_cases: Vec<TestCase>,
    pub warnings: Vec<String>,
}

/// Parse a model response against the schema and grounding rules.
pub fn parse_test_cases(response: &str, allowed_sources: &BTreeSet<String>) -> Result<ParsedCases> {
    let envelope: RawEnvelope = serde_json::from_str(response.trim()).map_err(|e| {
        QaError::schema(
            "test_cases",
            format!("response is not a test case envelope: {e}"),
        )
    })?;

    let emitted = envelope.test_cases.len();
    let mut warnings = Vec::new();
    let mut well_formed = Vec::new();

    for (position, value) in envelope.test_cases.into_iter().enumerate() {
        match serde_json::from_value::<RawTestCase>(value) {
            Ok(raw) => match check_shape(&raw) {
                Ok(()) => well_formed.push((position, raw)),
                Err(reason) => warnings.push(drop_warning(position, &reason)),
            },
            Err(e) => warnings.push(drop_warning(position, &e.to_string())),
        }
    }

    if emitted > 0 && well_formed.is_empty() {
        return Err(QaError::schema(
            "test_cases",
            format!("none of the {emitted} emitted test cases matched the schema"),
        ));
    }

    let mut grounded = Vec::new();
    for (position, raw) in well_formed {
        if raw.source_documents.is_empty() {
            warnings.push(drop_warning(position, "no source_documents cited"));
            continue;
        }
        let unknown: Vec<&str> = raw
            .source_documents
            .iter()
            .map(|s| s.as_str())
            .filter(|s| !allowed_sources.contains(*s))
            .collect();
        if !unknown.is_empty() {
            warnings.push(drop_warning(
                position,
                &format!("cites sources outside the retrieved context: {}", unknown.join(", ")),
            ));
            continue;
        }
        grounded.push(raw);
    }

    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    Ok(ParsedCases {
        test_cases: assign_ids(grounded),
        warnings,
    })
}

fn check_shape(raw: &RawTestCase) -> std::result::Result<(), String> {
    if raw.title.trim().is_empty() {
        return Err("empty title".to_string());
    }
    if raw.expected_result.trim().is_empty() {
        return Err("empty expected_result".to_string());
    }
    if raw.steps.is_empty() {
        return Err("no steps".to_string());
    }
    if raw.steps.iter().any(|s| s.action.trim().is_empty()) {
        return Err("step with empty action".to_string());
    }
    Ok(())
}

fn drop_warning(position: usize, reason: &str) -> String {
    format!("dropped test case #{}: {reason}", position + 1)
}

/// Keep emitted ids when they are all present and distinct; otherwise
/// renumber every case `TC-001`, `TC-002`, ... in emission order.
fn assign_ids(raw_cases: Vec<RawTestCase>) -> Vec<TestCase> {
    let mut seen = HashSet::new();
    let keep_ids = raw_cases.iter().all(|c| match c.test_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => seen.insert(id.to_string()),
        _ => false,
    });

    raw_cases
        .into_iter()
        .enumerate()
        .map(|(i, raw)| TestCase {
            test_id: match (&raw.test_id, keep_ids) {
                (Some(id), true) => id.trim().to_string(),
                _ => format!("TC-{:03}", i + 1),
            },
            title: raw.title,
            category: raw.category,
            preconditions: raw.preconditions,
            steps: raw.steps,
            expected_result: raw.expected_result,
            source_documents: raw.source_documents.into_iter().collect(),
        })
        .collect()
}

pub struct GroundedGenerator {
    completer: Arc<dyn CompletionService>,
    timeout: Duration,
    max_context_chars: usize,
}

impl GroundedGenerator {
    pub fn new(
        completer: Arc<dyn CompletionService>,
        timeout: Duration,
        max_context_chars: usize,
    ) -> Self {
        Self {
            completer,
            timeout,
            max_context_chars,
        }
    }

    /// Generate test cases for `user_query` from already-retrieved evidence.
    ///
    /// Fails with [`QaError::InsufficientContext`] before any model call when
    /// `results` is empty.
    pub async fn generate(
        &self,
        user_query: &str,
        results: &[RetrievalResult],
    ) -> Result<GenerationOutcome> {
        if results.is_empty() {
            return Err(QaError::InsufficientContext(
                "the knowledge base returned no documentation for this request; ingest documents first"
                    .to_string(),
            ));
        }

        let context = assemble_context(results, self.max_context_chars);
        let mut warnings = Vec::new();
        if context.chunks_omitted > 0 {
            warnings.push(format!(
                "{} retrieved chunks did not fit the context budget and were not sent",
                context.chunks_omitted
            ));
        }

        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(user_query, &context),
            json_response: true,
        };
        tracing::info!(
            model = self.completer.model_name(),
            chunks = context.chunks_sent,
            "requesting test cases"
        );
        let response = with_deadline(
            "completion service",
            self.timeout,
            self.completer.complete(&request),
        )
        .await?;

        let parsed = parse_test_cases(&response, &context.sources)?;
        warnings.extend(parsed.warnings);

        Ok(GenerationOutcome {
            success: !parsed.test_cases.is_empty(),
            test_cases: parsed.test_cases,
            sources_used: context.sources,
            warnings,
        })
    }
}
