//! Core data models used throughout QA Harness.
//!
//! These types represent the documents, chunks, retrieval results, test
//! cases and scripts that flow through the grounding pipeline.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Source format of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Markdown,
    Text,
    Json,
    Pdf,
    Html,
    Docx,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Text => "text",
            DocumentFormat::Json => "json",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Html => "html",
            DocumentFormat::Docx => "docx",
        }
    }

    /// Resolve a format from a file extension (with or without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "md" | "markdown" => Some(DocumentFormat::Markdown),
            "txt" => Some(DocumentFormat::Text),
            "json" => Some(DocumentFormat::Json),
            "pdf" => Some(DocumentFormat::Pdf),
            "html" | "htm" => Some(DocumentFormat::Html),
            "docx" => Some(DocumentFormat::Docx),
            _ => None,
        }
    }

    /// Parse the stored name produced by [`as_str`](Self::as_str).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "markdown" => Some(DocumentFormat::Markdown),
            "text" => Some(DocumentFormat::Text),
            "json" => Some(DocumentFormat::Json),
            "pdf" => Some(DocumentFormat::Pdf),
            "html" => Some(DocumentFormat::Html),
            "docx" => Some(DocumentFormat::Docx),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the document parsing collaborator.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    /// File name the document was uploaded as.
    pub source_name: String,
    pub format: DocumentFormat,
    /// Text that gets chunked and embedded.
    pub content: String,
    /// The uploaded text as-is (raw HTML for pages, extracted text for binaries).
    pub raw_content: String,
}

/// A document owned by the knowledge base. Immutable after ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub source_name: String,
    pub format: DocumentFormat,
    pub content: String,
    pub raw_content: String,
    pub ingested_at: DateTime<Utc>,
    pub content_hash: String,
}

impl Document {
    pub fn from_parsed(parsed: ParsedDocument) -> Self {
        Self {
            id: document_id_for(&parsed.source_name),
            content_hash: sha256_hex(&parsed.content),
            source_name: parsed.source_name,
            format: parsed.format,
            content: parsed.content,
            raw_content: parsed.raw_content,
            ingested_at: Utc::now(),
        }
    }
}

/// Deterministic document id for a source name, so re-uploading the same
/// file replaces its previous version.
pub fn document_id_for(source_name: &str) -> String {
    format!("doc-{}", &sha256_hex(source_name)[..16])
}

/// Hex-encoded SHA-256 of a string.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A bounded contiguous slice of a document's normalized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `{document_id}#{sequence_index:04}`.
    pub chunk_id: String,
    pub document_id: String,
    pub source_name: String,
    pub text: String,
    /// Character offset (inclusive) into the normalized document text.
    pub start_offset: usize,
    /// Character offset (exclusive) into the normalized document text.
    pub end_offset: usize,
    pub sequence_index: usize,
    /// SHA-256 of `text`, used to skip re-embedding unchanged chunks.
    pub hash: String,
}

/// Metadata stored next to each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub source_name: String,
    pub document_id: String,
}

/// One vector in the similarity index, one-to-one with a [`Chunk`].
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub content_hash: String,
    pub metadata: VectorMetadata,
}

/// A chunk returned for a query, with its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub similarity_score: f32,
}

impl RetrievalResult {
    pub fn source_name(&self) -> &str {
        &self.chunk.source_name
    }
}

/// Whether a test case exercises the happy path or an error path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Positive,
    Negative,
}

/// A single step of a test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestStep {
    pub action: String,
    #[serde(default)]
    pub data: String,
}

/// A documentation-grounded test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub test_id: String,
    pub title: String,
    pub category: Category,
    #[serde(default)]
    pub preconditions: String,
    pub steps: Vec<TestStep>,
    pub expected_result: String,
    pub source_documents: BTreeSet<String>,
}

/// A generated browser-automation script for one test case.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptArtifact {
    pub test_id: String,
    pub script_text: String,
    /// Id of the HTML document the script targets.
    pub target_source: String,
    pub description: Option<String>,
    /// Element identifiers (`id:` / `name:` prefixed) the script uses.
    pub element_refs: Vec<String>,
}

/// Knowledge-base counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KbStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub embedded_count: usize,
    pub has_target_page: bool,
}

/// Result of ingesting one file.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub document_id: String,
    pub source_name: String,
    pub format: DocumentFormat,
    pub chunks_created: usize,
    /// Chunk ids whose vectors are now in the index.
    pub indexed: Vec<String>,
    /// Per-chunk failures reported alongside the partial success.
    pub warnings: Vec<String>,
}

/// Result of a grounded generation call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    /// True when at least one test case survived validation.
    pub success: bool,
    pub test_cases: Vec<TestCase>,
    /// Source names of the chunks that were sent to the model.
    pub sources_used: BTreeSet<String>,
    pub warnings: Vec<String>,
}
