//! Error taxonomy shared by every pipeline component.
//!
//! Variants fall into four families:
//!
//! | Family | Variants | Recovery |
//! |--------|----------|----------|
//! | Input data | `EmptyDocument`, `UnsupportedFormat`, `Parse` | caller re-uploads |
//! | External dependency | `EmbeddingService`, `GenerationService`, `ServiceTimeout`, `IndexWrite`, `IndexRead` | retry the whole operation |
//! | Precondition | `InsufficientContext`, `MissingTarget`, `InvalidRequest`, `EmbeddingModelMismatch` | caller supplies more or different input |
//! | Model output | `SchemaValidation` | re-invoke; partial results are salvaged where possible |

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum QaError {
    #[error("document '{source_name}' is empty after normalization")]
    EmptyDocument { source_name: String },

    #[error("unsupported format for '{filename}': '{extension}' (supported: md, txt, json, pdf, html, htm, docx)")]
    UnsupportedFormat { filename: String, extension: String },

    #[error("failed to parse '{filename}': {reason}")]
    Parse { filename: String, reason: String },

    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    #[error("generation service error: {0}")]
    GenerationService(String),

    #[error("{service} timed out after {secs}s")]
    ServiceTimeout { service: String, secs: u64 },

    #[error("index write failed: {0}")]
    IndexWrite(String),

    #[error("index read failed: {0}")]
    IndexRead(String),

    #[error("insufficient context: {0}")]
    InsufficientContext(String),

    #[error("missing target page: {0}")]
    MissingTarget(String),

    #[error("schema validation failed for {field}: {reason}")]
    SchemaValidation { field: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("embedding model mismatch: index was built with '{indexed}' but queries use '{query}'; rebuild the index")]
    EmbeddingModelMismatch { indexed: String, query: String },
}

impl QaError {
    /// Machine-readable code used by the HTTP surface and CLI reports.
    pub fn code(&self) -> &'static str {
        match self {
            QaError::EmptyDocument { .. } => "empty_document",
            QaError::UnsupportedFormat { .. } => "unsupported_format",
            QaError::Parse { .. } => "parse_error",
            QaError::EmbeddingService(_) => "embedding_service_error",
            QaError::GenerationService(_) => "generation_service_error",
            QaError::ServiceTimeout { .. } => "timeout",
            QaError::IndexWrite(_) => "index_write_error",
            QaError::IndexRead(_) => "index_read_error",
            QaError::InsufficientContext(_) => "insufficient_context",
            QaError::MissingTarget(_) => "missing_target",
            QaError::SchemaValidation { .. } => "schema_validation",
            QaError::InvalidRequest(_) => "bad_request",
            QaError::EmbeddingModelMismatch { .. } => "embedding_model_mismatch",
        }
    }

    /// True for faults in the caller's input or missing preconditions.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            QaError::EmptyDocument { .. }
                | QaError::UnsupportedFormat { .. }
                | QaError::Parse { .. }
                | QaError::InsufficientContext(_)
                | QaError::MissingTarget(_)
                | QaError::InvalidRequest(_)
                | QaError::EmbeddingModelMismatch { .. }
        )
    }

    pub(crate) fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        QaError::SchemaValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, QaError>;

/// Await an external call, failing with [`QaError::ServiceTimeout`] once
/// `limit` elapses. The abandoned future is dropped, so a late response is
/// never applied.
pub async fn with_deadline<T, F>(service: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(service, secs = limit.as_secs(), "external call timed out");
            Err(QaError::ServiceTimeout {
                service: service.to_string(),
                secs: limit.as_secs(),
            })
        }
    }
}
