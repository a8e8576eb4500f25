//! JSON HTTP server over one [`Session`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/stats` | Knowledge-base counters |
//! | `POST` | `/ingest` | Upload one document |
//! | `POST` | `/query` | Top-k retrieval |
//! | `POST` | `/test-cases` | Generate grounded test cases |
//! | `GET`  | `/test-cases` | The current test-case set |
//! | `POST` | `/scripts` | Generate a Selenium script for one case |
//! | `POST` | `/rebuild` | Clear the namespace |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "insufficient_context", "message": "..." } }
//! ```
//!
//! Codes come from [`QaError::code`]. Caller faults map to 4xx, failures of
//! the model services to 502/504 and index failures to 500.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use qa_harness_core::models::{
    GenerationOutcome, IngestOutcome, KbStats, RetrievalResult, ScriptArtifact, TestCase,
};
use qa_harness_core::{QaError, Session};

use crate::config::Config;
use crate::session::open_session;

#[derive(Clone)]
struct AppState {
    session: Arc<Session>,
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let session = Arc::new(open_session(config).await?);
    let app = router(session);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("QA Harness listening on http://{}", config.server.bind);
    tracing::info!(
        bind = %config.server.bind,
        namespace = %config.index.namespace,
        "server started"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(session: Arc<Session>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/ingest", post(handle_ingest))
        .route("/query", post(handle_query))
        .route("/test-cases", post(handle_generate).get(handle_list_cases))
        .route("/scripts", post(handle_script))
        .route("/rebuild", post(handle_rebuild))
        .layer(cors)
        .with_state(AppState { session })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<QaError> for AppError {
    fn from(err: QaError) -> Self {
        let status = match &err {
            QaError::EmptyDocument { .. }
            | QaError::UnsupportedFormat { .. }
            | QaError::Parse { .. }
            | QaError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            QaError::InsufficientContext(_) | QaError::MissingTarget(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            QaError::EmbeddingModelMismatch { .. } => StatusCode::CONFLICT,
            QaError::ServiceTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            QaError::EmbeddingService(_)
            | QaError::GenerationService(_)
            | QaError::SchemaValidation { .. } => StatusCode::BAD_GATEWAY,
            QaError::IndexWrite(_) | QaError::IndexRead(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::from(QaError::InvalidRequest(message.into()))
}

// ============ GET /health, GET /stats ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct StatsResponse {
    namespace: String,
    #[serde(flatten)]
    stats: KbStats,
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let stats = state.session.get_stats().await?;
    Ok(Json(StatsResponse {
        namespace: state.session.namespace().to_string(),
        stats,
    }))
}

// ============ POST /ingest ============

/// Text formats travel in `content`; binary uploads (PDF, DOCX) in
/// `content_base64`.
#[derive(Deserialize)]
struct IngestRequest {
    filename: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    content_base64: Option<String>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestOutcome>, AppError> {
    let bytes = match (req.content, req.content_base64) {
        (Some(text), None) => text.into_bytes(),
        (None, Some(encoded)) => base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| bad_request(format!("content_base64 is not valid base64: {e}")))?,
        _ => {
            return Err(bad_request(
                "exactly one of content or content_base64 is required",
            ))
        }
    };

    let outcome = state.session.ingest(&bytes, &req.filename).await?;
    Ok(Json(outcome))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    results: Vec<RetrievalResult>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let results = state.session.query(&req.query, req.k).await?;
    Ok(Json(QueryResponse { results }))
}

// ============ /test-cases ============

#[derive(Deserialize)]
struct GenerateRequest {
    query: String,
    #[serde(default)]
    n_context_chunks: Option<usize>,
}

async fn handle_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerationOutcome>, AppError> {
    let outcome = state
        .session
        .generate_test_cases(&req.query, req.n_context_chunks)
        .await?;
    Ok(Json(outcome))
}

#[derive(Serialize)]
struct CasesResponse {
    test_cases: Vec<TestCase>,
}

async fn handle_list_cases(State(state): State<AppState>) -> Json<CasesResponse> {
    Json(CasesResponse {
        test_cases: state.session.test_cases(),
    })
}

// ============ POST /scripts ============

/// Either `test_id` (a case of the current set) or a full `test_case`.
/// Without `target_html` the latest ingested HTML page is used.
#[derive(Deserialize)]
struct ScriptRequest {
    #[serde(default)]
    test_id: Option<String>,
    #[serde(default)]
    test_case: Option<TestCase>,
    #[serde(default)]
    target_html: Option<String>,
}

async fn handle_script(
    State(state): State<AppState>,
    Json(req): Json<ScriptRequest>,
) -> Result<Json<ScriptArtifact>, AppError> {
    let session = &state.session;
    let artifact = match (req.test_case, req.test_id) {
        (Some(case), None) => {
            let html = match req.target_html {
                Some(html) => html,
                None => session
                    .target_page()
                    .await?
                    .map(|page| page.raw_content)
                    .unwrap_or_default(),
            };
            session.generate_script(&case, &html).await?
        }
        (None, Some(id)) => {
            session
                .generate_script_for(&id, req.target_html.as_deref())
                .await?
        }
        _ => return Err(bad_request("exactly one of test_id or test_case is required")),
    };
    Ok(Json(artifact))
}

// ============ POST /rebuild ============

#[derive(Serialize)]
struct RebuildResponse {
    status: String,
    namespace: String,
}

async fn handle_rebuild(State(state): State<AppState>) -> Result<Json<RebuildResponse>, AppError> {
    state.session.rebuild().await?;
    Ok(Json(RebuildResponse {
        status: "ok".to_string(),
        namespace: state.session.namespace().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_harness_core::embedding::HashingEmbedder;
    use qa_harness_core::parse::TextParser;
    use qa_harness_core::store::memory::InMemoryStore;
    use qa_harness_core::SessionSettings;

    use crate::completion::DisabledCompleter;

    fn state() -> AppState {
        let session = Session::new(
            Arc::new(InMemoryStore::default()),
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(DisabledCompleter),
            Arc::new(TextParser),
            SessionSettings::default(),
        )
        .unwrap();
        AppState {
            session: Arc::new(session),
        }
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (QaError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (QaError::InsufficientContext("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (QaError::MissingTarget("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (QaError::GenerationService("x".into()), StatusCode::BAD_GATEWAY),
            (
                QaError::ServiceTimeout { service: "s".into(), secs: 1 },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (QaError::IndexRead("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            let code = err.code();
            let app = AppError::from(err);
            assert_eq!(app.status, status);
            assert_eq!(app.code, code);
        }
    }

    #[tokio::test]
    async fn test_ingest_query_and_stats() {
        let state = state();
        let req = IngestRequest {
            filename: "spec.md".to_string(),
            content: Some("Discount code SAVE15 gives 15% off.".to_string()),
            content_base64: None,
        };
        let Json(outcome) = handle_ingest(State(state.clone()), Json(req)).await.unwrap();
        assert_eq!(outcome.chunks_created, 1);

        let req = QueryRequest {
            query: "discount".to_string(),
            k: Some(1),
        };
        let Json(resp) = handle_query(State(state.clone()), Json(req)).await.unwrap();
        assert_eq!(resp.results.len(), 1);

        let Json(stats) = handle_stats(State(state)).await.unwrap();
        assert_eq!(stats.namespace, "qa_agent_docs");
        assert_eq!(stats.stats.document_count, 1);
    }

    #[tokio::test]
    async fn test_ingest_base64_and_ambiguous_body() {
        let state = state();
        let req = IngestRequest {
            filename: "notes.txt".to_string(),
            content: None,
            content_base64: Some(base64::engine::general_purpose::STANDARD.encode("plain notes")),
        };
        assert!(handle_ingest(State(state.clone()), Json(req)).await.is_ok());

        let req = IngestRequest {
            filename: "notes.txt".to_string(),
            content: None,
            content_base64: None,
        };
        let err = handle_ingest(State(state), Json(req)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generate_on_empty_kb_is_unprocessable() {
        let req = GenerateRequest {
            query: "discount tests".to_string(),
            n_context_chunks: None,
        };
        let err = handle_generate(State(state()), Json(req)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, "insufficient_context");
    }

    #[tokio::test]
    async fn test_script_without_page_is_missing_target() {
        let state = state();
        let case: TestCase = serde_json::from_value(serde_json::json!({
            "test_id": "TC-001", "title": "t", "category": "positive",
            "steps": [{"action": "a"}], "expected_result": "e",
            "source_documents": ["spec.md"]
        }))
        .unwrap();
        let req = ScriptRequest {
            test_id: None,
            test_case: Some(case),
            target_html: None,
        };
        let err = handle_script(State(state.clone()), Json(req)).await.unwrap_err();
        assert_eq!(err.code, "missing_target");

        let req = ScriptRequest {
            test_id: Some("TC-001".to_string()),
            test_case: None,
            target_html: Some("<html></html>".to_string()),
        };
        let err = handle_script(State(state), Json(req)).await.unwrap_err();
        assert_eq!(err.code, "bad_request");
    }
}
