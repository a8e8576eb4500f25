//! The explicit session context.
//!
//! A [`Session`] owns one index namespace plus the collaborators that act
//! on it, and holds the test cases produced by the latest generation. Every
//! user-facing operation (ingest, query, generate, script, stats, rebuild)
//! goes through it; nothing lives in globals.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::chunk::{normalize, Chunker};
use crate::completion::CompletionService;
use crate::embedding::EmbeddingService;
use crate::error::{QaError, Result};
use crate::generate::{GroundedGenerator, DEFAULT_MAX_CONTEXT_CHARS};
use crate::index::{Indexer, DEFAULT_BATCH_SIZE};
use crate::models::{
    Document, DocumentFormat, GenerationOutcome, IngestOutcome, KbStats, RetrievalResult,
    ScriptArtifact, TestCase,
};
use crate::parse::DocumentParser;
use crate::retrieve::{validate_k, Retriever, DEFAULT_K};
use crate::script::{
    inline_target_id, ScriptSynthesizer, DEFAULT_MAX_HTML_CHARS, DEFAULT_TARGET_PATH,
};
use crate::store::Store;

/// Chunks of documentation retrieved to support script synthesis.
const SCRIPT_CONTEXT_K: usize = 3;

/// Tunables for a session, normally filled from the app config.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub chunker: Chunker,
    pub default_k: usize,
    pub embed_batch_size: usize,
    pub embed_timeout: Duration,
    pub generation_timeout: Duration,
    pub max_context_chars: usize,
    pub max_html_chars: usize,
    pub target_path: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            chunker: Chunker::default(),
            default_k: DEFAULT_K,
            embed_batch_size: DEFAULT_BATCH_SIZE,
            embed_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(120),
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            max_html_chars: DEFAULT_MAX_HTML_CHARS,
            target_path: DEFAULT_TARGET_PATH.to_string(),
        }
    }
}

pub struct Session {
    store: Arc<dyn Store>,
    parser: Arc<dyn DocumentParser>,
    chunker: Chunker,
    default_k: usize,
    indexer: Indexer,
    retriever: Retriever,
    generator: GroundedGenerator,
    synthesizer: ScriptSynthesizer,
    test_cases: RwLock<Vec<TestCase>>,
}

impl Session {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingService>,
        completer: Arc<dyn CompletionService>,
        parser: Arc<dyn DocumentParser>,
        settings: SessionSettings,
    ) -> Result<Self> {
        let default_k = validate_k(settings.default_k)?;
        Ok(Self {
            indexer: Indexer::new(
                store.clone(),
                embedder.clone(),
                settings.embed_batch_size,
                settings.embed_timeout,
            ),
            retriever: Retriever::new(store.clone(), embedder, settings.embed_timeout),
            generator: GroundedGenerator::new(
                completer.clone(),
                settings.generation_timeout,
                settings.max_context_chars,
            ),
            synthesizer: ScriptSynthesizer::new(
                completer,
                settings.generation_timeout,
                settings.max_html_chars,
                settings.target_path,
            ),
            store,
            parser,
            chunker: settings.chunker,
            default_k,
            test_cases: RwLock::new(Vec::new()),
        })
    }

    pub fn namespace(&self) -> &str {
        self.store.namespace()
    }

    /// Parse, chunk, store and embed one uploaded file.
    ///
    /// Re-ingesting a file with the same name replaces its previous version;
    /// unchanged chunks keep their vectors.
    pub async fn ingest(&self, file_content: &[u8], filename: &str) -> Result<IngestOutcome> {
        let mut parsed = self.parser.parse(file_content, filename, None)?;
        parsed.content = normalize(&parsed.content);
        let document = Document::from_parsed(parsed);
        let chunks = self.chunker.split(&document)?;

        self.store.upsert_document(&document).await?;
        self.store.replace_chunks(&document.id, &chunks).await?;
        let report = self.indexer.index(&chunks).await.into_result()?;
        let warnings = report.warnings();

        tracing::info!(
            source = %document.source_name,
            document_id = %document.id,
            chunks = chunks.len(),
            indexed = report.indexed.len(),
            failed = report.failures.len(),
            "document ingested"
        );

        Ok(IngestOutcome {
            document_id: document.id,
            source_name: document.source_name,
            format: document.format,
            chunks_created: chunks.len(),
            indexed: report.indexed,
            warnings,
        })
    }

    /// Top-`k` chunks for `text`; `None` uses the configured default.
    pub async fn query(&self, text: &str, k: Option<usize>) -> Result<Vec<RetrievalResult>> {
        self.retriever.query(text, k.unwrap_or(self.default_k)).await
    }

    /// Retrieve evidence and generate grounded test cases.
    ///
    /// On success the generated cases become the session's current set.
    pub async fn generate_test_cases(
        &self,
        user_query: &str,
        n_context_chunks: Option<usize>,
    ) -> Result<GenerationOutcome> {
        let results = self.query(user_query, n_context_chunks).await?;
        let outcome = self.generator.generate(user_query, &results).await?;
        if outcome.success {
            self.load_test_cases(outcome.test_cases.clone());
        }
        Ok(outcome)
    }

    /// Generate a script for `test_case` against explicit page HTML.
    pub async fn generate_script(
        &self,
        test_case: &TestCase,
        target_html: &str,
    ) -> Result<ScriptArtifact> {
        if target_html.trim().is_empty() {
            return Err(QaError::MissingTarget(
                "a target HTML page is required to generate a script".to_string(),
            ));
        }

        let target_source = match self.target_page().await? {
            Some(page) if page.raw_content == target_html => page.id,
            _ => inline_target_id(target_html),
        };

        let focus = format!(
            "{} {}",
            test_case.title,
            test_case
                .steps
                .iter()
                .map(|s| s.action.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        );
        let documentation = match self.retriever.query(&focus, SCRIPT_CONTEXT_K).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "continuing script synthesis without documentation context"
                );
                Vec::new()
            }
        };

        self.synthesizer
            .synthesize(test_case, target_html, &target_source, &documentation)
            .await
    }

    /// Generate a script for a case of the current set, targeting
    /// `target_html` or, when absent, the most recently ingested HTML page.
    pub async fn generate_script_for(
        &self,
        test_id: &str,
        target_html: Option<&str>,
    ) -> Result<ScriptArtifact> {
        let test_case = self
            .find_test_case(test_id)
            .ok_or_else(|| QaError::InvalidRequest(format!("unknown test case id '{test_id}'")))?;
        let html = match target_html {
            Some(html) => html.to_string(),
            None => self
                .target_page()
                .await?
                .map(|page| page.raw_content)
                .ok_or_else(|| {
                    QaError::MissingTarget(
                        "no HTML page has been ingested and none was supplied".to_string(),
                    )
                })?,
        };
        self.generate_script(&test_case, &html).await
    }

    pub async fn get_stats(&self) -> Result<KbStats> {
        self.indexer.stats().await
    }

    /// Discard the namespace and the current test cases.
    pub async fn rebuild(&self) -> Result<()> {
        self.indexer.rebuild().await?;
        self.load_test_cases(Vec::new());
        Ok(())
    }

    /// The most recently ingested HTML document.
    pub async fn target_page(&self) -> Result<Option<Document>> {
        self.store.latest_document(DocumentFormat::Html).await
    }

    pub fn test_cases(&self) -> Vec<TestCase> {
        self.test_cases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn find_test_case(&self, test_id: &str) -> Option<TestCase> {
        self.test_cases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|c| c.test_id == test_id)
            .cloned()
    }

    /// Replace the current set, e.g. with cases saved by an earlier run.
    pub fn load_test_cases(&self, cases: Vec<TestCase>) {
        *self
            .test_cases
            .write()
            .unwrap_or_else(PoisonError::into_inner) = cases;
    }
}
