//! End-to-end pipeline tests against the in-memory store, the hashing
//! embedder and a scripted completion service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use qa_harness_core::completion::{CompletionRequest, CompletionService};
use qa_harness_core::embedding::{EmbeddingService, HashingEmbedder};
use qa_harness_core::models::{Category, TestCase, TestStep};
use qa_harness_core::parse::TextParser;
use qa_harness_core::store::memory::InMemoryStore;
use qa_harness_core::{QaError, Session, SessionSettings};

/// Replays canned responses in order and counts calls.
struct ScriptedCompleter {
    responses: Mutex<Vec<String>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompleter {
    fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for ScriptedCompleter {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> qa_harness_core::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(QaError::GenerationService("no scripted response left".into()));
        }
        Ok(responses.remove(0))
    }
}

/// Hashing embedder whose second batch always fails.
struct FlakyEmbedder {
    inner: HashingEmbedder,
    batches: AtomicUsize,
}

#[async_trait]
impl EmbeddingService for FlakyEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed_batch(&self, texts: &[String]) -> qa_harness_core::Result<Vec<Vec<f32>>> {
        if self.batches.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(QaError::EmbeddingService("429 rate limited".into()));
        }
        self.inner.embed_batch(texts).await
    }
}

fn session(completer: Arc<ScriptedCompleter>) -> Session {
    Session::new(
        Arc::new(InMemoryStore::default()),
        Arc::new(HashingEmbedder::new(256)),
        completer,
        Arc::new(TextParser),
        SessionSettings::default(),
    )
    .unwrap()
}

const SPEC: &str = "# Checkout\n\nDiscount code rules: SAVE15 = 15% off the order total. \
Invalid codes show the error 'Invalid discount code'.";
const SHIPPING: &str = "# Shipping\n\nExpress shipping costs $10 and arrives next day. \
Standard shipping is free.";
const PAGE: &str = r#"<html><head><title>Checkout</title></head><body>
<form id="checkout-form">
  <input id="discount-code" name="discount">
  <button id="apply-discount">Apply</button>
  <span id="discount-message"></span>
</form></body></html>"#;

fn case_json(id: &str, sources: &[&str]) -> serde_json::Value {
    json!({
        "test_id": id,
        "title": "Apply SAVE15",
        "category": "positive",
        "preconditions": "Cart has items",
        "steps": [{"action": "Enter code", "data": "SAVE15"}, {"action": "Click apply"}],
        "expected_result": "15% discount applied",
        "source_documents": sources,
    })
}

fn sample_case() -> TestCase {
    TestCase {
        test_id: "TC-001".into(),
        title: "Apply SAVE15".into(),
        category: Category::Positive,
        preconditions: String::new(),
        steps: vec![TestStep {
            action: "Enter code SAVE15 and click apply".into(),
            data: "SAVE15".into(),
        }],
        expected_result: "Discount message shown".into(),
        source_documents: ["spec.md".to_string()].into_iter().collect(),
    }
}

const SCRIPT: &str = r#"import os
from selenium import webdriver
from selenium.webdriver.common.by import By
from selenium.webdriver.support.ui import WebDriverWait
from selenium.webdriver.support import expected_conditions as EC

driver = webdriver.Chrome()
try:
    driver.get("file://" + os.path.abspath("./sample_project/checkout.html"))
    driver.find_element(By.ID, "discount-code").send_keys("SAVE15")
    driver.find_element(By.ID, "apply-discount").click()
    msg = WebDriverWait(driver, 10).until(EC.visibility_of_element_located((By.ID, "discount-message")))
    assert "15%" in msg.text
finally:
    driver.quit()
"#;

#[tokio::test]
async fn scenario_a_top_result_contains_discount_rule() {
    let session = session(ScriptedCompleter::new(vec![]));
    session.ingest(SHIPPING.as_bytes(), "shipping.md").await.unwrap();
    let outcome = session.ingest(SPEC.as_bytes(), "spec.md").await.unwrap();
    assert_eq!(outcome.chunks_created, 1);
    assert_eq!(outcome.indexed.len(), 1);

    let results = session.query("discount code rules", Some(1)).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].chunk.text.contains("SAVE15"));
    assert_eq!(results[0].source_name(), "spec.md");
}

#[tokio::test]
async fn scenario_b_empty_knowledge_base_makes_no_model_call() {
    let completer = ScriptedCompleter::new(vec![]);
    let session = session(completer.clone());
    let err = session
        .generate_test_cases("discount tests", None)
        .await
        .unwrap_err();
    assert!(matches!(err, QaError::InsufficientContext(_)));
    assert_eq!(completer.calls(), 0);
}

#[tokio::test]
async fn scenario_c_blank_target_makes_no_model_call() {
    let completer = ScriptedCompleter::new(vec![]);
    let session = session(completer.clone());
    let err = session.generate_script(&sample_case(), "").await.unwrap_err();
    assert!(matches!(err, QaError::MissingTarget(_)));
    assert_eq!(completer.calls(), 0);

    let err = session.generate_script_for("TC-404", None).await.unwrap_err();
    assert!(matches!(err, QaError::InvalidRequest(_)));
}

#[tokio::test]
async fn scenario_d_ungrounded_case_dropped_with_warning() {
    let response = json!({"test_cases": [
        case_json("TC-001", &["spec.md"]),
        case_json("TC-002", &["nonexistent.md"]),
        case_json("TC-003", &["spec.md"]),
    ]})
    .to_string();
    let completer = ScriptedCompleter::new(vec![response]);
    let session = session(completer.clone());
    session.ingest(SPEC.as_bytes(), "spec.md").await.unwrap();

    let outcome = session
        .generate_test_cases("discount code tests", Some(4))
        .await
        .unwrap();
    assert!(outcome.success);
    let ids: Vec<&str> = outcome.test_cases.iter().map(|c| c.test_id.as_str()).collect();
    assert_eq!(ids, vec!["TC-001", "TC-003"]);
    assert!(outcome.warnings.iter().any(|w| w.contains("nonexistent.md")));
    assert!(outcome.sources_used.contains("spec.md"));
    assert_eq!(completer.calls(), 1);

    for case in &outcome.test_cases {
        assert!(case.source_documents.is_subset(&outcome.sources_used));
    }
    assert_eq!(session.test_cases().len(), 2);
    assert!(completer.prompts.lock().unwrap()[0].contains("SAVE15 = 15% off"));
}

#[tokio::test]
async fn reingesting_same_file_is_idempotent() {
    let session = session(ScriptedCompleter::new(vec![]));
    let first = session.ingest(SPEC.as_bytes(), "spec.md").await.unwrap();
    let before = session.get_stats().await.unwrap();
    let second = session.ingest(SPEC.as_bytes(), "spec.md").await.unwrap();
    let after = session.get_stats().await.unwrap();

    assert_eq!(first.document_id, second.document_id);
    assert_eq!(before, after);
    assert_eq!(after.document_count, 1);
    assert_eq!(after.chunk_count, after.embedded_count);
}

#[tokio::test]
async fn partly_failed_ingest_reports_warnings() {
    let settings = SessionSettings {
        embed_batch_size: 1,
        ..SessionSettings::default()
    };
    let session = Session::new(
        Arc::new(InMemoryStore::default()),
        Arc::new(FlakyEmbedder {
            inner: HashingEmbedder::new(64),
            batches: AtomicUsize::new(0),
        }),
        ScriptedCompleter::new(vec![]),
        Arc::new(TextParser),
        settings,
    )
    .unwrap();

    let text = "Discount codes apply to the order total. ".repeat(80);
    let outcome = session.ingest(text.as_bytes(), "discounts.md").await.unwrap();
    assert!(outcome.chunks_created >= 3);
    assert_eq!(outcome.indexed.len(), outcome.chunks_created - 1);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("429 rate limited"));

    let stats = session.get_stats().await.unwrap();
    assert_eq!(stats.chunk_count, outcome.chunks_created);
    assert_eq!(stats.embedded_count, outcome.chunks_created - 1);
}

#[tokio::test]
async fn empty_upload_rejected() {
    let session = session(ScriptedCompleter::new(vec![]));
    let err = session.ingest(b"  \n\n ", "blank.md").await.unwrap_err();
    assert!(matches!(err, QaError::EmptyDocument { .. }));
    assert_eq!(session.get_stats().await.unwrap().document_count, 0);
}

#[tokio::test]
async fn script_for_stored_case_uses_ingested_page() {
    let script_response = json!({"script": SCRIPT, "description": "Applies SAVE15"}).to_string();
    let completer = ScriptedCompleter::new(vec![script_response]);
    let session = session(completer.clone());
    session.ingest(SPEC.as_bytes(), "spec.md").await.unwrap();
    let page = session.ingest(PAGE.as_bytes(), "checkout.html").await.unwrap();
    assert!(session.get_stats().await.unwrap().has_target_page);

    session.load_test_cases(vec![sample_case()]);
    let artifact = session.generate_script_for("TC-001", None).await.unwrap();
    assert_eq!(artifact.test_id, "TC-001");
    assert_eq!(artifact.target_source, page.document_id);
    assert_eq!(artifact.description.as_deref(), Some("Applies SAVE15"));
    assert!(artifact.element_refs.contains(&"id:apply-discount".to_string()));
    assert!(completer.prompts.lock().unwrap()[0].contains("id=\"discount-code\""));
}

#[tokio::test]
async fn script_with_invented_selector_rejected() {
    let bad = SCRIPT.replace("apply-discount", "coupon-submit");
    let completer = ScriptedCompleter::new(vec![json!({"script": bad}).to_string()]);
    let session = session(completer.clone());
    let err = session.generate_script(&sample_case(), PAGE).await.unwrap_err();
    assert!(matches!(err, QaError::SchemaValidation { .. }));
    assert_eq!(completer.calls(), 1);
}

#[tokio::test]
async fn rebuild_clears_index_and_cases() {
    let session = session(ScriptedCompleter::new(vec![]));
    session.ingest(SPEC.as_bytes(), "spec.md").await.unwrap();
    session.load_test_cases(vec![sample_case()]);
    session.rebuild().await.unwrap();
    assert_eq!(session.get_stats().await.unwrap().chunk_count, 0);
    assert!(session.test_cases().is_empty());
    assert!(session.query("discount", None).await.unwrap().is_empty());
}
