//! Completion service implementations.
//!
//! - **[`DisabledCompleter`]** fails every call; generation and script
//!   synthesis then surface a `generation_service_error`.
//! - **[`OpenAICompleter`]** calls `POST {url}/chat/completions` on any
//!   OpenAI-compatible API, requesting a JSON object response.
//!
//! Chat calls are not retried: one attempt, bounded by the session's
//! generation timeout.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use qa_harness_core::completion::{CompletionRequest, CompletionService};
use qa_harness_core::QaError;

use crate::config::GenerationConfig;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

pub struct DisabledCompleter;

#[async_trait]
impl CompletionService for DisabledCompleter {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &CompletionRequest) -> qa_harness_core::Result<String> {
        Err(QaError::GenerationService(
            "generation provider is disabled; set [generation] provider in the config".to_string(),
        ))
    }
}

/// Chat completion client. Requires `OPENAI_API_KEY`.
pub struct OpenAICompleter {
    model: String,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAICompleter {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key,
            client,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
        });
        if request.json_response {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }

    async fn send(&self, request: &CompletionRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

#[async_trait]
impl CompletionService for OpenAICompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> qa_harness_core::Result<String> {
        tracing::debug!(
            model = %self.model,
            prompt_chars = request.prompt.len(),
            "chat completion"
        );
        self.send(request)
            .await
            .map_err(|e| QaError::GenerationService(format!("{e:#}")))
    }
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    let choice = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices"))?;

    if choice.get("finish_reason").and_then(|r| r.as_str()) == Some("length") {
        tracing::warn!("chat completion truncated by the token limit");
    }

    choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing message content"))
}

/// Create the completion service named by `config.provider`.
pub fn create_completer(config: &GenerationConfig) -> Result<Arc<dyn CompletionService>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompleter)),
        "openai" => Ok(Arc::new(OpenAICompleter::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
