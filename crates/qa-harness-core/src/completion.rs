//! Generative completion collaborator.
//!
//! The grounded generator and the script synthesizer talk to the language
//! model only through [`CompletionService`]. The OpenAI chat client lives
//! in the app crate; tests plug in deterministic stubs.

use async_trait::async_trait;

use crate::error::Result;

/// One prompt sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Instruction framing the model's role.
    pub system: String,
    pub prompt: String,
    /// Ask the provider to constrain output to a JSON object.
    pub json_response: bool,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    fn model_name(&self) -> &str;

    /// Return the raw model text for `request`.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
