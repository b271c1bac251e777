use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::types::GenerateRequest;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("model provider is not configured: {0}")]
    Configuration(String),
    #[error("model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model provider error: {0}")]
    Upstream(String),
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name used in logs (e.g. "gemini").
    fn name(&self) -> &str;

    /// One content-generation call. Returns the raw response body; shape
    /// normalization happens in the caller.
    async fn generate_content(&self, request: &GenerateRequest) -> Result<Value, ProviderError>;
}
