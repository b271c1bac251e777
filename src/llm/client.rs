use std::sync::Arc;

use super::normalize;
use super::provider::{LlmProvider, ProviderError};
use super::types::{GenerateRequest, Generation};

/// Wraps a provider and normalizes whatever shape it answers with.
#[derive(Clone)]
pub struct GenerativeModelClient {
    provider: Arc<dyn LlmProvider>,
}

impl GenerativeModelClient {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ProviderError> {
        let raw = self.provider.generate_content(request).await?;

        Ok(Generation {
            text: normalize::extract_text(&raw),
            function_call: normalize::extract_function_call(&raw),
            candidate: normalize::extract_candidate_content(&raw),
        })
    }
}
