use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::provider::{LlmProvider, ProviderError};
use super::types::GenerateRequest;
use crate::core::config::ModelSettings;

/// Gemini `generateContent` over REST.
#[derive(Clone)]
pub struct GeminiProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl GeminiProvider {
    pub fn new(settings: &ModelSettings, client: Client) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
            client,
        }
    }

    fn request_body(request: &GenerateRequest) -> Value {
        let mut body = json!({
            "contents": request.contents,
            "toolConfig": {
                "functionCallingConfig": { "mode": request.mode }
            }
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(instruction) = &request.system_instruction {
                obj.insert(
                    "systemInstruction".to_string(),
                    json!({ "parts": [{ "text": instruction }] }),
                );
            }
            if !request.tools.is_empty() {
                obj.insert(
                    "tools".to_string(),
                    json!([{ "functionDeclarations": request.tools }]),
                );
            }
        }

        body
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate_content(&self, request: &GenerateRequest) -> Result<Value, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Configuration("GEMINI_API_KEY is not set".to_string()))?;

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let res = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&Self::request_body(request))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = res.json().await?;

        if let Some(error) = payload.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ProviderError::Upstream(message));
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{FunctionCallingMode, FunctionDeclaration, Turn};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: String) -> GeminiProvider {
        let settings = ModelSettings {
            base_url,
            model: "gemini-test".to_string(),
            api_key: Some("key-123".to_string()),
        };
        GeminiProvider::new(&settings, Client::new())
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            contents: vec![Turn::user("hello").into()],
            system_instruction: Some("be brief".to_string()),
            tools: vec![FunctionDeclaration {
                name: "search_documents".to_string(),
                description: "search".to_string(),
                parameters: json!({ "type": "object" }),
            }],
            mode: FunctionCallingMode::Auto,
        }
    }

    #[tokio::test]
    async fn sends_contents_tools_and_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:generateContent"))
            .and(header("x-goog-api-key", "key-123"))
            .and(body_partial_json(json!({
                "contents": [{ "role": "user", "parts": [{ "text": "hello" }] }],
                "systemInstruction": { "parts": [{ "text": "be brief" }] },
                "tools": [{ "functionDeclarations": [{ "name": "search_documents" }] }],
                "toolConfig": { "functionCallingConfig": { "mode": "AUTO" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "hi" })))
            .expect(1)
            .mount(&server)
            .await;

        let raw = provider(server.uri()).generate_content(&request()).await.unwrap();
        assert_eq!(raw["text"], "hi");
    }

    #[tokio::test]
    async fn error_body_and_status_are_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:generateContent"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:generateContent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "error": { "message": "model overloaded" } })),
            )
            .mount(&server)
            .await;

        let provider = provider(server.uri());
        assert!(matches!(
            provider.generate_content(&request()).await,
            Err(ProviderError::Status { status: 429, .. })
        ));
        match provider.generate_content(&request()).await {
            Err(ProviderError::Upstream(message)) => assert_eq!(message, "model overloaded"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_api_key_is_configuration_error() {
        let provider = GeminiProvider::new(&ModelSettings::default(), Client::new());
        assert!(matches!(
            provider.generate_content(&request()).await,
            Err(ProviderError::Configuration(_))
        ));
    }
}
