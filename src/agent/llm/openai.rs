//! OpenAI chat completions, and every endpoint that speaks the same protocol.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatMessage, LanguageModel, LlmError, Role};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct OpenAiCompatibleModel {
    api_key: String,
    api_url: String,
    model: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl OpenAiCompatibleModel {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            model: model.into(),
            temperature: None,
            client: reqwest::Client::new(),
        }
    }

    /// A base URL (`http://host/v1`) or the full completions URL.
    pub fn with_url(mut self, url: &str) -> Self {
        let url = url.trim_end_matches('/');
        self.api_url = if url.ends_with("/chat/completions") {
            url.to_string()
        } else {
            format!("{}/chat/completions", url)
        };
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request = ApiRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| ApiMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
            temperature: self.temperature,
        };

        debug!(url = %self.api_url, model = %self.model, messages = messages.len(), "Chat completion");
        let mut builder = self.client.post(&self.api_url).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response = builder.send().await.map_err(|e| LlmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_urls_get_the_completions_path() {
        let m = OpenAiCompatibleModel::new("k", "m").with_url("http://localhost:8080/v1/");
        assert_eq!(m.api_url(), "http://localhost:8080/v1/chat/completions");

        let m = OpenAiCompatibleModel::new("k", "m").with_url("http://x/v1/chat/completions");
        assert_eq!(m.api_url(), "http://x/v1/chat/completions");
    }
}
