//! Anthropic Messages API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatMessage, LanguageModel, LlmError, Role};

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
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
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

pub struct AnthropicModel {
    api_key: String,
    api_url: String,
    model: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl AnthropicModel {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            model: model.into(),
            temperature: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        let url = url.trim_end_matches('/');
        self.api_url = if url.ends_with("/messages") {
            url.to_string()
        } else {
            format!("{}/messages", url)
        };
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// System messages move to the top-level `system` field.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<ApiMessage<'_>>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let rest = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| ApiMessage {
            role: m.role,
            content: &m.content,
        })
        .collect();
    let system = if system.is_empty() { None } else { Some(system.join("\n\n")) };
    (system, rest)
}

#[async_trait]
impl LanguageModel for AnthropicModel {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let (system, messages) = split_system(messages);
        let request = ApiRequest {
            model: &self.model,
            messages,
            system,
            max_tokens: MAX_TOKENS,
            temperature: self.temperature,
        };

        debug!(url = %self.api_url, model = %self.model, "Messages request");
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let text: Vec<String> = body
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect();
        if text.is_empty() {
            return Err(LlmError::InvalidResponse("no text content in response".to_string()));
        }
        Ok(text.join(""))
    }
}
