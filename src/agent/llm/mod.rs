//! Language model providers. The agent needs one capability only: generate
//! text from a list of messages.

mod anthropic;
mod openai;

pub use anthropic::AnthropicModel;
pub use openai::OpenAiCompatibleModel;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{LlmProvider, ProviderConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Provider is not configured: {0}")]
    Config(String),
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model id sent to the provider.
    fn model(&self) -> &str;

    /// One request, one complete answer. No streaming.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

const GEMINI_OPENAI_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions";

/// Build the model named by the configuration.
pub fn build_model(config: &ProviderConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
    let api_key = config.api_key.clone().unwrap_or_default();
    if api_key.is_empty() && config.endpoint.is_none() {
        return Err(LlmError::Config(format!("{:?} requires an API key", config.provider)));
    }
    let model = config.model().to_string();

    let built: Arc<dyn LanguageModel> = match config.provider {
        LlmProvider::OpenAi => {
            let mut m = OpenAiCompatibleModel::new(api_key, model);
            if let Some(endpoint) = &config.endpoint {
                m = m.with_url(endpoint);
            }
            Arc::new(m.with_temperature(config.temperature))
        }
        LlmProvider::Gemini => {
            let url = config.endpoint.as_deref().unwrap_or(GEMINI_OPENAI_URL);
            Arc::new(
                OpenAiCompatibleModel::new(api_key, model)
                    .with_url(url)
                    .with_temperature(config.temperature),
            )
        }
        LlmProvider::Custom => {
            let Some(endpoint) = &config.endpoint else {
                return Err(LlmError::Config("custom provider requires an endpoint".to_string()));
            };
            Arc::new(
                OpenAiCompatibleModel::new(api_key, model)
                    .with_url(endpoint)
                    .with_temperature(config.temperature),
            )
        }
        LlmProvider::Anthropic => {
            let mut m = AnthropicModel::new(api_key, model);
            if let Some(endpoint) = &config.endpoint {
                m = m.with_url(endpoint);
            }
            Arc::new(m.with_temperature(config.temperature))
        }
    };
    Ok(built)
}
