use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context as AnyhowContext, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::tools::DEFAULT_TIMEOUT_MS;

/// 全局配置 (YAML)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub runtime: RuntimeConfig,
    pub agent: AgentConfig,
    pub llm: ProviderConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Let programs with unknown node types run, skipping those nodes.
    pub allow_unresolved_types: bool,
    pub default_timeout_ms: u64,
    pub max_loop_iterations: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            allow_unresolved_types: true,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_loop_iterations: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub take_screenshots: bool,
    pub screenshot_dir: PathBuf,
    pub max_steps: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            take_screenshots: false,
            screenshot_dir: PathBuf::from("screenshots"),
            max_steps: 25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    Anthropic,
    Gemini,
    Custom,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            "gemini" | "google" => Ok(LlmProvider::Gemini),
            "custom" => Ok(LlmProvider::Custom),
            other => Err(anyhow!("Unknown LLM provider: {}", other)),
        }
    }
}

impl LlmProvider {
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi | LlmProvider::Custom => "gpt-4o-mini",
            LlmProvider::Gemini => "gemini-pro",
            LlmProvider::Anthropic => "claude-3-sonnet-20240229",
        }
    }
}

/// Provider, model and credentials for the language model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider: LlmProvider,
    /// Falls back to the provider's default model.
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// Base URL overriding the provider's public endpoint.
    pub endpoint: Option<String>,
    pub temperature: Option<f32>,
}

impl ProviderConfig {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub redis_url: Option<String>,
}

impl Settings {
    /// Load from a YAML file (or defaults), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to deserialize config from {}", path.display()))
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(provider) = lookup("BROWSERFLOW_LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(model) = lookup("BROWSERFLOW_LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(key) = lookup("BROWSERFLOW_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(endpoint) = lookup("BROWSERFLOW_LLM_ENDPOINT") {
            self.llm.endpoint = Some(endpoint);
        }
        if let Some(url) = lookup("BROWSERFLOW_REDIS_URL") {
            self.store.redis_url = Some(url);
        }
        Ok(())
    }
}
