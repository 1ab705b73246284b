pub mod claude;
pub mod openai;
pub mod retry;

use crate::config::{ConfigError, LlmConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use retry::RetryPolicy;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object reply where it supports it.
    pub json: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

/// Per-call knobs a pipeline stage can set on top of its model.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub json: bool,
}

/// A text-completion service. Everything downstream of configuration talks
/// to models through this trait only.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;
}

/// Unified LLM provider enum, dispatching to OpenAI-compatible or Claude backends.
#[derive(Debug, Clone)]
pub enum Provider {
    OpenAi(openai::OpenAiConfig),
    Claude(claude::ClaudeConfig),
    Ollama(openai::OpenAiConfig),
}

impl Provider {
    pub fn openai(api_key: String, base_url: Option<String>) -> Self {
        Provider::OpenAi(openai::OpenAiConfig {
            api_key,
            base_url: base_url.unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string()),
        })
    }

    pub fn claude(api_key: String, base_url: Option<String>) -> Self {
        Provider::Claude(claude::ClaudeConfig {
            api_key,
            base_url: base_url.unwrap_or_else(|| claude::DEFAULT_BASE_URL.to_string()),
        })
    }

    pub fn ollama(host: String) -> Self {
        Provider::Ollama(openai::OpenAiConfig {
            api_key: String::new(),
            base_url: format!("{}/v1", host.trim_end_matches('/')),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi(_) => "openai",
            Provider::Claude(_) => "claude",
            Provider::Ollama(_) => "ollama",
        }
    }
}

/// A provider bound to the process-wide HTTP client.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: Client,
    provider: Provider,
}

impl ProviderClient {
    pub fn new(http: Client, provider: Provider) -> Self {
        Self { http, provider }
    }
}

#[async_trait]
impl Oracle for ProviderClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        match &self.provider {
            Provider::OpenAi(config) | Provider::Ollama(config) => {
                openai::chat(&self.http, config, request).await
            }
            Provider::Claude(config) => claude::chat(&self.http, config, request).await,
        }
    }
}

/// Build the shared HTTP client used by every provider.
pub fn http_client(config: &LlmConfig) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(|e| ConfigError::Invalid(format!("HTTP client: {e}")))
}

/// Resolve an LLM provider from a model string like "openai/gpt-4o", "claude/...", "ollama/..."
pub fn resolve_model(model: &str, config: &LlmConfig) -> Result<(Provider, String), ConfigError> {
    if let Some(model_id) = model.strip_prefix("ollama/") {
        let host = config
            .ollama_host
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok((Provider::ollama(host), model_id.to_string()))
    } else if let Some(model_id) = model.strip_prefix("claude/") {
        let api_key = config
            .claude_api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingKey(format!("Claude API key for model {model}")))?;
        Ok((
            Provider::claude(api_key, config.claude_base_url.clone()),
            model_id.to_string(),
        ))
    } else {
        let model_id = model.strip_prefix("openai/").unwrap_or(model);
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingKey(format!("OpenAI API key for model {model}")))?;
        Ok((
            Provider::openai(api_key, config.openai_base_url.clone()),
            model_id.to_string(),
        ))
    }
}

/// An oracle, the model to ask, and how hard to try.
#[derive(Clone)]
pub struct ModelHandle {
    oracle: Arc<dyn Oracle>,
    model: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model", &self.model)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ModelHandle {
    pub fn new(oracle: Arc<dyn Oracle>, model: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            oracle,
            model: model.into(),
            retry,
        }
    }

    /// Resolve `model_ref` against the provider settings and bind it to `http`.
    pub fn resolve(
        model_ref: &str,
        config: &LlmConfig,
        http: &Client,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let (provider, model) = resolve_model(model_ref, config)?;
        tracing::debug!(provider = provider.name(), %model, "resolved model");
        Ok(Self::new(
            Arc::new(ProviderClient::new(http.clone(), provider)),
            model,
            retry,
        ))
    }

    /// Send one completion request, retrying transient failures.
    pub async fn ask(
        &self,
        messages: Vec<ChatMessage>,
        options: CallOptions,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            messages,
            model: self.model.clone(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            json: options.json,
        };
        let response = self
            .retry
            .run(&self.model, || self.oracle.complete(&request))
            .await?;
        Ok(response.content)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Model returned an empty reply")]
    Empty,
}

impl LlmError {
    /// Transport failures and throttling/server-side statuses are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(e) => !e.is_builder() && !e.is_decode(),
            LlmError::Api { status, .. } => matches!(status, 408 | 429 | 500..=599),
            LlmError::Parse(_) | LlmError::Empty => false,
        }
    }
}
