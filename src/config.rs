//! Layered service configuration.
//!
//! Priority (highest to lowest):
//! 1. `DOCENT_`-prefixed environment variables (`DOCENT_PIPELINE__HISTORY_TURNS=4`)
//! 2. Deployment environment variables (`OPENAI_API_KEY`, `S3_BUCKET_NAME`, ...)
//! 3. TOML file (explicit path, or `docent.toml` in the working directory)
//! 4. Built-in defaults

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::RetryPolicy;

pub const APP_NAME: &str = "docent";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_CONFIG_FILE: &str = "docent.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Missing credential: {0}")]
    MissingKey(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Cannot read persona file {path}: {source}")]
    Persona {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub models: ModelConfig,
    pub pipeline: PipelineConfig,
    /// Directory holding one JSON transcript per session.
    pub memory_dir: PathBuf,
    /// Optional tone/style text appended to the answering instruction.
    pub persona_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            llm: LlmConfig::default(),
            models: ModelConfig::default(),
            pipeline: PipelineConfig::default(),
            memory_dir: PathBuf::from("memory"),
            persona_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(deserialize_with = "comma_list")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".into(),
            cors_origins: vec!["http://localhost:3000".into()],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Custom S3-compatible endpoint; switches to path-style addressing.
    pub endpoint: Option<String>,
    /// Root directory for the `local` backend.
    pub local_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            bucket: None,
            region: "us-east-1".into(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            endpoint: None,
            local_dir: PathBuf::from("uploads"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub claude_api_key: Option<String>,
    pub claude_base_url: Option<String>,
    pub ollama_host: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: None,
            claude_api_key: None,
            claude_base_url: None,
            ollama_host: None,
            request_timeout_secs: 120,
            max_retries: 3,
            retry_base_delay_ms: 500,
        }
    }
}

impl LlmConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

/// `provider/model` strings per pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub classifier: String,
    pub metadata: String,
    pub draft: String,
    pub critique: String,
    pub refine: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            classifier: "openai/gpt-4o-mini".into(),
            metadata: "openai/gpt-4o-mini".into(),
            draft: "openai/gpt-4o-mini".into(),
            critique: "openai/gpt-4o".into(),
            refine: "openai/gpt-4o-mini".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum number of academic markers for the structural gate.
    pub marker_threshold: usize,
    pub semantic_prefix_chars: usize,
    pub metadata_prefix_chars: usize,
    /// Most recent transcript turns passed to the draft stage.
    pub history_turns: usize,
    /// Append refused exchanges to the transcript as well.
    pub record_refusals: bool,
    pub max_concurrent_exchanges: usize,
    pub exchange_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            marker_threshold: 3,
            semantic_prefix_chars: 4000,
            metadata_prefix_chars: 6000,
            history_turns: 6,
            record_refusals: false,
            max_concurrent_exchanges: 8,
            exchange_timeout_secs: 300,
        }
    }
}

/// Accept either a TOML/JSON list or a comma-separated string.
fn comma_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let items = match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s.split(',').map(str::to_string).collect(),
        OneOrMany::Many(v) => v,
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Map the unprefixed variables a deployment already sets to config keys.
fn deployment_env_key(name: &str) -> Option<&'static str> {
    let key = match name.to_ascii_uppercase().as_str() {
        "CORS_ORIGINS" => "server.cors_origins",
        "AWS_ACCESS_KEY_ID" => "storage.access_key_id",
        "AWS_SECRET_ACCESS_KEY" => "storage.secret_access_key",
        "AWS_SESSION_TOKEN" => "storage.session_token",
        "AWS_REGION" => "storage.region",
        "S3_BUCKET_NAME" => "storage.bucket",
        "S3_ENDPOINT" => "storage.endpoint",
        "OPENAI_API_KEY" => "llm.openai_api_key",
        "OPENAI_BASE_URL" => "llm.openai_base_url",
        "ANTHROPIC_API_KEY" => "llm.claude_api_key",
        "OLLAMA_HOST" => "llm.ollama_host",
        "MEMORY_DIR" => "memory_dir",
        "PERSONA_PATH" => "persona_path",
        _ => return None,
    };
    Some(key)
}

const DEPLOYMENT_ENV: &[&str] = &[
    "CORS_ORIGINS",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "AWS_REGION",
    "S3_BUCKET_NAME",
    "S3_ENDPOINT",
    "OPENAI_API_KEY",
    "OPENAI_BASE_URL",
    "ANTHROPIC_API_KEY",
    "OLLAMA_HOST",
    "MEMORY_DIR",
    "PERSONA_PATH",
];

fn figment(path: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    match path {
        Some(path) => figment = figment.merge(Toml::file_exact(path)),
        None => {
            let local = Path::new(DEFAULT_CONFIG_FILE);
            if local.exists() {
                figment = figment.merge(Toml::file(local));
            }
        }
    }

    figment
        .merge(Env::raw().only(DEPLOYMENT_ENV).map(|key| {
            deployment_env_key(key.as_str())
                .map(Into::into)
                .unwrap_or_else(|| key.as_str().into())
        }))
        .merge(Env::prefixed("DOCENT_").split("__"))
}

/// Load configuration from layered sources and validate it.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = figment(path).extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.backend == StorageBackend::S3
            && self.storage.bucket.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::Invalid(
                "storage.bucket (S3_BUCKET_NAME) is required for the s3 backend".into(),
            ));
        }
        for origin in &self.server.cors_origins {
            if origin != "*" && axum::http::HeaderValue::from_str(origin).is_err() {
                return Err(ConfigError::Invalid(format!("bad CORS origin {origin:?}")));
            }
        }
        if self.pipeline.max_concurrent_exchanges == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_concurrent_exchanges must be at least 1".into(),
            ));
        }
        if self.pipeline.exchange_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.exchange_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Read the persona text once. A missing file is only an error when the
/// path was configured explicitly and cannot be read.
pub fn load_persona(path: Option<&Path>) -> Result<Option<String>, ConfigError> {
    let Some(path) = path else {
        return Ok(None);
    };
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let text = text.trim();
            Ok((!text.is_empty()).then(|| text.to_string()))
        }
        Err(source) => Err(ConfigError::Persona {
            path: path.to_path_buf(),
            source,
        }),
    }
}
