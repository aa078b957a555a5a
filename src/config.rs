use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::completion::Backend;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window width in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive windows. Must be < chunk_size.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override for HTTP providers (openai, ollama).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_completion_model")]
    pub model: String,
    /// Base URL of the hosted chat-completion API.
    #[serde(default = "default_hosted_url")]
    pub hosted_url: String,
    /// Environment variable holding the hosted API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Base URL of the local chat-completion server.
    #[serde(default = "default_local_url")]
    pub local_url: String,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            model: default_completion_model(),
            hosted_url: default_hosted_url(),
            api_key_env: default_api_key_env(),
            local_url: default_local_url(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

fn default_completion_model() -> String {
    "qwen-vl-max".to_string()
}
fn default_hosted_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_local_url() -> String {
    "http://127.0.0.1:8000/v1".to_string()
}
fn default_completion_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Free-form role instruction sent as the system message. Empty = none.
    #[serde(default)]
    pub role_instruction: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role_instruction: String::new(),
            temperature: default_temperature(),
        }
    }
}

fn default_temperature() -> f32 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7399".to_string(),
        }
    }
}

/// Sampling temperature range accepted by both completion backends.
pub fn valid_temperature(t: f32) -> bool {
    (0.0..=2.0).contains(&t)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load the config file if it exists, otherwise fall back to defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        log::info!("no config file at {}, using defaults", path.display());
        Ok(Config::default())
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be < chunking.chunk_size");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if !valid_temperature(config.session.temperature) {
        anyhow::bail!("session.temperature must be in [0.0, 2.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // HTTP providers need an explicit model and dimension; the local
    // provider resolves both from its model table.
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    if config.completion.model.is_empty() {
        anyhow::bail!("completion.model must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.retrieval.top_k, 3);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn parse_full_config() {
        let toml_src = r#"
            [chunking]
            chunk_size = 800
            overlap = 100

            [retrieval]
            top_k = 5

            [embedding]
            provider = "openai"
            model = "text-embedding-3-small"
            dims = 1536

            [completion]
            backend = "local"
            model = "qwen2-7b"

            [session]
            role_instruction = "You are a domain expert."
            temperature = 0.7

            [server]
            bind = "127.0.0.1:9000"
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert!(validate(&config).is_ok());
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.completion.backend, Backend::Local);
        assert_eq!(config.session.temperature, 0.7);
        assert_eq!(config.server.bind, "127.0.0.1:9000");
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut config = Config::default();
        config.chunking.overlap = config.chunking.chunk_size;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        let mut config = Config::default();
        config.session.temperature = 2.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn enabled_http_provider_requires_model_and_dims() {
        let mut config = Config::default();
        config.embedding.provider = "openai".to_string();
        assert!(validate(&config).is_err());

        config.embedding.model = Some("text-embedding-3-small".to_string());
        config.embedding.dims = Some(1536);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut config = Config::default();
        config.embedding.provider = "magic".to_string();
        assert!(validate(&config).is_err());
    }
}
