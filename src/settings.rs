//! Configuration management with environment variable support and validation.

use anyhow::{anyhow, Result};
use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub rate_limit_per_minute: u32,
    pub max_request_size_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_seconds: 120,
            enable_cors: true,
            cors_origins: vec!["*".to_string()],
            rate_limit_per_minute: 120,
            max_request_size_mb: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Generation attempts before the fallback path takes over.
    pub max_retries: usize,
    /// Classification confidence below this routes to the fallback agent.
    pub confidence_threshold: f64,
    /// How many recent memory records feed the classification prompt.
    pub memory_context_limit: usize,
    /// Upper bound on retained memory records.
    pub memory_retention: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            confidence_threshold: 0.5,
            memory_context_limit: 5,
            memory_retention: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub endpoint: String,
    pub model: String,
    /// Bearer token for the chat endpoint. Never stored in the default
    /// config; supply via environment.
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub max_tokens_stream: u32,
    pub request_timeout_seconds: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api-user.ai.aitech.io/api/v1/user/products/3/use/chat/completions"
                .to_string(),
            model: "Meta-Llama-3.1-70B-Instruct".to_string(),
            api_key: None,
            max_tokens: 1_000,
            max_tokens_stream: 3_000,
            request_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub result_count: usize,
    pub request_timeout_seconds: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://google.serper.dev".to_string(),
            api_key: None,
            result_count: 5,
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    pub path: PathBuf,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self { path: PathBuf::from("data/memory") }
    }
}

/// Main settings structure with all configuration sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub memory: MemorySettings,
}

impl Settings {
    /// Load settings from the embedded defaults, an optional local config
    /// file, and environment variables.
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("CF")
                    .separator("__")
                    .list_separator(",")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        Self::apply_env_overrides(&mut settings)?;
        settings.validate()?;

        Ok(settings)
    }

    /// Overrides for credentials and deployment-critical knobs.
    fn apply_env_overrides(settings: &mut Settings) -> Result<()> {
        if let Ok(host) = std::env::var("CF_SERVER_HOST") {
            settings.server.host = host;
        }
        if let Ok(port) = std::env::var("CF_SERVER_PORT") {
            settings.server.port = port.parse()?;
        }
        if let Ok(key) = std::env::var("CF_LLM_API_KEY") {
            settings.llm.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("CF_SEARCH_API_KEY") {
            settings.search.api_key = Some(key);
        } else if let Ok(key) = std::env::var("SERPER_API_KEY") {
            settings.search.api_key = Some(key);
        }
        if let Ok(path) = std::env::var("CF_MEMORY_PATH") {
            settings.memory.path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Validate settings for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }
        if self.orchestrator.max_retries == 0 {
            return Err(anyhow!("Orchestrator max_retries must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.orchestrator.confidence_threshold) {
            return Err(anyhow!("Confidence threshold must be within [0, 1]"));
        }
        if self.llm.endpoint.is_empty() {
            return Err(anyhow!("LLM endpoint cannot be empty"));
        }

        if self.llm.api_key.is_none() {
            warn!("No LLM API key configured; chat requests will likely be rejected");
        }
        if self.search.api_key.is_none() {
            warn!("No search API key configured; search enrichment is disabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn zero_port_rejected() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut settings = Settings::default();
        settings.orchestrator.confidence_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn embedded_defaults_parse() {
        let config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let settings: Settings = config.try_deserialize().unwrap();
        assert_eq!(settings.orchestrator.max_retries, 3);
        assert_eq!(settings.search.result_count, 5);
    }
}
