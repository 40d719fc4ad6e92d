//! Configuration management with environment variable support and
//! validation.

use anyhow::{anyhow, Result};
use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub max_request_size_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
            cors_origins: vec!["*".to_string()],
            max_request_size_mb: 2,
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
pub struct CatalogConfig {
    pub collection_name: String,
    /// How many ranked experts are assigned to each query.
    pub top_k: usize,
    /// Optional JSON file of experts loaded into the catalog at startup.
    pub seed_file: Option<PathBuf>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            collection_name: "experts".to_string(),
            top_k: 5,
            seed_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible endpoint base URL.
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: String,
    pub request_timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: None,
            model: "llama-3.3-70b-versatile".to_string(),
            system_prompt: "You are a helpful AI assistant. Provide clear, concise, and \
                            informative answers to user queries, structure it as a direct \
                            short paragraph."
                .to_string(),
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// When false, queries and responses are not mirrored to disk.
    pub enable_mirror: bool,
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enable_mirror: true,
            db_path: PathBuf::from("data/relay_db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Per-subscriber channel depth before events are dropped for that
    /// subscriber.
    pub channel_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

/// Main settings structure with all configuration sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub catalog: CatalogConfig,
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub broadcast: BroadcastConfig,
}

impl Settings {
    /// Load settings from the compiled-in defaults, an optional local
    /// `config.toml`, and environment variables.
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        Self::apply_env_overrides(&mut settings)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Shorthand overrides for the settings most often set per deployment.
    fn apply_env_overrides(settings: &mut Settings) -> Result<()> {
        if let Ok(host) = std::env::var("RELAY_SERVER_HOST") {
            settings.server.host = host;
        }
        if let Ok(port) = std::env::var("RELAY_SERVER_PORT") {
            settings.server.port = port.parse()?;
        }
        if let Ok(db_path) = std::env::var("RELAY_DB_PATH") {
            settings.storage.db_path = PathBuf::from(db_path);
        }
        // GROQ_API_KEY matches what the hosted generator expects out of the
        // box; RELAY_LLM_API_KEY wins when both are set.
        if let Ok(api_key) = std::env::var("RELAY_LLM_API_KEY") {
            settings.llm.api_key = Some(api_key);
        } else if let Ok(api_key) = std::env::var("GROQ_API_KEY") {
            settings.llm.api_key = Some(api_key);
        }
        Ok(())
    }

    /// Validate settings for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("server port cannot be 0"));
        }
        if self.catalog.top_k == 0 {
            return Err(anyhow!("catalog top_k cannot be 0"));
        }
        if self.broadcast.channel_capacity == 0 {
            return Err(anyhow!("broadcast channel capacity cannot be 0"));
        }
        if self.logging.format != "text" && self.logging.format != "json" {
            return Err(anyhow!(
                "unknown logging format '{}' (expected 'text' or 'json')",
                self.logging.format
            ));
        }
        if self.llm.api_key.is_none() {
            warn!("no LLM API key configured; query submission will fail at the generator");
        }
        if let Some(seed) = &self.catalog.seed_file {
            if !seed.exists() {
                warn!("catalog seed file does not exist: {:?}", seed);
            }
        }
        Ok(())
    }
}
