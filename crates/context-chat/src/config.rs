//! TOML configuration parsing and validation.
//!
//! Every section has defaults, so an empty file is a valid configuration
//! for local development (in-memory store, embeddings disabled). Secrets
//! and endpoints can be supplied through the environment instead of the
//! file:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `REDIS_URL` | `session.redis_url` |
//! | `QDRANT_URL` | `retrieval.url` |
//! | `QDRANT_API_KEY` | `retrieval.api_key` |
//! | `generation.api_key_env` (default `GEMINI_API_KEY`) | model API key |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:4000".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            ttl_secs: default_ttl_secs(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_ttl_secs() -> u64 {
    3600
}
fn default_store_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Qdrant,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub backend: IndexBackend,
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            url: default_qdrant_url(),
            api_key: None,
            collection: default_collection(),
            top_k: default_top_k(),
            timeout_secs: default_retrieval_timeout_secs(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "news".to_string()
}
fn default_top_k() -> usize {
    3
}
fn default_retrieval_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL; provider-specific default when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_embedding_timeout_secs(),
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
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_base_url(),
            model: default_generation_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_generation_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Base URL of the chat server the controller tries first.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Exchanges kept in the local buffer for the fallback path.
    #[serde(default = "default_max_exchanges")]
    pub max_exchanges: usize,
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            max_exchanges: default_max_exchanges(),
            timeout_secs: default_client_timeout_secs(),
        }
    }
}

fn default_server_url() -> String {
    "http://localhost:4000".to_string()
}
fn default_max_exchanges() -> usize {
    2
}
fn default_client_timeout_secs() -> u64 {
    60
}

/// Read, apply environment overrides to, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
///
/// Environment overrides and validation still apply.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }
    tracing::debug!("config file {} not found, using defaults", path.display());
    let mut config = Config::default();
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(url) = std::env::var("REDIS_URL") {
        config.session.redis_url = url;
    }
    if let Ok(url) = std::env::var("QDRANT_URL") {
        config.retrieval.url = url;
    }
    if let Ok(key) = std::env::var("QDRANT_API_KEY") {
        config.retrieval.api_key = Some(key);
    }
}

/// Check cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.session.ttl_secs == 0 {
        bail!("session.ttl_secs must be > 0");
    }
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.collection.trim().is_empty() {
        bail!("retrieval.collection must not be empty");
    }

    for (name, secs) in [
        ("session.timeout_secs", config.session.timeout_secs),
        ("retrieval.timeout_secs", config.retrieval.timeout_secs),
        ("embedding.timeout_secs", config.embedding.timeout_secs),
        ("generation.timeout_secs", config.generation.timeout_secs),
        ("client.timeout_secs", config.client.timeout_secs),
    ] {
        if secs == 0 {
            bail!("{} must be > 0", name);
        }
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "gemini" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, gemini, or ollama.",
            other
        ),
    }

    Ok(())
}
