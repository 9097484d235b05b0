use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub web: WebConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            web: WebConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./recall.db"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Staged fragments are flushed to the index in batches of this size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Inputs whose trimmed text is shorter than this are skipped.
    #[serde(default = "default_min_fragment_chars")]
    pub min_fragment_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            min_fragment_chars: default_min_fragment_chars(),
        }
    }
}

fn default_batch_size() -> usize {
    32
}
fn default_min_fragment_chars() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Results returned per search when the caller does not override k.
    #[serde(default = "default_k")]
    pub default_k: usize,
    /// Candidates below `1 - floor` similarity are discarded.
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f32,
    /// Char budget applied to raw fragment text in formatted output.
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    /// Maximum cached query results.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Cached results older than this are evicted.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            relevance_floor: default_relevance_floor(),
            snippet_chars: default_snippet_chars(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_relevance_floor() -> f32 {
    0.3
}
fn default_snippet_chars() -> usize {
    500
}
fn default_cache_capacity() -> usize {
    64
}
fn default_cache_ttl_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hash` (deterministic local), `openai`, or `disabled`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// API base URL for the `openai` provider.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            endpoint: default_endpoint(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    /// SearxNG-compatible JSON search endpoint. Web search is disabled
    /// when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_web_results")]
    pub results: usize,
    #[serde(default = "default_web_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            results: default_web_results(),
            timeout_secs: default_web_timeout_secs(),
        }
    }
}

fn default_web_results() -> usize {
    3
}
fn default_web_timeout_secs() -> u64 {
    10
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }
    if config.ingest.min_fragment_chars == 0 {
        anyhow::bail!("ingest.min_fragment_chars must be > 0");
    }

    if config.retrieval.default_k < 1 {
        anyhow::bail!("retrieval.default_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.relevance_floor) {
        anyhow::bail!("retrieval.relevance_floor must be in [0.0, 1.0]");
    }
    if config.retrieval.snippet_chars == 0 {
        anyhow::bail!("retrieval.snippet_chars must be > 0");
    }

    match config.embedding.provider.as_str() {
        "hash" | "openai" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, or disabled.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        anyhow::bail!("embedding.model must be specified when provider is 'openai'");
    }

    if config.web.results == 0 {
        anyhow::bail!("web.results must be > 0");
    }

    Ok(())
}
