//! TOML configuration parsing and validation.
//!
//! Every section has defaults, so a config file only needs the values that
//! differ from them. [`load_config`] reads and validates a file; tests
//! usually build a [`Config`] with `toml::from_str`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/local_db.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
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
    150
}
fn default_overlap() -> usize {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
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
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_dims() -> usize {
    384
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

impl EmbeddingConfig {
    /// Whether a primary model is configured at all.
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Remote mirror settings. The section being present does not make the
/// remote configured: a URL and key must also resolve (see [`RemoteConfig::resolve`]).
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_url_env")]
    pub url_env: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_match_function")]
    pub match_function: String,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            url_env: default_url_env(),
            api_key_env: default_api_key_env(),
            table: default_table(),
            match_function: default_match_function(),
            timeout_secs: default_remote_timeout_secs(),
        }
    }
}

fn default_url_env() -> String {
    "SUPABASE_URL".to_string()
}
fn default_api_key_env() -> String {
    "SUPABASE_KEY".to_string()
}
fn default_table() -> String {
    "document_chunks".to_string()
}
fn default_match_function() -> String {
    "match_documents_similarity_v1".to_string()
}
fn default_remote_timeout_secs() -> u64 {
    10
}

/// Connection details after falling back to environment variables.
#[derive(Debug, Clone)]
pub struct ResolvedRemote {
    pub url: String,
    pub api_key: String,
    pub table: String,
    pub match_function: String,
    pub timeout: Duration,
}

impl RemoteConfig {
    /// Resolve URL and key from the file, then from the environment.
    /// Returns `None` when either is missing or blank.
    pub fn resolve(&self) -> Option<ResolvedRemote> {
        let url = self
            .url
            .clone()
            .or_else(|| std::env::var(&self.url_env).ok())
            .filter(|s| !s.trim().is_empty())?;
        let api_key = self
            .api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|s| !s.trim().is_empty())?;
        Some(ResolvedRemote {
            url: url.trim_end_matches('/').to_string(),
            api_key,
            table: self.table.clone(),
            match_function: self.match_function.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default)]
    pub match_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            match_threshold: 0.0,
        }
    }
}

fn default_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_true")]
    pub truncate_stale: bool,
    #[serde(default = "default_true")]
    pub push_on_ingest: bool,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            truncate_stale: true,
            push_on_ingest: true,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
    ]
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
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap,
            config.chunking.chunk_size
        );
    }

    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "local" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, openai, or ollama.",
            other
        ),
    }
    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        bail!("embedding.model must be specified when provider is 'openai'");
    }

    if config.retrieval.default_k < 1 {
        bail!("retrieval.default_k must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.match_threshold) {
        bail!("retrieval.match_threshold must be in [-1.0, 1.0]");
    }

    if let Some(remote) = &config.remote {
        if remote.timeout_secs == 0 {
            bail!("remote.timeout_secs must be > 0");
        }
        if remote.table.trim().is_empty() {
            bail!("remote.table must not be empty");
        }
    }

    Ok(())
}
