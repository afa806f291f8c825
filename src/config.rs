use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub lexical: LexicalConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Where the shared vector index comes from and how long local copies stay fresh.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_blob")]
    pub index_blob: String,
    #[serde(default = "default_lookup_blob")]
    pub lookup_blob: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_max_cache_age_hours")]
    pub max_cache_age_hours: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_blob: default_index_blob(),
            lookup_blob: default_lookup_blob(),
            cache_dir: default_cache_dir(),
            max_cache_age_hours: default_max_cache_age_hours(),
        }
    }
}

fn default_index_blob() -> String {
    "knowledge.index".to_string()
}
fn default_lookup_blob() -> String {
    "knowledge.lookup.json".to_string()
}
fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("agency-retrieval")
}
fn default_max_cache_age_hours() -> u64 {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    /// `"s3"`, `"dir"`, or `"disabled"`.
    #[serde(default = "default_blob_kind")]
    pub kind: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            kind: default_blob_kind(),
            bucket: String::new(),
            prefix: String::new(),
            region: default_region(),
            endpoint_url: None,
            root: None,
        }
    }
}

fn default_blob_kind() -> String {
    "disabled".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LexicalConfig {
    #[serde(default = "default_lexical_root")]
    pub root: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_substring_boost")]
    pub substring_boost: f64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            root: default_lexical_root(),
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            min_score: default_min_score(),
            substring_boost: default_substring_boost(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_lexical_root() -> PathBuf {
    PathBuf::from("./data/tenants")
}
fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}
fn default_min_score() -> f64 {
    0.3
}
fn default_substring_boost() -> f64 {
    0.3
}
fn default_max_upload_bytes() -> u64 {
    25 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// Floor on results returned by `search_with_context` when the pool allows it.
    #[serde(default = "default_min_context")]
    pub min_context: usize,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f64,
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    #[serde(default = "default_mmr_prefix_chars")]
    pub mmr_prefix_chars: usize,
    #[serde(default = "default_local_top_k")]
    pub local_top_k: usize,
    #[serde(default = "default_global_top_k")]
    pub global_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            min_context: default_min_context(),
            mmr_lambda: default_mmr_lambda(),
            fetch_k: default_fetch_k(),
            mmr_prefix_chars: default_mmr_prefix_chars(),
            local_top_k: default_local_top_k(),
            global_top_k: default_global_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_min_context() -> usize {
    3
}
fn default_mmr_lambda() -> f64 {
    0.7
}
fn default_fetch_k() -> usize {
    15
}
fn default_mmr_prefix_chars() -> usize {
    500
}
fn default_local_top_k() -> usize {
    5
}
fn default_global_top_k() -> usize {
    10
}
fn default_max_top_k() -> usize {
    25
}

/// The remote hybrid-retrieval (vector + generation) service.
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
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

pub fn validate(config: &Config) -> Result<()> {
    // Lexical chunking
    if config.lexical.chunk_size == 0 {
        anyhow::bail!("lexical.chunk_size must be > 0");
    }
    if config.lexical.overlap >= config.lexical.chunk_size {
        anyhow::bail!("lexical.overlap must be < lexical.chunk_size");
    }
    for (name, value) in [
        ("lexical.min_score", config.lexical.min_score),
        ("lexical.substring_boost", config.lexical.substring_boost),
        ("retrieval.min_score", config.retrieval.min_score),
        ("retrieval.mmr_lambda", config.retrieval.mmr_lambda),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("{} must be in [0.0, 1.0]", name);
        }
    }

    // Retrieval
    if config.retrieval.max_top_k < 1 {
        anyhow::bail!("retrieval.max_top_k must be >= 1");
    }
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.fetch_k < config.retrieval.top_k {
        anyhow::bail!("retrieval.fetch_k must be >= retrieval.top_k");
    }

    // Embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    // Blob store
    match config.blob.kind.as_str() {
        "disabled" => {}
        "s3" => {
            if config.blob.bucket.is_empty() {
                anyhow::bail!("blob.bucket must be set when blob.kind is 's3'");
            }
        }
        "dir" => {
            if config.blob.root.is_none() {
                anyhow::bail!("blob.root must be set when blob.kind is 'dir'");
            }
        }
        other => anyhow::bail!(
            "Unknown blob store kind: '{}'. Must be disabled, s3, or dir.",
            other
        ),
    }

    Ok(())
}
