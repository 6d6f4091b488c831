use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub structure: StructureConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Chunks retrieved per question.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Conversation turns retained per scope. 0 = unbounded.
    #[serde(default)]
    pub memory_window: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            memory_window: 0,
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Completion/embedding backend: "openai" or "disabled".
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_chat_model() -> String {
    "gpt-4-turbo-preview".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Reasoning/tool-call rounds allowed per question.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Minimum similarity ratio for fuzzy chapter-title matching.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            match_threshold: default_match_threshold(),
        }
    }
}

fn default_max_iterations() -> u32 {
    6
}
fn default_match_threshold() -> f64 {
    0.55
}

#[derive(Debug, Deserialize, Clone)]
pub struct StructureConfig {
    /// Pages read for document-type classification.
    #[serde(default = "default_classify_pages")]
    pub classify_pages: usize,
    /// Pages scanned for a table of contents.
    #[serde(default = "default_toc_scan_pages")]
    pub toc_scan_pages: usize,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            classify_pages: default_classify_pages(),
            toc_scan_pages: default_toc_scan_pages(),
        }
    }
}

fn default_classify_pages() -> usize {
    3
}
fn default_toc_scan_pages() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Maximum retrieval indexes kept resident (LRU by document + scope).
    #[serde(default = "default_max_indexes")]
    pub max_indexes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_indexes: default_max_indexes(),
        }
    }
}

fn default_max_indexes() -> usize {
    32
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.agent.max_iterations == 0 {
        anyhow::bail!("agent.max_iterations must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.agent.match_threshold) {
        anyhow::bail!("agent.match_threshold must be in [0.0, 1.0]");
    }
    if config.cache.max_indexes == 0 {
        anyhow::bail!("cache.max_indexes must be >= 1");
    }
    match config.llm.provider.as_str() {
        "openai" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be openai or disabled.",
            other
        ),
    }
    Ok(())
}
