use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use coderag_llm::engine::LocalModelConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub remote_only: bool,
    #[serde(default)]
    pub local: Option<LocalModelConfig>,
}

#[derive(Debug, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_storage_root")]
    pub storage_root: String,
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
    #[serde(default = "default_vector_size")]
    pub vector_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "qwen3".into()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

fn default_storage_root() -> String {
    "./data/repos".into()
}

fn default_retrieval_k() -> usize {
    5
}

fn default_vector_size() -> usize {
    384
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

fn default_database_path() -> String {
    "./data/coderag.db".into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            remote_only: false,
            local: None,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            retrieval_k: default_retrieval_k(),
            vector_size: default_vector_size(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            database_path: default_database_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            index: IndexConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CODERAG_OLLAMA_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("CODERAG_REMOTE_ONLY") {
            self.llm.remote_only = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("CODERAG_QDRANT_URL") {
            self.memory.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("CODERAG_DB_PATH") {
            self.memory.database_path = v;
        }
        if let Ok(v) = std::env::var("CODERAG_STORAGE_ROOT") {
            self.index.storage_root = v;
        }
    }
}
