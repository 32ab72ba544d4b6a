//! TOML configuration with serde defaults; a missing file means defaults.

use std::path::Path;

use serde::Deserialize;

use crate::index::chunker::ChunkingConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub base_url: String,
    pub assistant_id: String,
    /// Consecutive client-tool round-trips allowed per human turn.
    pub max_tool_rounds: usize,
    /// Opaque payment token forwarded with every run, never interpreted.
    pub payment_token: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:2024".to_string(),
            assistant_id: "agent".to_string(),
            max_tool_rounds: 10,
            payment_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Chunk window in characters.
    pub window: usize,
    /// Inter-chunk overlap in characters.
    pub overlap: usize,
    pub db_path: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            window: 500,
            overlap: 50,
            db_path: "index.db".to_string(),
        }
    }
}

impl IndexConfig {
    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            window: self.window,
            overlap: self.overlap,
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.index.chunking().validate()?;
        Ok(config)
    }
}
