//! Configuration for the neighbor engine.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use neighbors_embeddings::DEFAULT_NEIGHBORS;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Configuration for the neighbor engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborConfig {
    /// Raw word-vector model.
    pub model_path: PathBuf,

    /// Binary cache snapshot. Defaults to the model path with `.cache`
    /// appended.
    pub cache_path: Option<PathBuf>,

    /// Neighbors kept per word when the cache is rebuilt.
    pub neighbor_count: usize,

    /// What to do with unsaved rows when the engine is closed.
    pub save_policy: SavePolicy,
}

impl NeighborConfig {
    /// Create a new configuration with default values.
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            cache_path: None,
            neighbor_count: DEFAULT_NEIGHBORS,
            save_policy: SavePolicy::default(),
        }
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the cache snapshot path.
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Set the neighbor count for rebuilt caches.
    pub fn with_neighbor_count(mut self, count: usize) -> Self {
        self.neighbor_count = count;
        self
    }

    /// Set the save policy.
    pub fn with_save_policy(mut self, policy: SavePolicy) -> Self {
        self.save_policy = policy;
        self
    }

    /// The cache path, falling back to `<model_path>.cache`.
    pub fn effective_cache_path(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(|| {
            let mut path = OsString::from(self.model_path.as_os_str());
            path.push(".cache");
            PathBuf::from(path)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.neighbor_count == 0 {
            return Err(RetrievalError::Config(
                "neighbor_count must be at least 1".to_string(),
            ));
        }
        if self.model_path.as_os_str().is_empty() {
            return Err(RetrievalError::Config("model_path is empty".to_string()));
        }
        Ok(())
    }
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self::new(
            dirs::data_dir()
                .unwrap_or_default()
                .join("neighbors/vectors.bin"),
        )
    }
}

/// When the engine writes its cache back to disk on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavePolicy {
    /// Only on an explicit save.
    #[default]
    Manual,
    /// On close, if any row was filled since the last save.
    WhenDirty,
}
