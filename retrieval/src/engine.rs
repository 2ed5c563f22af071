//! Shared neighbor engine implementation.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use neighbors_embeddings::{Neighbor, NeighborCache};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{NeighborConfig, SavePolicy};
use crate::error::Result;

/// Neighbor lookups over a persistent cache, shareable across tasks.
///
/// Lookups on filled rows only take a read lock. A miss takes the write
/// lock and computes the row with the raw model on the blocking pool, so
/// the async workers keep serving other tasks meanwhile.
#[derive(Clone)]
pub struct NeighborEngine {
    /// Configuration.
    config: NeighborConfig,

    /// Resolved snapshot path.
    cache_path: PathBuf,

    /// The cache and its (lazily loaded) raw model.
    cache: Arc<RwLock<NeighborCache>>,
}

impl NeighborEngine {
    /// Create a new neighbor engine builder.
    pub fn builder() -> NeighborEngineBuilder {
        NeighborEngineBuilder::new()
    }

    /// Open the cache described by `config`, rebuilding it from the raw
    /// model if no usable snapshot exists.
    pub async fn new(config: NeighborConfig) -> Result<Self> {
        config.validate()?;
        let cache_path = config.effective_cache_path();
        info!(
            "Opening neighbor engine (model {}, cache {})",
            config.model_path.display(),
            cache_path.display()
        );

        let model_path = config.model_path.clone();
        let snapshot_path = cache_path.clone();
        let width = config.neighbor_count;
        let cache = tokio::task::spawn_blocking(move || {
            NeighborCache::open_with_width(model_path, snapshot_path, width)
        })
        .await??;

        info!(
            "Neighbor engine ready: {} words, {} cached",
            cache.len(),
            cache.filled_rows()
        );
        Ok(Self {
            config,
            cache_path,
            cache: Arc::new(RwLock::new(cache)),
        })
    }

    /// Neighbors of `word`, best first.
    pub async fn find_neighbors(&self, word: &str) -> Result<Vec<Neighbor>> {
        let hit = self.cache.read().await.cached(word)?;
        if let Some(neighbors) = hit {
            debug!("Cache hit: {word}");
            return Ok(neighbors);
        }

        // A miss may load the raw model and scans every row of it.
        let mut cache = Arc::clone(&self.cache).write_owned().await;
        let word = word.to_string();
        let neighbors =
            tokio::task::spawn_blocking(move || cache.find_neighbors(&word)).await??;
        Ok(neighbors)
    }

    /// Cosine similarity of two words, `0.0` if either is unknown.
    pub async fn distance(&self, word1: &str, word2: &str) -> Result<f32> {
        let mut cache = Arc::clone(&self.cache).write_owned().await;
        let (word1, word2) = (word1.to_string(), word2.to_string());
        let similarity =
            tokio::task::spawn_blocking(move || cache.distance(&word1, &word2)).await??;
        Ok(similarity)
    }

    /// Whether rows were filled since the cache was opened or last saved.
    pub async fn is_dirty(&self) -> bool {
        self.cache.read().await.is_dirty()
    }

    /// Write the cache snapshot.
    ///
    /// The snapshot goes to a temporary file first and is then renamed over
    /// the old one. The write lock is held throughout so no row filled in
    /// the meantime is marked as saved.
    pub async fn save(&self) -> Result<()> {
        let mut cache = self.cache.write().await;
        let mut bytes = Vec::new();
        cache.write_binary(&mut bytes)?;

        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = temp_path(&self.cache_path);
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, &self.cache_path).await?;

        cache.mark_clean();
        info!(
            "Saved neighbor cache to {} ({} bytes)",
            self.cache_path.display(),
            bytes.len()
        );
        Ok(())
    }

    /// Save only if rows were filled since the last save.
    pub async fn save_if_dirty(&self) -> Result<bool> {
        if !self.is_dirty().await {
            return Ok(false);
        }
        self.save().await?;
        Ok(true)
    }

    /// Write the human-readable dump of the cache to `path`.
    pub async fn export_text(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut text = Vec::new();
        self.cache.read().await.write_text(&mut text)?;
        fs::write(path, text).await?;
        info!("Exported neighbor cache to {}", path.display());
        Ok(())
    }

    /// Apply the save policy and release the engine.
    pub async fn close(self) -> Result<()> {
        match self.config.save_policy {
            SavePolicy::WhenDirty => {
                self.save_if_dirty().await?;
            }
            SavePolicy::Manual => {
                if self.is_dirty().await {
                    warn!(
                        "Closing neighbor engine with unsaved rows (cache {})",
                        self.cache_path.display()
                    );
                }
            }
        }
        Ok(())
    }

    /// Get engine statistics.
    pub async fn stats(&self) -> EngineStats {
        let cache = self.cache.read().await;
        EngineStats {
            words: cache.len(),
            filled_rows: cache.filled_rows(),
            neighbor_count: cache.width(),
            dirty: cache.is_dirty(),
            model_loaded: cache.is_model_loaded(),
        }
    }

    pub fn config(&self) -> &NeighborConfig {
        &self.config
    }

    /// Where the snapshot is saved.
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut temp = OsString::from(path.as_os_str());
    temp.push(".tmp");
    PathBuf::from(temp)
}

/// Builder for the neighbor engine.
pub struct NeighborEngineBuilder {
    config: NeighborConfig,
}

impl NeighborEngineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: NeighborConfig::default(),
        }
    }

    /// Set the raw model path.
    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.model_path = path.into();
        self
    }

    /// Set the cache snapshot path.
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_path = Some(path.into());
        self
    }

    /// Set the neighbor count for a rebuilt cache.
    pub fn with_neighbor_count(mut self, count: usize) -> Self {
        self.config.neighbor_count = count;
        self
    }

    /// Set the save policy.
    pub fn with_save_policy(mut self, policy: SavePolicy) -> Self {
        self.config.save_policy = policy;
        self
    }

    /// Build the engine.
    pub async fn build(self) -> Result<NeighborEngine> {
        NeighborEngine::new(self.config).await
    }
}

impl Default for NeighborEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the neighbor engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of words with a cache row.
    pub words: usize,

    /// Number of rows already computed.
    pub filled_rows: usize,

    /// Neighbors kept per word.
    pub neighbor_count: usize,

    /// Whether there are unsaved rows.
    pub dirty: bool,

    /// Whether the raw model is in memory.
    pub model_loaded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use neighbors_embeddings::VectorModel;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_model(dir: &Path) -> PathBuf {
        let model = VectorModel::from_rows([
            ("king", vec![1.0, 0.0]),
            ("queen", vec![0.9, 0.1]),
            ("man", vec![0.0, 1.0]),
            ("woman", vec![0.1, 0.9]),
        ])
        .unwrap();
        let path = dir.join("vectors.bin");
        let mut file = std::fs::File::create(&path).unwrap();
        model.write_raw(&mut file).unwrap();
        path
    }

    #[tokio::test]
    async fn test_engine_creation() {
        let temp_dir = TempDir::new().unwrap();
        let model_path = write_model(temp_dir.path());

        let engine = NeighborEngine::new(NeighborConfig::new(&model_path)).await.unwrap();
        assert_eq!(
            engine.cache_path(),
            temp_dir.path().join("vectors.bin.cache").as_path()
        );

        let stats = engine.stats().await;
        assert_eq!(stats.words, 4);
        assert_eq!(stats.filled_rows, 0);
        assert_eq!(stats.neighbor_count, 40);
        assert!(stats.model_loaded);
    }

    #[tokio::test]
    async fn test_builder_pattern() {
        let temp_dir = TempDir::new().unwrap();
        let model_path = write_model(temp_dir.path());

        let engine = NeighborEngine::builder()
            .with_model_path(&model_path)
            .with_cache_path(temp_dir.path().join("custom.cache"))
            .with_neighbor_count(2)
            .with_save_policy(SavePolicy::WhenDirty)
            .build()
            .await
            .unwrap();

        let neighbors = engine.find_neighbors("king").await.unwrap();
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].word, "queen");
        assert!(engine.is_dirty().await);

        engine.close().await.unwrap();
        assert!(temp_dir.path().join("custom.cache").exists());
    }

    #[tokio::test]
    async fn test_save_if_dirty() {
        let temp_dir = TempDir::new().unwrap();
        let model_path = write_model(temp_dir.path());
        let engine = NeighborEngine::new(NeighborConfig::new(&model_path)).await.unwrap();

        assert!(!engine.save_if_dirty().await.unwrap());
        engine.find_neighbors("man").await.unwrap();
        assert!(engine.save_if_dirty().await.unwrap());
        assert!(!engine.is_dirty().await);
        assert!(!temp_path(engine.cache_path()).exists());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = NeighborConfig::new("vectors.bin").with_neighbor_count(0);
        assert!(NeighborEngine::new(config).await.is_err());
    }

    #[test]
    fn test_temp_path() {
        assert_eq!(
            temp_path(Path::new("/a/vectors.bin.cache")),
            PathBuf::from("/a/vectors.bin.cache.tmp")
        );
    }
}
