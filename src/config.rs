//! Configuration types for infercore.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Paged KV cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Total number of blocks in the pool.
    pub num_blocks: usize,
    /// Tokens per block.
    pub block_size: usize,
    /// Elements per token vector.
    pub emb_dim: usize,
    /// Bytes per element.
    pub element_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            num_blocks: 1000,
            block_size: 16,
            emb_dim: 1024,
            element_size: std::mem::size_of::<f32>(),
        }
    }
}

impl CacheConfig {
    /// Bytes held by one token slot.
    pub fn token_bytes(&self) -> usize {
        self.emb_dim * self.element_size
    }

    /// Bytes reserved by one full block.
    pub fn block_bytes(&self) -> usize {
        self.block_size * self.token_bytes()
    }

    /// Check that the configuration describes a usable pool.
    ///
    /// `num_blocks == 0` is accepted: the pool is valid but exhausted from the start.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::Config("block_size must be positive".into()));
        }
        if self.emb_dim == 0 {
            return Err(Error::Config("emb_dim must be positive".into()));
        }
        if self.element_size == 0 {
            return Err(Error::Config("element_size must be positive".into()));
        }
        Ok(())
    }
}

/// Batch scheduler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of requests drained per scheduling iteration.
    pub max_batch_size: usize,
    /// Maximum wait for the first request of a batch, in milliseconds.
    pub batch_timeout_ms: u64,
    /// Synthetic compute cost of one decode step, in milliseconds.
    pub step_delay_ms: u64,
    /// Return a request's blocks to the pool once its batch completes.
    pub release_on_completion: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            batch_timeout_ms: 5,
            step_delay_ms: 10,
            release_on_completion: false,
        }
    }
}

impl SchedulerConfig {
    /// Batch wait timeout as a [`Duration`].
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Per-step compute delay as a [`Duration`].
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    /// Check that batches can make progress.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::Config("max_batch_size must be positive".into()));
        }
        Ok(())
    }
}

/// Engine configuration: cache pool plus scheduling policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Load a configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults. The result is validated.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate both the cache and the scheduler sections.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.scheduler.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.cache.num_blocks, 1000);
        assert_eq!(config.cache.block_size, 16);
        assert_eq!(config.cache.emb_dim, 1024);
        assert_eq!(config.cache.element_size, 4);
        assert_eq!(config.scheduler.max_batch_size, 10);
        assert_eq!(config.scheduler.batch_timeout(), Duration::from_millis(5));
        assert_eq!(config.scheduler.step_delay(), Duration::from_millis(10));
        assert!(!config.scheduler.release_on_completion);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_byte_helpers() {
        let cache = CacheConfig::default();
        assert_eq!(cache.token_bytes(), 4096);
        assert_eq!(cache.block_bytes(), 16 * 4096);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let cache = CacheConfig {
            block_size: 0,
            ..Default::default()
        };
        assert!(matches!(cache.validate(), Err(Error::Config(_))));

        let cache = CacheConfig {
            emb_dim: 0,
            ..Default::default()
        };
        assert!(cache.validate().is_err());

        let scheduler = SchedulerConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert!(scheduler.validate().is_err());
    }

    #[test]
    fn test_empty_pool_is_valid() {
        let cache = CacheConfig {
            num_blocks: 0,
            ..Default::default()
        };
        assert!(cache.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"cache": {"num_blocks": 8}}"#).unwrap();
        assert_eq!(config.cache.num_blocks, 8);
        assert_eq!(config.cache.block_size, 16);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }
}
