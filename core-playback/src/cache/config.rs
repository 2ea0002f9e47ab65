//! Cache configuration

use super::encryption::EncryptionKey;
use crate::error::{PlaybackError, Result};
use core_runtime::config::{CipherSecret, CoreConfig};
use std::path::PathBuf;

/// Default cache budget (100 MiB).
pub const DEFAULT_CAPACITY_BYTES: u64 = 100 * 1024 * 1024;

/// Default plaintext size of one encrypted frame (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest accepted frame size (16 MiB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for the encrypted span store.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding span files and the index checkpoint
    pub cache_root: PathBuf,

    /// Soft byte budget across all spans (default: 100 MiB)
    pub capacity_bytes: u64,

    /// Key used for every span
    pub key: EncryptionKey,

    /// Wait for in-flight writes covering a byte instead of fetching it again
    /// (default: true)
    pub block_on_cache: bool,

    /// Plaintext bytes per encrypted frame (default: 64 KiB)
    pub chunk_size: usize,

    /// Largest span a single writer produces before rolling over
    /// (default: unlimited)
    pub max_span_bytes: Option<u64>,

    /// Persist the index to `index.json` on close and restore it on open
    /// (default: true)
    pub persist_index: bool,
}

impl CacheConfig {
    /// Create a configuration with default values.
    pub fn new(cache_root: impl Into<PathBuf>, key: EncryptionKey) -> Self {
        Self {
            cache_root: cache_root.into(),
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            key,
            block_on_cache: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_span_bytes: None,
            persist_index: true,
        }
    }

    /// Derive the store configuration from the runtime configuration.
    pub fn from_core(config: &CoreConfig) -> Result<Self> {
        let key = match &config.cipher_secret {
            CipherSecret::Raw(bytes) => EncryptionKey::from_bytes(bytes.clone())?,
            CipherSecret::Passphrase(secret) => EncryptionKey::from_passphrase(secret)?,
        };

        let mut cache = Self::new(config.cache_dir.clone(), key)
            .with_capacity(config.cache_size_bytes)
            .with_block_on_cache(config.block_on_cache)
            .with_persist_index(config.persist_index);
        cache.max_span_bytes = config.max_span_bytes;
        cache.validate()?;
        Ok(cache)
    }

    /// Set the cache budget.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity_bytes = bytes;
        self
    }

    /// Enable or disable waiting on in-flight writes.
    pub fn with_block_on_cache(mut self, enabled: bool) -> Self {
        self.block_on_cache = enabled;
        self
    }

    /// Set the frame size.
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Cap the size of a single span.
    pub fn with_max_span_bytes(mut self, bytes: u64) -> Self {
        self.max_span_bytes = Some(bytes);
        self
    }

    /// Enable or disable the index checkpoint.
    pub fn with_persist_index(mut self, enabled: bool) -> Self {
        self.persist_index = enabled;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(PlaybackError::InvalidConfig(
                "cache_root cannot be empty".to_string(),
            ));
        }

        if self.capacity_bytes == 0 {
            return Err(PlaybackError::InvalidConfig(
                "capacity_bytes must be greater than 0".to_string(),
            ));
        }

        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(PlaybackError::InvalidConfig(format!(
                "chunk_size must be between 1 and {} bytes",
                MAX_CHUNK_SIZE
            )));
        }

        if self.max_span_bytes == Some(0) {
            return Err(PlaybackError::InvalidConfig(
                "max_span_bytes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EncryptionKey {
        EncryptionKey::from_bytes(vec![1u8; 32]).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = CacheConfig::new("/tmp/cache", key());
        assert_eq!(config.capacity_bytes, DEFAULT_CAPACITY_BYTES);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.block_on_cache);
        assert!(config.persist_index);
        assert_eq!(config.max_span_bytes, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new("/tmp/cache", key())
            .with_capacity(1000)
            .with_block_on_cache(false)
            .with_chunk_size(16)
            .with_max_span_bytes(64)
            .with_persist_index(false);

        assert_eq!(config.capacity_bytes, 1000);
        assert!(!config.block_on_cache);
        assert_eq!(config.chunk_size, 16);
        assert_eq!(config.max_span_bytes, Some(64));
        assert!(!config.persist_index);
    }

    #[test]
    fn test_config_validation() {
        assert!(CacheConfig::new("", key()).validate().is_err());
        assert!(CacheConfig::new("/tmp/c", key())
            .with_capacity(0)
            .validate()
            .is_err());
        assert!(CacheConfig::new("/tmp/c", key())
            .with_chunk_size(0)
            .validate()
            .is_err());
        assert!(CacheConfig::new("/tmp/c", key())
            .with_chunk_size(MAX_CHUNK_SIZE + 1)
            .validate()
            .is_err());
        assert!(CacheConfig::new("/tmp/c", key())
            .with_max_span_bytes(0)
            .validate()
            .is_err());
    }
}
