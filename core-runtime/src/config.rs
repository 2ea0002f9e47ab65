//! # Core Configuration Module
//!
//! Provides configuration management for the media cache core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds every dependency and setting the cache pipeline needs.
//! It enforces fail-fast validation so a misconfigured player never opens a
//! cache it cannot decrypt or fill.
//!
//! ## Required Settings
//!
//! - Cipher secret - raw 32-byte key or a passphrase, supplied by the host
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `UpstreamSource` - range reads from the origin (desktop default: reqwest)
//! - Cache directory (desktop default: platform cache dir)
//! - `Clock` - access stamps for LRU bookkeeping (default: system clock)
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults for the
//! upstream source and the cache directory are injected automatically if not
//! provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .cache_dir("/var/cache/player")
//!     .cache_size_bytes(256 * 1024 * 1024)
//!     .cipher_passphrase(host_secret)
//!     .upstream(Arc::new(MyUpstream))
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! The builder validates all required dependencies and provides actionable error
//! messages when capabilities are missing:
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // No cipher secret: the cache would be unreadable
//! let config = CoreConfig::builder()
//!     .cache_dir("/tmp/cache")
//!     .build()
//!     .expect("Should fail - missing cipher secret");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, SystemClock, UpstreamSource};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default cache budget: 100 MiB.
pub const DEFAULT_CACHE_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Largest accepted cache budget: 1 TiB.
pub const MAX_CACHE_SIZE_BYTES: u64 = 1024 * 1024 * 1024 * 1024;

/// Length of a raw AES-256 key.
pub const RAW_KEY_LEN: usize = 32;

/// Key material for span encryption.
#[derive(Clone, PartialEq, Eq)]
pub enum CipherSecret {
    /// Exactly 32 bytes of key material.
    Raw(Vec<u8>),
    /// Host secret that is stretched into a key with SHA-256.
    Passphrase(String),
}

impl fmt::Debug for CipherSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherSecret::Raw(_) => f.write_str("CipherSecret::Raw([REDACTED])"),
            CipherSecret::Passphrase(_) => f.write_str("CipherSecret::Passphrase([REDACTED])"),
        }
    }
}

/// Core configuration for the media cache.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Root directory for span files and the index checkpoint
    pub cache_dir: PathBuf,

    /// Soft byte budget for all cached spans
    pub cache_size_bytes: u64,

    /// Key material for span encryption
    pub cipher_secret: CipherSecret,

    /// Wait for in-flight writes instead of fetching the same bytes twice
    pub block_on_cache: bool,

    /// Split fetched ranges into spans of at most this many bytes
    pub max_span_bytes: Option<u64>,

    /// Persist the span index on close and restore it on open
    pub persist_index: bool,

    /// Origin for uncached bytes
    pub upstream: Arc<dyn UpstreamSource>,

    /// Time source for span access stamps
    pub clock: Arc<dyn Clock>,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("cache_dir", &self.cache_dir)
            .field("cache_size_bytes", &self.cache_size_bytes)
            .field("cipher_secret", &self.cipher_secret)
            .field("block_on_cache", &self.block_on_cache)
            .field("max_span_bytes", &self.max_span_bytes)
            .field("persist_index", &self.persist_index)
            .field("upstream", &self.upstream.name())
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Cache directory is not empty
    /// - Cache size is reasonable (> 0 and <= 1 TiB)
    /// - Cipher secret has the right shape
    /// - Span size limit and event buffer are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.cache_size_bytes == 0 {
            return Err(Error::Config(
                "Cache size must be greater than 0 bytes".to_string(),
            ));
        }

        if self.cache_size_bytes > MAX_CACHE_SIZE_BYTES {
            return Err(Error::Config(
                "Cache size exceeds maximum of 1 TiB".to_string(),
            ));
        }

        match &self.cipher_secret {
            CipherSecret::Raw(bytes) if bytes.len() != RAW_KEY_LEN => {
                return Err(Error::Config(format!(
                    "Raw cipher key must be {} bytes, got {}",
                    RAW_KEY_LEN,
                    bytes.len()
                )));
            }
            CipherSecret::Passphrase(secret) if secret.is_empty() => {
                return Err(Error::Config(
                    "Cipher passphrase cannot be empty".to_string(),
                ));
            }
            _ => {}
        }

        if self.max_span_bytes == Some(0) {
            return Err(Error::Config(
                "Max span size must be greater than 0 bytes".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn upstream_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "UpstreamSource".to_string(),
        message: "UpstreamSource implementation is required to fetch uncached bytes. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestUpstreamSource. \
                 Embedded players: inject the host's range-capable data source."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_upstream() -> Result<Arc<dyn UpstreamSource>> {
    use bridge_desktop::ReqwestUpstreamSource;

    let upstream = ReqwestUpstreamSource::new().map_err(|e| Error::CapabilityMissing {
        capability: "UpstreamSource".to_string(),
        message: format!("Failed to create default ReqwestUpstreamSource: {}", e),
    })?;
    Ok(Arc::new(upstream))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_upstream() -> Result<Arc<dyn UpstreamSource>> {
    Err(upstream_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_cache_dir() -> Result<PathBuf> {
    Ok(bridge_desktop::default_cache_root())
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_cache_dir() -> Result<PathBuf> {
    Err(Error::Config(
        "Cache directory is required. Use .cache_dir() to set it.".to_string(),
    ))
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Use this builder to incrementally set configuration options and then
/// call [`build()`](CoreConfigBuilder::build) to create the final config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    cache_dir: Option<PathBuf>,
    cache_size_bytes: Option<u64>,
    cipher_secret: Option<CipherSecret>,
    block_on_cache: Option<bool>,
    max_span_bytes: Option<u64>,
    persist_index: Option<bool>,
    upstream: Option<Arc<dyn UpstreamSource>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the cache root directory.
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Sets the soft cache budget in bytes. Defaults to 100 MiB.
    pub fn cache_size_bytes(mut self, bytes: u64) -> Self {
        self.cache_size_bytes = Some(bytes);
        self
    }

    /// Uses exactly 32 bytes of key material.
    pub fn cipher_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.cipher_secret = Some(CipherSecret::Raw(key.into()));
        self
    }

    /// Derives the key from a host-held passphrase.
    pub fn cipher_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.cipher_secret = Some(CipherSecret::Passphrase(passphrase.into()));
        self
    }

    /// Enables or disables waiting on in-flight writes. Defaults to enabled.
    pub fn block_on_cache(mut self, enabled: bool) -> Self {
        self.block_on_cache = Some(enabled);
        self
    }

    /// Caps the size of a single span file.
    pub fn max_span_bytes(mut self, bytes: u64) -> Self {
        self.max_span_bytes = Some(bytes);
        self
    }

    /// Enables or disables index checkpoints. Defaults to enabled.
    pub fn persist_index(mut self, enabled: bool) -> Self {
        self.persist_index = Some(enabled);
        self
    }

    /// Sets the upstream source.
    pub fn upstream(mut self, upstream: Arc<dyn UpstreamSource>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Sets the clock used for access stamps.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the event bus buffer size.
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for missing or invalid settings and
    /// `Error::CapabilityMissing` when no upstream source is available.
    pub fn build(self) -> Result<CoreConfig> {
        let cipher_secret = self.cipher_secret.ok_or_else(|| {
            Error::Config(
                "Cipher secret is required. Use .cipher_key() or .cipher_passphrase() to set it."
                    .to_string(),
            )
        })?;

        let cache_dir = match self.cache_dir {
            Some(dir) => dir,
            None => provide_default_cache_dir()?,
        };

        let upstream = match self.upstream {
            Some(upstream) => upstream,
            None => provide_default_upstream()?,
        };

        let config = CoreConfig {
            cache_dir,
            cache_size_bytes: self.cache_size_bytes.unwrap_or(DEFAULT_CACHE_SIZE_BYTES),
            cipher_secret,
            block_on_cache: self.block_on_cache.unwrap_or(true),
            max_span_bytes: self.max_span_bytes,
            persist_index: self.persist_index.unwrap_or(true),
            upstream,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{error::Result as BridgeResult, ByteRange, UpstreamResponse};

    struct NullUpstream;

    #[async_trait]
    impl UpstreamSource for NullUpstream {
        async fn read(&self, _uri: &str, _range: ByteRange) -> BridgeResult<UpstreamResponse> {
            Ok(UpstreamResponse::empty(Some(0)))
        }

        fn name(&self) -> &str {
            "null"
        }
    }

    fn builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .cache_dir("/tmp/media-cache-test")
            .upstream(Arc::new(NullUpstream))
    }

    #[test]
    fn test_builder_defaults() {
        let config = builder().cipher_passphrase("host secret").build().unwrap();

        assert_eq!(config.cache_size_bytes, DEFAULT_CACHE_SIZE_BYTES);
        assert!(config.block_on_cache);
        assert!(config.persist_index);
        assert_eq!(config.max_span_bytes, None);
        assert_eq!(config.upstream.name(), "null");
    }

    #[test]
    fn test_builder_overrides() {
        let config = builder()
            .cipher_key(vec![7u8; 32])
            .cache_size_bytes(4096)
            .block_on_cache(false)
            .max_span_bytes(1024)
            .persist_index(false)
            .event_buffer_size(8)
            .build()
            .unwrap();

        assert_eq!(config.cache_size_bytes, 4096);
        assert!(!config.block_on_cache);
        assert_eq!(config.max_span_bytes, Some(1024));
        assert!(!config.persist_index);
        assert_eq!(config.event_buffer_size, 8);
    }

    #[test]
    fn test_missing_cipher_secret_fails() {
        let err = builder().build().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("Cipher secret")));
    }

    #[test]
    fn test_invalid_values_fail() {
        assert!(builder().cipher_key(vec![1u8; 16]).build().is_err());
        assert!(builder().cipher_passphrase("").build().is_err());
        assert!(builder()
            .cipher_passphrase("x")
            .cache_size_bytes(0)
            .build()
            .is_err());
        assert!(builder()
            .cipher_passphrase("x")
            .cache_size_bytes(MAX_CACHE_SIZE_BYTES + 1)
            .build()
            .is_err());
        assert!(builder()
            .cipher_passphrase("x")
            .max_span_bytes(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_secret_is_redacted_in_debug() {
        let config = builder().cipher_passphrase("hunter2").build().unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_upstream_is_capability_error() {
        let err = CoreConfig::builder()
            .cache_dir("/tmp/x")
            .cipher_passphrase("x")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::CapabilityMissing { capability, .. } if capability == "UpstreamSource"));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_defaults_are_injected() {
        let config = CoreConfig::builder()
            .cipher_passphrase("x")
            .build()
            .unwrap();
        assert_eq!(config.upstream.name(), "reqwest");
        assert!(config.cache_dir.ends_with("media-cache"));
    }
}
