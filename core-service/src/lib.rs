//! Core service façade and bootstrap helpers.
//!
//! This crate wires a validated [`CoreConfig`] into a running cache pipeline:
//! the encrypted span store, the event bus, the upstream source and the
//! playback queue. Hosts bootstrap one [`CoreService`] explicitly and shut it
//! down explicitly; nothing is created lazily behind their back.
//!
//! Desktop apps typically enable the `desktop-shims` feature, which lets
//! [`CoreConfig::builder`] fall back to the reqwest-based upstream source and
//! the platform cache directory.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::CoreService;
//!
//! let config = CoreConfig::builder()
//!     .cipher_passphrase(host_secret)
//!     .build()?;
//! let core = CoreService::bootstrap(config).await?;
//! core.add_media_sources(["https://cdn.example.com/a.mp3"], true)?;
//!
//! let mut reader = core.reader();
//! while let Some((index, chunk)) = reader.next_chunk().await? {
//!     player.feed(index, &chunk);
//! }
//! core.shutdown().await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::UpstreamSource;
use core_playback::cache::{CacheConfig, CacheStats, CacheStore, StoreOptions};
use core_playback::{CachingDataSource, PlaybackQueue, QueueReader};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventStream};
use tracing::{info, instrument};

/// Primary façade exposed to host applications.
///
/// Cloning is cheap; clones share the same store, queue and event bus.
#[derive(Clone)]
pub struct CoreService {
    store: Arc<CacheStore>,
    queue: Arc<PlaybackQueue>,
    upstream: Arc<dyn UpstreamSource>,
    event_bus: EventBus,
}

impl std::fmt::Debug for CoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreService")
            .field("store", &self.store)
            .field("queue_len", &self.queue.len())
            .field("upstream", &self.upstream.name())
            .finish()
    }
}

impl CoreService {
    /// Open the cache described by `config` and build the playback queue.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The configuration fails validation
    /// - The cipher secret cannot be turned into a key
    /// - The cache directory cannot be created or scanned
    #[instrument(skip(config))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let cache_config = CacheConfig::from_core(&config)
            .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
        let event_bus = EventBus::new(config.event_buffer_size);

        let store = CacheStore::open_with_options(
            cache_config,
            StoreOptions {
                event_bus: Some(event_bus.clone()),
                clock: Arc::clone(&config.clock),
            },
        )
        .await?;
        let queue = Arc::new(PlaybackQueue::new().with_event_bus(event_bus.clone()));

        info!(
            upstream = config.upstream.name(),
            capacity_bytes = config.cache_size_bytes,
            "Core service started"
        );

        Ok(Self {
            store,
            queue,
            upstream: config.upstream,
            event_bus,
        })
    }

    /// The span store backing every data source of this service.
    pub fn store(&self) -> Arc<CacheStore> {
        Arc::clone(&self.store)
    }

    pub fn queue(&self) -> Arc<PlaybackQueue> {
        Arc::clone(&self.queue)
    }

    /// New read-through source over the shared store and upstream.
    pub fn data_source(&self) -> CachingDataSource {
        CachingDataSource::new(Arc::clone(&self.store), Arc::clone(&self.upstream))
    }

    /// Append one queue item per URL, optionally preparing the queue.
    ///
    /// Returns the new queue length.
    pub fn add_media_sources<I, S>(&self, urls: I, prepare: bool) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let len = self.queue.append_uris(urls);
        if prepare {
            self.queue.prepare()?;
        }
        Ok(len)
    }

    pub fn prepare(&self) -> Result<()> {
        Ok(self.queue.prepare()?)
    }

    /// Continuous reader over the queue with its own data source.
    pub fn reader(&self) -> QueueReader {
        self.queue.reader(self.data_source())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn event_bus(&self) -> EventBus {
        self.event_bus.clone()
    }

    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    /// Checkpoint and close the store. Data sources still holding the store
    /// fail with `Closed` afterwards.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        self.store.close().await?;
        info!("Core service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{BridgeError, ByteRange, UpstreamResponse};
    use core_runtime::events::{CacheEvent, CoreEvent, QueueEvent};
    use mockall::mock;

    mock! {
        pub Origin {}

        #[async_trait]
        impl UpstreamSource for Origin {
            async fn read(&self, uri: &str, range: ByteRange) -> BridgeResult<UpstreamResponse>;
        }
    }

    fn temp_root() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("core-service-test-{}", uuid::Uuid::new_v4()))
    }

    fn config(upstream: MockOrigin) -> CoreConfig {
        CoreConfig::builder()
            .cache_dir(temp_root())
            .cipher_passphrase("test secret")
            .upstream(Arc::new(upstream))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_and_shutdown() {
        let core = CoreService::bootstrap(config(MockOrigin::new())).await.unwrap();
        let stats = core.cache_stats();
        assert_eq!(stats.span_count, 0);
        assert_eq!(stats.capacity_bytes, 100 * 1024 * 1024);

        core.shutdown().await.unwrap();
        assert!(core.store().is_closed());
        // Shutting down twice is harmless.
        core.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_add_media_sources_prepares_once() {
        let core = CoreService::bootstrap(config(MockOrigin::new())).await.unwrap();
        let mut events = core.subscribe_events();

        assert_eq!(core.add_media_sources(["a", "b"], false).unwrap(), 2);
        assert_eq!(core.add_media_sources(["c"], true).unwrap(), 3);
        assert!(matches!(
            core.prepare(),
            Err(CoreError::Playback(core_playback::PlaybackError::AlreadyPrepared))
        ));

        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Queue(QueueEvent::ItemsAppended {
                first_index: 0,
                count: 2
            })
        );
    }

    #[tokio::test]
    async fn test_reader_surfaces_upstream_rejection() {
        let mut origin = MockOrigin::new();
        origin.expect_read().returning(|uri, _| {
            Err(BridgeError::Http {
                status: 404,
                uri: uri.to_string(),
            })
        });
        let core = CoreService::bootstrap(config(origin)).await.unwrap();
        let mut events = core
            .subscribe_events()
            .filter(|event| matches!(event, CoreEvent::Cache(CacheEvent::FetchFailed { .. })));

        core.add_media_sources(["https://cdn.example.com/missing.mp3"], true)
            .unwrap();
        let mut reader = core.reader();
        assert!(matches!(
            reader.next_chunk().await,
            Err(core_playback::PlaybackError::UpstreamRejected(_))
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Cache(CacheEvent::FetchFailed {
                retryable: false,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_invalid_secret_fails_bootstrap() {
        let mut config = config(MockOrigin::new());
        config.cipher_secret = core_runtime::config::CipherSecret::Raw(vec![1, 2, 3]);
        assert!(matches!(
            CoreService::bootstrap(config).await,
            Err(CoreError::Runtime(core_runtime::Error::Config(_)))
        ));
    }
}
