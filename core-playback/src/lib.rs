//! # Media Cache Pipeline
//!
//! Encrypted, range-addressable caching between a media player and the
//! origin of its bytes.
//!
//! ## Overview
//!
//! This crate handles:
//! - Span storage: encrypted byte ranges on disk with an LRU-evicted budget
//! - A read-through data source that tees upstream fetches into the cache
//! - Waiting on in-flight writes so each byte is fetched once
//! - A playback queue read as one continuous stream

pub mod cache;
pub mod datasource;
pub mod error;
pub mod queue;
pub mod types;

pub use cache::{CacheConfig, CacheStats, CacheStore, DataSourceStats, EncryptionKey};
pub use datasource::{CachingDataSource, SourceState};
pub use error::{PlaybackError, Result};
pub use queue::{PlaybackQueue, QueueItem, QueueReader};
pub use types::{DataSpec, ResourceKey};
