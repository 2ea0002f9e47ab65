//! # Span Cache Module
//!
//! Encrypted, range-addressable storage for media bytes.
//!
//! ## Overview
//!
//! Resources are cached as *spans*: contiguous byte ranges written once and
//! never modified. A resource may be covered by many spans with gaps between
//! them. Key features:
//! - AES-256-GCM in fixed-size frames, so any sub-range decrypts on its own
//! - In-memory index with leases (readers) and claims (in-flight writers)
//! - LRU eviction under a soft byte budget, never touching leased spans
//! - JSON checkpoint of the index, restored on open
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     CacheStore                         │
//! │  - write() -> SpanWriter               │
//! │  - read_span() -> SpanReader           │
//! │  - read() / reclaim() / checkpoint()   │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> CacheIndex (spans, leases, claims, recency)
//!          ├──> LruEvictor (frees unlocked spans)
//!          ├──> CipherCodec (framed AES-GCM)
//!          └──> SpanLayout (files under the cache root)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::cache::{CacheConfig, CacheStore, EncryptionKey};
//! use core_playback::ResourceKey;
//! use bridge_traits::ByteRange;
//!
//! # async fn example() -> core_playback::Result<()> {
//! let config = CacheConfig::new("/tmp/media-cache", EncryptionKey::generate());
//! let store = CacheStore::open(config).await?;
//!
//! let key = ResourceKey::new("https://cdn.example.com/track.mp3");
//! let mut writer = store.write(&key, 0).await?;
//! writer.write(b"first bytes").await?;
//! writer.finish().await?;
//!
//! let bytes = store.read(&key, ByteRange::new(0, 5)).await?;
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod encryption;
pub mod evictor;
pub mod index;
pub mod layout;
pub mod stats;
pub mod store;

// Re-export commonly used types
pub use config::CacheConfig;
pub use encryption::{CipherCodec, EncryptionKey};
pub use evictor::{LruEvictor, ReclaimOutcome};
pub use index::{CacheIndex, Resolution, Segment, Span, SpanId, SpanLease, WriteClaim};
pub use stats::{CacheStats, DataSourceStats};
pub use store::{CacheStore, SpanReader, SpanWriter, StoreOptions};
