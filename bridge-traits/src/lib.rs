//! # Host Bridge Traits
//!
//! Platform abstraction traits that the media cache core depends on but does
//! not implement itself.
//!
//! ## Traits
//!
//! ### Networking
//! - [`UpstreamSource`](upstream::UpstreamSource) - Range-capable origin for media bytes
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic span access stamps
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Upstream |
//! |----------|---------------------|----------|
//! | Desktop  | `bridge-desktop`    | `ReqwestUpstreamSource` (HTTP range requests) |
//! | Embedded players | host supplied | any [`UpstreamSource`] |
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with a descriptive error when a required capability is
//! missing:
//!
//! ```ignore
//! let upstream = config.upstream
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "UpstreamSource".to_string(),
//!         message: "No upstream source provided. \
//!                  Desktop: enable the desktop-shims feature. \
//!                  Embedded: inject a host adapter.".to_string()
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert transport errors into it and keep retryable failures
//! (`Network`, 5xx, 429) distinguishable through
//! [`BridgeError::is_retryable`](error::BridgeError::is_retryable).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single adapter can serve every
//! concurrent data source.

pub mod error;
pub mod time;
pub mod upstream;

pub use error::BridgeError;

pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
pub use upstream::{ByteRange, ByteStream, RetryPolicy, UpstreamResponse, UpstreamSource};
