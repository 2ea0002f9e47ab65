//! # media-cache
//!
//! Umbrella crate for the encrypted media cache workspace.
//!
//! The cache pipeline itself lives in `core-playback` and is always
//! re-exported as [`playback`]. The `desktop-shims` feature (on by default)
//! adds the [`CoreService`] façade wired to the reqwest upstream source and
//! the platform cache directory; `service` adds the façade without them.

pub use core_playback as playback;

#[cfg(any(feature = "desktop-shims", feature = "service"))]
pub use core_service::{CoreError, CoreService};
