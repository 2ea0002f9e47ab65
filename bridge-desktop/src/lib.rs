//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `UpstreamSource` using `reqwest` HTTP range requests
//! - Platform cache directory lookup using `dirs`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{default_cache_root, ReqwestUpstreamSource};
//! use bridge_traits::{ByteRange, UpstreamSource};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let upstream = ReqwestUpstreamSource::new()?;
//!     let response = upstream
//!         .read("https://cdn.example.com/track.mp3", ByteRange::new(0, 4096))
//!         .await?;
//!     println!("total length: {:?}", response.total_length);
//!     println!("cache root: {}", default_cache_root().display());
//!     Ok(())
//! }
//! ```

mod http;
mod paths;

pub use http::ReqwestUpstreamSource;
pub use paths::default_cache_root;
