//! Platform cache directory resolution

use std::path::PathBuf;

const APP_DIR: &str = "media-cache";

/// Default root for the encrypted span cache.
///
/// Uses the platform cache directory (`~/.cache` on Linux, `~/Library/Caches`
/// on macOS, `%LOCALAPPDATA%` on Windows) and falls back to the system temp
/// directory when the platform reports none.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}
