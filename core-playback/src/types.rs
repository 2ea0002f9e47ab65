//! Shared identifiers for cached resources.

use bridge_traits::ByteRange;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable identifier of a media resource.
///
/// Every cache lookup goes through the key, so two URIs that serve the same
/// bytes (e.g. re-signed CDN links) should map to one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key derived from the source URI, ignoring the query string.
    pub fn from_uri(uri: &str) -> Self {
        let end = uri.find(|c| c == '?' || c == '#').unwrap_or(uri.len());
        Self(uri[..end].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe name for the key's span directory.
    pub fn storage_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A read request handed to the caching data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSpec {
    /// Where uncached bytes are fetched from.
    pub uri: String,
    /// Cache identity of the resource.
    pub key: ResourceKey,
    /// Bytes to read.
    pub range: ByteRange,
}

impl DataSpec {
    /// Whole-resource read keyed by the URI.
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            key: ResourceKey::from_uri(&uri),
            uri,
            range: ByteRange::full(),
        }
    }

    pub fn with_key(mut self, key: impl Into<ResourceKey>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = range;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_uri_drops_query() {
        let a = ResourceKey::from_uri("https://cdn.example.com/t.mp3?sig=1");
        let b = ResourceKey::from_uri("https://cdn.example.com/t.mp3?sig=2");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "https://cdn.example.com/t.mp3");
    }

    #[test]
    fn test_storage_name_is_hex_digest() {
        let name = ResourceKey::new("track-1").storage_name();
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(name, ResourceKey::new("track-2").storage_name());
    }

    #[test]
    fn test_data_spec_builder() {
        let spec = DataSpec::new("https://cdn.example.com/a.mp3")
            .with_key("a")
            .with_range(ByteRange::new(10, 20));
        assert_eq!(spec.key.as_str(), "a");
        assert_eq!(spec.range.end(), Some(30));
    }
}
