//! # Cache Pipeline Error Types
//!
//! Error types for span storage, encryption, and cached reads.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur in the cache pipeline.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Upstream Errors
    // ========================================================================
    /// Upstream read failed; the caller may retry the read.
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream rejected the request (4xx other than 416).
    #[error("Upstream rejected request: {0}")]
    UpstreamRejected(String),

    // ========================================================================
    // Cache Errors
    // ========================================================================
    /// Span ciphertext failed authentication, was truncated, or has a bad header.
    #[error("Cipher error: {0}")]
    Cipher(String),

    /// Reading or writing span storage failed.
    #[error("Cache I/O error: {0}")]
    CacheIo(String),

    /// Reclaim could not bring the cache under its budget.
    ///
    /// Soft: reported and logged, never returned from a read.
    #[error("Cache over capacity: {total_bytes} bytes held, budget {capacity_bytes}")]
    CapacityExceeded {
        total_bytes: u64,
        capacity_bytes: u64,
    },

    /// Requested bytes are not present in the cache.
    #[error("Range not cached: {0}")]
    NotCached(String),

    // ========================================================================
    // Usage Errors
    // ========================================================================
    /// Range lies outside the resource or is malformed.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Operation is not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The queue has already been prepared.
    #[error("Queue already prepared")]
    AlreadyPrepared,

    /// The queue must be prepared before it is read.
    #[error("Queue not prepared")]
    NotPrepared,

    /// A read was interrupted through its cancellation token.
    #[error("Read cancelled")]
    Cancelled,

    /// The cache store has been closed.
    #[error("Cache store closed")]
    Closed,

    /// Cache configuration is invalid.
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlaybackError::Network(_))
    }

    /// Returns `true` if this error is due to network issues.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::Network(_) | PlaybackError::UpstreamRejected(_)
        )
    }

    /// Returns `true` if the cached copy is unusable and upstream can replace it.
    pub fn is_cache_error(&self) -> bool {
        matches!(self, PlaybackError::Cipher(_) | PlaybackError::CacheIo(_))
    }
}

impl From<std::io::Error> for PlaybackError {
    fn from(err: std::io::Error) -> Self {
        PlaybackError::CacheIo(err.to_string())
    }
}

impl From<BridgeError> for PlaybackError {
    fn from(err: BridgeError) -> Self {
        if err.is_retryable() {
            PlaybackError::Network(err.to_string())
        } else {
            match err {
                BridgeError::Http { .. } => PlaybackError::UpstreamRejected(err.to_string()),
                other => PlaybackError::Network(other.to_string()),
            }
        }
    }
}

/// Result type for cache pipeline operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_errors_map_to_network() {
        let err: PlaybackError = BridgeError::Network("reset".into()).into();
        assert!(err.is_transient());

        let err: PlaybackError = BridgeError::Http {
            status: 503,
            uri: "u".into(),
        }
        .into();
        assert!(err.is_transient());

        let err: PlaybackError = BridgeError::Http {
            status: 404,
            uri: "u".into(),
        }
        .into();
        assert!(!err.is_transient());
        assert!(err.is_network_error());
    }

    #[test]
    fn test_cache_error_classification() {
        assert!(PlaybackError::Cipher("tag".into()).is_cache_error());
        assert!(PlaybackError::from(std::io::Error::other("disk")).is_cache_error());
        assert!(!PlaybackError::Network("x".into()).is_cache_error());
        assert!(!PlaybackError::CapacityExceeded {
            total_bytes: 2,
            capacity_bytes: 1
        }
        .is_cache_error());
    }
}
