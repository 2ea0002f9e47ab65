use thiserror::Error;

/// Runtime-level failures raised while wiring the cache core together.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required bridge implementation was not provided.
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    /// Unexpected failure inside the runtime.
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
