//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported platform: {0}")]
    InvalidPlatform(String),

    #[error("invalid bundle key: {0}")]
    InvalidBundleKey(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
