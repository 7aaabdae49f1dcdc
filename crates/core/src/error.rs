//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid upload id: {0}")]
    InvalidUploadId(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("manifest integrity error: {0}")]
    ManifestIntegrity(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
