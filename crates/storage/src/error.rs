//! Storage error types.

use std::time::Duration;
use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("storage {operation} timed out after {}s: {key}", timeout.as_secs())]
    Timeout {
        operation: &'static str,
        key: String,
        timeout: Duration,
    },

    #[error("size mismatch for {key}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether the backend ran out of space or refused the object size.
    ///
    /// Retrying the same upload will not succeed.
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            Self::QuotaExceeded(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::StorageFull | std::io::ErrorKind::QuotaExceeded
            ),
            _ => false,
        }
    }

    /// Whether the failure is likely to go away if the caller retries.
    ///
    /// Local I/O errors count only when they describe an interrupted or
    /// unreachable resource; a wrong path or missing permission is permanent.
    pub fn is_transient(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            Self::Timeout { .. } | Self::S3(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
                    | ErrorKind::TimedOut
                    | ErrorKind::Interrupted
                    | ErrorKind::WouldBlock
                    | ErrorKind::ResourceBusy
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
