//! Object storage abstraction, key layouts and the manifest registry for chunkd.
//!
//! This crate provides:
//! - The `ObjectStore` trait with filesystem, S3-compatible and in-memory backends
//! - `StorageLayout`, mapping uploads and chunks to object keys
//! - `UploadStorage`, which bounds every backend call with a timeout
//! - `ManifestRegistry`, the upload id to manifest map with durable fallback

pub mod backends;
pub mod error;
pub mod layout;
pub mod registry;
#[cfg(feature = "test-util")]
pub mod testing;
pub mod traits;
pub mod uploads;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use layout::{IngestMode, StorageLayout};
pub use registry::{LookupSource, ManifestRegistry, RegistryError};
pub use traits::{ByteStream, ObjectStore, StreamingUpload};
pub use uploads::{StorageRef, TimedUpload, UploadStorage};

use chunkd_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config
        .validate()
        .map_err(|e| StorageError::Config(e.to_string()))?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3(s3) => {
            let backend = S3Backend::new(s3).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}
