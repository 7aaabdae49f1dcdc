//! Object store traits.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A stream of bytes from storage.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Object storage trait for raw upload, chunk and manifest bytes.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's contents.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Put an object, replacing any previous contents.
    ///
    /// Writing the same bytes to the same key twice leaves the object intact.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Start a streaming upload.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Get the backend name for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called during server startup so that a misconfigured backend fails
    /// before requests are accepted. The default implementation returns
    /// `Ok(())`.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Trait for streaming uploads.
///
/// Nothing becomes visible under the target key until `finish` succeeds.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
