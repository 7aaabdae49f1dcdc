//! In-memory storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::instrument;

/// Process-local object store backed by a concurrent map.
///
/// Used for tests and for development configurations (`type = "memory"`).
#[derive(Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<DashMap<String, Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.contains_key(key))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let data = self.get(key).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    #[instrument(skip(self, data), fields(backend = "memory", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Ok(Box::new(MemoryUpload {
            objects: Arc::clone(&self.objects),
            key: key.to_string(),
            buffer: BytesMut::new(),
        }))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryUpload {
    objects: Arc<DashMap<String, Bytes>>,
    key: String,
    buffer: BytesMut,
}

#[async_trait]
impl StreamingUpload for MemoryUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let len = self.buffer.len() as u64;
        self.objects.insert(self.key, self.buffer.freeze());
        Ok(len)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let backend = MemoryBackend::new();
        backend.put("metadata/a.json", Bytes::from_static(b"{}")).await.unwrap();

        assert!(backend.exists("metadata/a.json").await.unwrap());
        assert_eq!(backend.get("metadata/a.json").await.unwrap(), Bytes::from_static(b"{}"));

        backend.delete("metadata/a.json").await.unwrap();
        assert!(backend.is_empty());
        assert!(matches!(
            backend.delete("metadata/a.json").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_streaming_upload_commits_on_finish() {
        let backend = MemoryBackend::new();
        let mut upload = backend.put_stream("uploads/x").await.unwrap();
        upload.write(Bytes::from_static(b"ab")).await.unwrap();
        upload.write(Bytes::from_static(b"c")).await.unwrap();
        assert!(!backend.exists("uploads/x").await.unwrap());

        assert_eq!(upload.finish().await.unwrap(), 3);
        assert_eq!(backend.get("uploads/x").await.unwrap(), Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn test_clones_share_contents() {
        let backend = MemoryBackend::new();
        let view = backend.clone();
        backend.put("k", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(view.keys(), vec!["k".to_string()]);
    }
}
