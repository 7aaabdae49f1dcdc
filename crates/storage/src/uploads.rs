//! Upload-facing storage operations with bounded call times.

use crate::error::{StorageError, StorageResult};
use crate::layout::StorageLayout;
use crate::traits::{ByteStream, ObjectStore, StreamingUpload};
use bytes::Bytes;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Where a stored object ended up and how large it is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageRef {
    pub key: String,
    pub size: u64,
}

/// An object store paired with its key layout and a per-call timeout.
///
/// Every backend call is bounded by `timeout`; expiry surfaces as
/// [`StorageError::Timeout`], which callers treat as transient.
pub struct UploadStorage {
    store: Arc<dyn ObjectStore>,
    layout: StorageLayout,
    timeout: Duration,
}

impl UploadStorage {
    pub fn new(store: Arc<dyn ObjectStore>, layout: StorageLayout, timeout: Duration) -> Self {
        Self {
            store,
            layout,
            timeout,
        }
    }

    pub fn layout(&self) -> StorageLayout {
        self.layout
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        key: &str,
        call: impl Future<Output = StorageResult<T>>,
    ) -> StorageResult<T> {
        bounded(self.timeout, operation, key, call).await
    }

    /// Write a whole object. Rewriting a key with the same bytes is harmless.
    #[instrument(skip(self, data), fields(backend = self.backend_name(), size = data.len()))]
    pub async fn store(&self, key: &str, data: Bytes) -> StorageResult<StorageRef> {
        let size = data.len() as u64;
        self.bounded("put", key, self.store.put(key, data)).await?;
        debug!(key, size, "Stored object");
        Ok(StorageRef {
            key: key.to_string(),
            size,
        })
    }

    /// Read a whole object.
    #[instrument(skip(self), fields(backend = self.backend_name()))]
    pub async fn retrieve(&self, key: &str) -> StorageResult<Bytes> {
        self.bounded("get", key, self.store.get(key)).await
    }

    /// Read an object as a stream; every pull is bounded separately.
    #[instrument(skip(self), fields(backend = self.backend_name()))]
    pub async fn retrieve_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let mut inner = self
            .bounded("get_stream", key, self.store.get_stream(key))
            .await?;
        let timeout = self.timeout;
        let key = key.to_string();

        let stream = async_stream::try_stream! {
            loop {
                match tokio::time::timeout(timeout, inner.next()).await {
                    Ok(Some(block)) => yield block?,
                    Ok(None) => break,
                    Err(_) => Err(StorageError::Timeout {
                        operation: "read",
                        key: key.clone(),
                        timeout,
                    })?,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    /// Start a streaming write to `key`.
    #[instrument(skip(self), fields(backend = self.backend_name()))]
    pub async fn open_upload(&self, key: &str) -> StorageResult<TimedUpload> {
        let inner = self
            .bounded("put_stream", key, self.store.put_stream(key))
            .await?;
        Ok(TimedUpload {
            inner,
            key: key.to_string(),
            timeout: self.timeout,
        })
    }

    /// Best-effort removal of objects written for an abandoned upload.
    ///
    /// Failures are logged and skipped. Returns how many keys are gone.
    #[instrument(skip(self, keys), fields(backend = self.backend_name(), count = keys.len()))]
    pub async fn discard(&self, keys: &[String]) -> usize {
        let mut removed = 0;
        for key in keys {
            match self.bounded("delete", key, self.store.delete(key)).await {
                Ok(()) | Err(StorageError::NotFound(_)) => removed += 1,
                Err(e) => warn!(key = %key, error = %e, "Failed to remove orphaned object"),
            }
        }
        removed
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        self.bounded("health_check", "", self.store.health_check())
            .await
    }
}

async fn bounded<T>(
    timeout: Duration,
    operation: &'static str,
    key: &str,
    call: impl Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, key, timeout_secs = timeout.as_secs_f64(), "Storage call timed out");
            Err(StorageError::Timeout {
                operation,
                key: key.to_string(),
                timeout,
            })
        }
    }
}

/// A streaming write whose individual calls are bounded by a timeout.
pub struct TimedUpload {
    inner: Box<dyn StreamingUpload>,
    key: String,
    timeout: Duration,
}

impl TimedUpload {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        bounded(self.timeout, "write", &self.key, self.inner.write(data)).await
    }

    /// Commit the object and report its final size.
    pub async fn finish(self) -> StorageResult<StorageRef> {
        let Self {
            inner,
            key,
            timeout,
        } = self;
        let size = bounded(timeout, "finish", &key, inner.finish()).await?;
        Ok(StorageRef { key, size })
    }

    /// Discard the partial object; failures are only logged.
    pub async fn abort(self) {
        let Self {
            inner,
            key,
            timeout,
        } = self;
        if let Err(e) = bounded(timeout, "abort", &key, inner.abort()).await {
            warn!(key = %key, error = %e, "Failed to abort streaming upload");
        }
    }
}
