//! Upload ingestion: size check, split, store, register.
//!
//! One call to [`Ingestor::ingest`] handles one upload. It either registers a
//! complete manifest or fails without registering anything. Objects written
//! before a failure are removed best-effort when cleanup is enabled.

use bytes::{Bytes, BytesMut};
use chunkd_core::{ChunkDescriptor, ChunkPlan, ChunkSpan, Manifest, SizePolicy, UploadId};
use chunkd_storage::{
    ByteStream, IngestMode, ManifestRegistry, RegistryError, StorageError, StorageRef,
    TimedUpload, UploadStorage,
};
use futures::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Body of an upload as handed over by the transport layer.
pub type SourceStream<'a> = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'a>>;

/// Ingestion failures.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid filename: {0}")]
    InvalidFilename(chunkd_core::Error),

    #[error("failed to read upload body: {0}")]
    Source(io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("manifest rejected: {0}")]
    Manifest(chunkd_core::Error),
}

impl IngestError {
    /// Short label used for failure metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidFilename(_) => "invalid_filename",
            Self::Source(_) => "source",
            Self::Storage(e) | Self::Registry(RegistryError::Storage(e)) => {
                if e.is_quota_exceeded() {
                    "storage_quota"
                } else if e.is_transient() {
                    "storage_unavailable"
                } else {
                    "storage"
                }
            }
            Self::Registry(_) => "registry",
            Self::Manifest(_) => "manifest",
        }
    }
}

/// Runs uploads through the size policy, the store and the registry.
pub struct Ingestor {
    policy: SizePolicy,
    storage: Arc<UploadStorage>,
    registry: Arc<ManifestRegistry>,
    cleanup_on_failure: bool,
}

impl Ingestor {
    pub fn new(
        policy: SizePolicy,
        storage: Arc<UploadStorage>,
        registry: Arc<ManifestRegistry>,
        cleanup_on_failure: bool,
    ) -> Self {
        Self {
            policy,
            storage,
            registry,
            cleanup_on_failure,
        }
    }

    /// Ingest one upload and return its registered manifest.
    ///
    /// `filename` is the client-supplied name; it is sanitized before it
    /// reaches any object key or chunk name.
    #[instrument(skip(self, body), fields(upload_id = tracing::field::Empty))]
    pub async fn ingest(
        &self,
        filename: &str,
        body: SourceStream<'_>,
    ) -> Result<Arc<Manifest>, IngestError> {
        let filename =
            chunkd_core::sanitize_filename(filename).map_err(IngestError::InvalidFilename)?;
        let upload_id = UploadId::new();
        tracing::Span::current().record("upload_id", tracing::field::display(&upload_id));

        let mut written = Vec::new();
        let outcome = match self.storage.layout().ingest_mode() {
            IngestMode::Streaming => {
                self.ingest_streaming(&upload_id, &filename, body, &mut written)
                    .await
            }
            IngestMode::Buffered => {
                self.ingest_buffered(&upload_id, &filename, body, &mut written)
                    .await
            }
        };

        let result = match outcome {
            Ok(manifest) => {
                if let Some(key) = self.storage.layout().manifest_key(&upload_id) {
                    written.push(key);
                }
                self.registry.register(manifest).await.map_err(Into::into)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(manifest) => {
                info!(
                    filename = %filename,
                    size = manifest.original_size(),
                    chunks = manifest.chunks().len(),
                    "Upload ingested"
                );
                Ok(manifest)
            }
            Err(e) => {
                warn!(error = %e, written = written.len(), "Upload failed");
                self.abandon(&written).await;
                Err(e)
            }
        }
    }

    /// Local layout: spool the body to the original key as it arrives, then
    /// re-read it to cut chunks. Memory use is bounded by the block size.
    async fn ingest_streaming(
        &self,
        upload_id: &UploadId,
        filename: &str,
        mut body: SourceStream<'_>,
        written: &mut Vec<String>,
    ) -> Result<Manifest, IngestError> {
        let original_key = self.storage.layout().original_key(upload_id, filename);
        let mut upload = self.storage.open_upload(&original_key).await?;
        written.push(original_key.clone());

        let mut received: u64 = 0;
        while let Some(block) = body.next().await {
            let block = match block {
                Ok(block) => block,
                Err(e) => {
                    upload.abort().await;
                    return Err(IngestError::Source(e));
                }
            };
            received += block.len() as u64;
            if let Err(e) = upload.write(block).await {
                upload.abort().await;
                return Err(e.into());
            }
        }
        let original = upload.finish().await?;
        check_size(&original, received)?;
        debug!(key = %original.key, size = original.size, "Spooled original upload");

        let Some(plan) = ChunkPlan::new(&self.policy, received) else {
            return Ok(Manifest::unchunked(
                *upload_id,
                filename.to_string(),
                received,
            ));
        };

        let mut source = self.storage.retrieve_stream(&original_key).await?;
        let mut pending = Bytes::new();
        let mut chunks = Vec::with_capacity(plan.count() as usize);
        for span in plan.spans() {
            let chunk_key = self.chunk_key(upload_id, filename, &span);
            let mut upload = self.storage.open_upload(&chunk_key).await?;
            written.push(chunk_key);

            if let Err(e) = copy_span(&mut source, &mut pending, &span, &mut upload).await {
                upload.abort().await;
                return Err(e.into());
            }
            let stored = upload.finish().await?;
            check_size(&stored, span.len)?;
            chunks.push(descriptor(&span, filename, stored));
        }

        Manifest::chunked(*upload_id, filename.to_string(), received, chunks)
            .map_err(IngestError::Manifest)
    }

    /// Remote layout: hold the payload in memory and issue one write per
    /// object. The original is only stored when it is not split.
    async fn ingest_buffered(
        &self,
        upload_id: &UploadId,
        filename: &str,
        mut body: SourceStream<'_>,
        written: &mut Vec<String>,
    ) -> Result<Manifest, IngestError> {
        let mut buffer = BytesMut::new();
        while let Some(block) = body.next().await {
            buffer.extend_from_slice(&block.map_err(IngestError::Source)?);
        }
        let payload = buffer.freeze();
        let size = payload.len() as u64;

        let Some(plan) = ChunkPlan::new(&self.policy, size) else {
            let original_key = self.storage.layout().original_key(upload_id, filename);
            written.push(original_key.clone());
            self.storage.store(&original_key, payload).await?;
            return Ok(Manifest::unchunked(*upload_id, filename.to_string(), size));
        };

        let mut chunks = Vec::with_capacity(plan.count() as usize);
        for span in plan.spans() {
            let chunk_key = self.chunk_key(upload_id, filename, &span);
            written.push(chunk_key.clone());
            let stored = self
                .storage
                .store(&chunk_key, payload.slice(span.byte_range()))
                .await?;
            chunks.push(descriptor(&span, filename, stored));
        }

        Manifest::chunked(*upload_id, filename.to_string(), size, chunks)
            .map_err(IngestError::Manifest)
    }

    fn chunk_key(&self, upload_id: &UploadId, filename: &str, span: &ChunkSpan) -> String {
        self.storage
            .layout()
            .chunk_key(upload_id, &span.name(filename))
    }

    async fn abandon(&self, written: &[String]) {
        if written.is_empty() {
            return;
        }
        if !self.cleanup_on_failure {
            warn!(
                orphaned = written.len(),
                "Leaving objects of failed upload in place"
            );
            return;
        }
        let removed = self.storage.discard(written).await;
        if removed < written.len() {
            warn!(
                removed,
                orphaned = written.len() - removed,
                "Some objects of failed upload could not be removed"
            );
        } else {
            debug!(removed, "Removed objects of failed upload");
        }
    }
}

fn descriptor(span: &ChunkSpan, filename: &str, stored: StorageRef) -> ChunkDescriptor {
    ChunkDescriptor {
        chunk_number: span.number,
        chunk_filename: span.name(filename),
        chunk_path: stored.key,
        chunk_size: stored.size,
    }
}

fn check_size(stored: &StorageRef, expected: u64) -> Result<(), StorageError> {
    if stored.size != expected {
        return Err(StorageError::SizeMismatch {
            key: stored.key.clone(),
            expected,
            actual: stored.size,
        });
    }
    Ok(())
}

/// Move exactly `span.len` bytes from `source` into `upload`.
///
/// `pending` carries the unread tail of the last block across spans.
async fn copy_span(
    source: &mut ByteStream,
    pending: &mut Bytes,
    span: &ChunkSpan,
    upload: &mut TimedUpload,
) -> Result<(), StorageError> {
    let mut remaining = span.len;
    while remaining > 0 {
        if pending.is_empty() {
            match source.next().await {
                Some(block) => *pending = block?,
                None => {
                    return Err(StorageError::SizeMismatch {
                        key: upload.key().to_string(),
                        expected: span.len,
                        actual: span.len - remaining,
                    });
                }
            }
            continue;
        }
        let take = remaining.min(pending.len() as u64) as usize;
        upload.write(pending.split_to(take)).await?;
        remaining -= take as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkd_storage::{MemoryBackend, ObjectStore, StorageLayout};
    use futures::stream;
    use std::time::Duration;

    const FILENAME: &str = "lecture.mp3";

    fn ingestor(layout: StorageLayout, backend: &MemoryBackend, max_chunk: u64) -> Ingestor {
        let storage = Arc::new(UploadStorage::new(
            Arc::new(backend.clone()),
            layout,
            Duration::from_secs(5),
        ));
        let registry = Arc::new(ManifestRegistry::new(Arc::clone(&storage)));
        Ingestor::new(SizePolicy::new(max_chunk).unwrap(), storage, registry, true)
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    /// Body split into uneven blocks so chunk boundaries fall mid-block.
    fn body(data: &[u8], block: usize) -> SourceStream<'static> {
        let blocks: Vec<io::Result<Bytes>> = data
            .chunks(block.max(1))
            .map(|b| Ok(Bytes::copy_from_slice(b)))
            .collect();
        Box::pin(stream::iter(blocks))
    }

    async fn reassemble(backend: &MemoryBackend, manifest: &Manifest) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in manifest.chunks() {
            out.extend_from_slice(&backend.get(&chunk.chunk_path).await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_buffered_split_reassembles() {
        let backend = MemoryBackend::new();
        let ingestor = ingestor(StorageLayout::Remote, &backend, 10);
        let data = payload(25);

        let manifest = ingestor.ingest(FILENAME, body(&data, 7)).await.unwrap();
        assert!(manifest.is_chunked());
        let sizes: Vec<u64> = manifest.chunks().iter().map(|c| c.chunk_size).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(reassemble(&backend, &manifest).await, data);
        assert_eq!(
            manifest.chunks()[2].chunk_filename,
            "chunk_3_of_3_lecture.mp3"
        );
    }

    #[tokio::test]
    async fn test_streaming_split_reassembles() {
        let backend = MemoryBackend::new();
        let ingestor = ingestor(StorageLayout::Local, &backend, 10);
        let data = payload(31);

        let manifest = ingestor.ingest(FILENAME, body(&data, 4)).await.unwrap();
        assert_eq!(manifest.chunks().len(), 4);
        assert_eq!(reassemble(&backend, &manifest).await, data);

        let id = manifest.file_id();
        let original = backend
            .get(&format!("uploads/{id}_{FILENAME}"))
            .await
            .unwrap();
        assert_eq!(original.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_layouts_agree_on_manifest_shape() {
        let data = payload(23);
        let local = ingestor(StorageLayout::Local, &MemoryBackend::new(), 8)
            .ingest(FILENAME, body(&data, 5))
            .await
            .unwrap();
        let remote = ingestor(StorageLayout::Remote, &MemoryBackend::new(), 8)
            .ingest(FILENAME, body(&data, 16))
            .await
            .unwrap();

        let shape = |m: &Manifest| {
            m.chunks()
                .iter()
                .map(|c| (c.chunk_number, c.chunk_filename.clone(), c.chunk_size))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&local), shape(&remote));
    }

    #[tokio::test]
    async fn test_exact_limit_is_not_chunked() {
        let backend = MemoryBackend::new();
        let ingestor = ingestor(StorageLayout::Remote, &backend, 10);

        let manifest = ingestor.ingest(FILENAME, body(&payload(10), 3)).await.unwrap();
        assert!(!manifest.is_chunked());
        assert_eq!(manifest.original_size(), 10);
        let id = manifest.file_id();
        assert!(backend.exists(&format!("uploads/{id}/{FILENAME}")).await.unwrap());
    }

    #[tokio::test]
    async fn test_one_byte_over_limit_gives_two_chunks() {
        let backend = MemoryBackend::new();
        let ingestor = ingestor(StorageLayout::Local, &backend, 10);

        let manifest = ingestor.ingest(FILENAME, body(&payload(11), 11)).await.unwrap();
        let sizes: Vec<u64> = manifest.chunks().iter().map(|c| c.chunk_size).collect();
        assert_eq!(sizes, vec![10, 1]);
    }

    #[tokio::test]
    async fn test_empty_upload() {
        for layout in [StorageLayout::Local, StorageLayout::Remote] {
            let backend = MemoryBackend::new();
            let manifest = ingestor(layout, &backend, 10)
                .ingest(FILENAME, body(&[], 1))
                .await
                .unwrap();
            assert!(!manifest.is_chunked());
            assert_eq!(manifest.original_size(), 0);
        }
    }

    #[tokio::test]
    async fn test_filename_is_sanitized_in_keys() {
        let backend = MemoryBackend::new();
        let ingestor = ingestor(StorageLayout::Remote, &backend, 4);

        let manifest = ingestor
            .ingest("../../etc/passwd", body(&payload(6), 6))
            .await
            .unwrap();
        assert_eq!(manifest.original_filename(), "passwd");
        for chunk in manifest.chunks() {
            assert!(!chunk.chunk_path.contains(".."));
        }
    }

    #[tokio::test]
    async fn test_unusable_filename_is_rejected() {
        let backend = MemoryBackend::new();
        let ingestor = ingestor(StorageLayout::Remote, &backend, 4);

        let err = ingestor.ingest("..", body(b"abc", 3)).await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidFilename(_)));
        assert_eq!(err.kind(), "invalid_filename");
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_source_error_removes_spooled_original() {
        let backend = MemoryBackend::new();
        let ingestor = ingestor(StorageLayout::Local, &backend, 4);
        let failing: SourceStream<'static> = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"abcdef")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ]));

        let err = ingestor.ingest(FILENAME, failing).await.unwrap_err();
        assert!(matches!(err, IngestError::Source(_)));
        assert!(backend.is_empty());
        assert_eq!(ingestor.registry.cached(), 0);
    }
}
