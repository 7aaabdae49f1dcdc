//! Object key layouts for uploads, chunks and manifests.

use chunkd_core::UploadId;
use chunkd_core::config::StorageConfig;

/// How the ingestion pipeline feeds bytes to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestMode {
    /// Spool the body to the store as it arrives and split from there.
    Streaming,
    /// Hold the whole body in memory, then issue one write per object.
    Buffered,
}

/// Key scheme of a storage variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageLayout {
    /// Local disk: `uploads/{id}_{filename}`, `chunks/{id}/{chunk}`.
    /// Manifests are kept in process memory only.
    Local,
    /// Object storage: `uploads/{id}/{filename}`, `chunks/{id}/{chunk}`,
    /// `metadata/{id}.json`.
    Remote,
}

impl StorageLayout {
    /// Layout matching a configured backend.
    pub fn for_config(config: &StorageConfig) -> Self {
        match config {
            StorageConfig::Filesystem { .. } => Self::Local,
            StorageConfig::S3(_) | StorageConfig::Memory => Self::Remote,
        }
    }

    /// Key of the original, unsplit payload.
    pub fn original_key(&self, upload_id: &UploadId, filename: &str) -> String {
        match self {
            Self::Local => format!("uploads/{upload_id}_{filename}"),
            Self::Remote => format!("uploads/{upload_id}/{filename}"),
        }
    }

    /// Key of one chunk.
    pub fn chunk_key(&self, upload_id: &UploadId, chunk_name: &str) -> String {
        format!("chunks/{upload_id}/{chunk_name}")
    }

    /// Key of the serialized manifest, if this layout persists manifests.
    pub fn manifest_key(&self, upload_id: &UploadId) -> Option<String> {
        match self {
            Self::Local => None,
            Self::Remote => Some(format!("metadata/{upload_id}.json")),
        }
    }

    pub fn ingest_mode(&self) -> IngestMode {
        match self {
            Self::Local => IngestMode::Streaming,
            Self::Remote => IngestMode::Buffered,
        }
    }

    /// Whether manifests survive a process restart.
    pub fn has_durable_manifests(&self) -> bool {
        matches!(self, Self::Remote)
    }
}
