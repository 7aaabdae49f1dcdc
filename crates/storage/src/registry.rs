//! Manifest registry: upload id to manifest, with a durable fallback.

use crate::error::StorageError;
use crate::uploads::UploadStorage;
use bytes::Bytes;
use chunkd_core::{Manifest, UploadId};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("upload not found: {0}")]
    NotFound(UploadId),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("corrupt manifest for upload {upload_id}: {reason}")]
    Corrupt { upload_id: UploadId, reason: String },
}

/// Where a lookup was answered from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupSource {
    Cache,
    Durable,
}

impl LookupSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Durable => "durable",
        }
    }
}

/// Maps upload ids to their manifests.
///
/// The in-memory map is the only record for the local layout. For the remote
/// layout it is a read-through cache over `metadata/{id}.json`, which stays
/// the source of truth across restarts.
pub struct ManifestRegistry {
    cache: DashMap<UploadId, Arc<Manifest>>,
    storage: Arc<UploadStorage>,
}

impl ManifestRegistry {
    pub fn new(storage: Arc<UploadStorage>) -> Self {
        Self {
            cache: DashMap::new(),
            storage,
        }
    }

    /// Record a manifest. Durable layouts persist it before it becomes visible.
    #[instrument(skip(self, manifest), fields(upload_id = %manifest.file_id()))]
    pub async fn register(&self, manifest: Manifest) -> Result<Arc<Manifest>, RegistryError> {
        let upload_id = *manifest.file_id();

        if let Some(key) = self.storage.layout().manifest_key(&upload_id) {
            let body = manifest.to_json().map_err(|e| RegistryError::Corrupt {
                upload_id,
                reason: e.to_string(),
            })?;
            self.storage.store(&key, Bytes::from(body)).await?;
            debug!(key = %key, "Persisted manifest");
        }

        let manifest = Arc::new(manifest);
        self.cache.insert(upload_id, Arc::clone(&manifest));
        Ok(manifest)
    }

    /// Find the manifest registered under `upload_id`.
    pub async fn lookup(&self, upload_id: &UploadId) -> Result<Arc<Manifest>, RegistryError> {
        self.lookup_with_source(upload_id)
            .await
            .map(|(manifest, _)| manifest)
    }

    /// Like [`lookup`](Self::lookup), also reporting whether the cache answered.
    #[instrument(skip(self), fields(upload_id = %upload_id))]
    pub async fn lookup_with_source(
        &self,
        upload_id: &UploadId,
    ) -> Result<(Arc<Manifest>, LookupSource), RegistryError> {
        if let Some(hit) = self.cache.get(upload_id).map(|entry| Arc::clone(entry.value())) {
            return Ok((hit, LookupSource::Cache));
        }

        let Some(key) = self.storage.layout().manifest_key(upload_id) else {
            return Err(RegistryError::NotFound(*upload_id));
        };

        let body = match self.storage.retrieve(&key).await {
            Ok(body) => body,
            Err(StorageError::NotFound(_)) => return Err(RegistryError::NotFound(*upload_id)),
            Err(e) => return Err(e.into()),
        };

        let manifest = Manifest::from_json(&body).map_err(|e| {
            warn!(key = %key, error = %e, "Stored manifest failed to decode");
            RegistryError::Corrupt {
                upload_id: *upload_id,
                reason: e.to_string(),
            }
        })?;
        if manifest.file_id() != upload_id {
            return Err(RegistryError::Corrupt {
                upload_id: *upload_id,
                reason: format!("manifest belongs to upload {}", manifest.file_id()),
            });
        }

        let manifest = Arc::clone(
            self.cache
                .entry(*upload_id)
                .or_insert_with(|| Arc::new(manifest))
                .value(),
        );
        debug!("Loaded manifest from durable storage");
        Ok((manifest, LookupSource::Durable))
    }

    /// Number of cached manifests.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached manifest, as after a process restart.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
