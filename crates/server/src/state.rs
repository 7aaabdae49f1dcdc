//! Application state shared across handlers.

use crate::ingest::Ingestor;
use chunkd_core::config::AppConfig;
use chunkd_storage::{ManifestRegistry, ObjectStore, StorageLayout, UploadStorage};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object store bound to its key layout and call timeout.
    pub storage: Arc<UploadStorage>,
    /// Upload id to manifest registry.
    pub registry: Arc<ManifestRegistry>,
    /// Upload ingestion pipeline.
    pub ingestor: Arc<Ingestor>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// The key layout follows the configured storage type, so a test can pass
    /// any store implementation and still get filesystem or remote behavior.
    pub fn new(config: AppConfig, store: Arc<dyn ObjectStore>) -> chunkd_core::Result<Self> {
        config.validate()?;
        let policy = config.server.size_policy()?;
        let layout = StorageLayout::for_config(&config.storage);

        let storage = Arc::new(UploadStorage::new(
            store,
            layout,
            config.server.storage_timeout(),
        ));
        let registry = Arc::new(ManifestRegistry::new(Arc::clone(&storage)));
        let ingestor = Arc::new(Ingestor::new(
            policy,
            Arc::clone(&storage),
            Arc::clone(&registry),
            config.server.cleanup_on_failure,
        ));

        tracing::debug!(
            layout = ?layout,
            backend = storage.backend_name(),
            max_chunk_size = policy.max_chunk_size(),
            "Application state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            storage,
            registry,
            ingestor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkd_core::config::StorageConfig;
    use chunkd_storage::MemoryBackend;

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let mut config = AppConfig::default();
        config.server.max_chunk_size = 0;

        let result = AppState::new(config, Arc::new(MemoryBackend::new()));
        assert!(matches!(result, Err(chunkd_core::Error::Configuration(_))));
    }

    #[test]
    fn test_layout_follows_storage_type() {
        let config = AppConfig {
            storage: StorageConfig::Memory,
            ..Default::default()
        };
        let state = AppState::new(config, Arc::new(MemoryBackend::new())).unwrap();
        assert_eq!(state.storage.layout(), StorageLayout::Remote);

        let state = AppState::new(AppConfig::default(), Arc::new(MemoryBackend::new())).unwrap();
        assert_eq!(state.storage.layout(), StorageLayout::Local);
    }
}
