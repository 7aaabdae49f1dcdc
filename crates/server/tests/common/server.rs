//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chunkd_core::config::{AppConfig, ServerConfig, StorageConfig};
use chunkd_server::{AppState, create_router};
use chunkd_storage::{FilesystemBackend, ObjectStore};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: Option<TempDir>,
}

#[allow(dead_code)]
impl TestServer {
    /// Filesystem-backed server with the given chunk size.
    pub async fn local(max_chunk_size: u64) -> Self {
        Self::local_with(|config| config.server.max_chunk_size = max_chunk_size).await
    }

    /// Filesystem-backed server with custom config modifications.
    pub async fn local_with<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("storage");
        let store: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let mut config = AppConfig {
            server: ServerConfig::default(),
            storage: StorageConfig::Filesystem { path: storage_path },
        };
        modifier(&mut config);

        let mut server = Self::build(config, store);
        server._temp_dir = Some(temp_dir);
        server
    }

    /// Server laid out like remote object storage, over the given store.
    pub fn remote(max_chunk_size: u64, store: Arc<dyn ObjectStore>) -> Self {
        Self::remote_with(store, |config| config.server.max_chunk_size = max_chunk_size)
    }

    /// Remote-layout server with custom config modifications.
    pub fn remote_with<F>(store: Arc<dyn ObjectStore>, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = AppConfig {
            server: ServerConfig::default(),
            storage: StorageConfig::Memory,
        };
        modifier(&mut config);
        Self::build(config, store)
    }

    fn build(config: AppConfig, store: Arc<dyn ObjectStore>) -> Self {
        let state = AppState::new(config, store).expect("Failed to build application state");
        let router = create_router(state.clone());
        Self {
            router,
            state,
            _temp_dir: None,
        }
    }

    /// Root directory of the filesystem backend, if any.
    pub fn storage_root(&self) -> Option<PathBuf> {
        match &self.state.config.storage {
            StorageConfig::Filesystem { path } => Some(path.clone()),
            _ => None,
        }
    }

    /// Send a request and decode the JSON response body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let json: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// `GET` a path and decode the JSON response body.
    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }
}
