//! Configuration types shared across crates.

use crate::error::{Error, Result};
use crate::policy::SizePolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level service configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Validate the configuration before the service starts.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.storage.validate()
    }
}

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Payloads larger than this many bytes are split into chunks.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Largest accepted request body in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Timeout for a single storage call in seconds.
    #[serde(default = "default_storage_timeout_secs")]
    pub storage_timeout_secs: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    /// Delete objects already written for an upload whose ingestion failed.
    #[serde(default = "default_true")]
    pub cleanup_on_failure: bool,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_chunk_size() -> u64 {
    crate::DEFAULT_MAX_CHUNK_SIZE
}

fn default_max_upload_size() -> u64 {
    crate::DEFAULT_MAX_UPLOAD_SIZE
}

fn default_storage_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_chunk_size: default_max_chunk_size(),
            max_upload_size: default_max_upload_size(),
            storage_timeout_secs: default_storage_timeout_secs(),
            metrics_enabled: true,
            cleanup_on_failure: true,
        }
    }
}

impl ServerConfig {
    /// The chunking policy derived from `max_chunk_size`.
    pub fn size_policy(&self) -> Result<SizePolicy> {
        SizePolicy::new(self.max_chunk_size)
    }

    /// Get the per-call storage timeout as a Duration.
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<()> {
        self.size_policy()?;
        if self.storage_timeout_secs == 0 {
            return Err(Error::Configuration(
                "storage_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.max_upload_size == 0 {
            return Err(Error::Configuration(
                "max_upload_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage. Manifests live only in process memory.
    Filesystem {
        /// Root directory holding `uploads/` and `chunks/`.
        path: PathBuf,
    },
    /// S3-compatible storage with durable manifests under `metadata/`.
    S3(S3Config),
    /// Process-local object store laid out like S3; contents vanish on restart.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<()> {
        match self {
            StorageConfig::S3(s3) => s3.validate(),
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => Err(
                Error::Configuration("filesystem storage path must not be empty".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// Connection settings for an S3-compatible bucket.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    /// Endpoint URL for MinIO and other S3-compatible services.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Key prefix prepended to every object key.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Static access key. The ambient AWS credential chain is used when unset.
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Address objects as `endpoint/bucket/key`.
    #[serde(default)]
    pub force_path_style: bool,
}

impl S3Config {
    pub const DEFAULT_REGION: &'static str = "us-east-1";

    /// Configured region or `us-east-1`.
    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(Self::DEFAULT_REGION)
    }

    /// Prefix with surrounding slashes removed; `None` when nothing is left.
    pub fn normalized_prefix(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
    }

    /// Endpoint with a scheme, defaulting to plain HTTP for bare `host:port`.
    pub fn endpoint_url(&self) -> Option<String> {
        let endpoint = self.endpoint.as_deref()?.trim();
        if endpoint.is_empty() {
            return None;
        }
        let lower = endpoint.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Some(endpoint.to_string())
        } else {
            Some(format!("http://{endpoint}"))
        }
    }

    /// Static key pair, if one is configured.
    pub fn static_credentials(&self) -> Result<Option<(&str, &str)>> {
        match (self.access_key_id.as_deref(), self.secret_access_key.as_deref()) {
            (Some(id), Some(secret)) => Ok(Some((id, secret))),
            (None, None) => Ok(None),
            _ => Err(Error::Configuration(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .into(),
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::Configuration("s3 bucket must not be empty".into()));
        }
        self.static_credentials().map(|_| ())
    }
}
