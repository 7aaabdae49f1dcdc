//! S3-compatible object store.
//!
//! Objects map one-to-one onto bucket keys below an optional prefix. Streaming
//! writes go through a multipart upload so large originals never have to be
//! held in memory by the backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use aws_config::default_provider::credentials::DefaultCredentialsChain;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::{ProvideCredentials, future};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectOutput;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};
use chunkd_core::config::S3Config;
use futures::TryStreamExt;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Multipart part size. S3 rejects non-final parts under 5 MiB.
const PART_SIZE: usize = 8 * 1024 * 1024;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Error codes meaning the bucket will not take the object no matter how
/// often it is retried.
const QUOTA_CODES: &[&str] = &["QuotaExceeded", "EntityTooLarge", "InsufficientStorage"];

/// Tag carried by ambient credential failures so they can be told apart from
/// transport errors once the SDK has wrapped them.
const AMBIENT_CREDENTIALS_TAG: &str = "chunkd-ambient-credentials";

/// The AWS default credential chain, built on the first signed request.
#[derive(Debug)]
struct AmbientCredentials {
    region: Region,
    chain: OnceCell<DefaultCredentialsChain>,
}

impl AmbientCredentials {
    fn new(region: Region) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn resolve(&self) -> aws_credential_types::provider::Result {
        let region = self.region.clone();
        let chain = self
            .chain
            .get_or_init(|| async move {
                DefaultCredentialsChain::builder()
                    .region(region)
                    .build()
                    .await
            })
            .await;

        chain.provide_credentials().await.map_err(|e| {
            CredentialsError::provider_error(format!("{AMBIENT_CREDENTIALS_TAG}: {e}"))
        })
    }
}

impl ProvideCredentials for AmbientCredentials {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::new(self.resolve())
    }
}

/// Translate an SDK failure on `key` into a storage error.
fn storage_error<E>(err: SdkError<E>, key: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|raw| raw.status().as_u16());
    let code = err.code().unwrap_or_default().to_string();

    if status == Some(404) || code == "NoSuchKey" || code == "NotFound" {
        return StorageError::NotFound(key.to_string());
    }
    if status == Some(507) || QUOTA_CODES.contains(&code.as_str()) {
        return StorageError::QuotaExceeded(format!("{key}: {code}"));
    }
    if err.to_string().contains(AMBIENT_CREDENTIALS_TAG) {
        return StorageError::Config(
            "no S3 credentials available; set access_key_id and secret_access_key".to_string(),
        );
    }
    StorageError::S3(Box::new(err))
}

/// Object store backed by an S3 bucket.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Build a client for the configured bucket. No request is sent.
    pub async fn new(config: &S3Config) -> StorageResult<Self> {
        let region = Region::new(config.region().to_string());
        let static_credentials = config
            .static_credentials()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(region.clone())
            .force_path_style(config.force_path_style);

        builder = match static_credentials {
            Some((id, secret)) => {
                builder.credentials_provider(Credentials::new(id, secret, None, None, "chunkd"))
            }
            None => builder.credentials_provider(AmbientCredentials::new(region)),
        };
        if let Some(endpoint) = config.endpoint_url() {
            builder = builder.endpoint_url(endpoint);
        }

        tracing::debug!(bucket = %config.bucket, prefix = ?config.normalized_prefix(), "S3 backend configured");
        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            prefix: config.normalized_prefix().map(str::to_string),
        })
    }

    /// Bucket key for a store key.
    fn object_key(&self, key: &str) -> String {
        self.prefix
            .as_deref()
            .map_or_else(|| key.to_string(), |prefix| format!("{prefix}/{key}"))
    }

    async fn fetch(&self, key: &str) -> StorageResult<GetObjectOutput> {
        self.client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| storage_error(e, key))
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await;

        match head.map_err(|e| storage_error(e, key)) {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let aggregated = self
            .fetch(key)
            .await?
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;
        Ok(aggregated.into_bytes())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let body = self.fetch(key).await?.body.into_async_read();
        Ok(Box::pin(ReaderStream::new(body).map_err(StorageError::Io)))
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .body(data.into())
            .send()
            .await
            .map_err(|e| storage_error(e, key))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let object_key = self.object_key(key);
        let started = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| storage_error(e, key))?;
        let Some(upload_id) = started.upload_id().map(str::to_string) else {
            return Err(StorageError::S3(
                format!("CreateMultipartUpload for {key} returned no upload id").into(),
            ));
        };

        Ok(Box::new(MultipartWriter {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            object_key,
            upload_id,
            completed: Vec::new(),
            pending: BytesMut::with_capacity(PART_SIZE),
            total: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // DeleteObject reports success for absent keys.
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| storage_error(e, key))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn health_check(&self) -> StorageResult<()> {
        let probe = self.client.head_bucket().bucket(&self.bucket).send();
        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe)
            .await
            .map_err(|_| StorageError::Timeout {
                operation: "health_check",
                key: self.bucket.clone(),
                timeout: HEALTH_CHECK_TIMEOUT,
            })?
            .map_err(|e| storage_error(e, &self.bucket))?;
        Ok(())
    }
}

/// Streaming write that ships a part every `PART_SIZE` bytes.
struct MultipartWriter {
    client: Client,
    bucket: String,
    object_key: String,
    upload_id: String,
    completed: Vec<CompletedPart>,
    pending: BytesMut,
    total: u64,
}

impl MultipartWriter {
    async fn send_part(&mut self, body: Bytes) -> StorageResult<()> {
        let Ok(part_number) = i32::try_from(self.completed.len() + 1) else {
            return Err(StorageError::InvalidKey(format!(
                "{}: too many multipart parts",
                self.object_key
            )));
        };
        let uploaded = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.object_key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(body.into())
            .send()
            .await
            .map_err(|e| storage_error(e, &self.object_key))?;

        self.completed.push(
            CompletedPart::builder()
                .part_number(part_number)
                .set_e_tag(uploaded.e_tag().map(str::to_string))
                .build(),
        );
        Ok(())
    }

    async fn cancel(&self) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.object_key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .map_err(|e| storage_error(e, &self.object_key))?;
        Ok(())
    }
}

#[async_trait]
impl StreamingUpload for MultipartWriter {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.total += data.len() as u64;
        self.pending.extend_from_slice(&data);
        while self.pending.len() >= PART_SIZE {
            let part = self.pending.split_to(PART_SIZE).freeze();
            self.send_part(part).await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        if !self.pending.is_empty() {
            let tail = self.pending.split().freeze();
            self.send_part(tail).await?;
        }

        if self.completed.is_empty() {
            // A multipart upload cannot complete without parts; store the
            // empty object directly instead.
            if let Err(e) = self.cancel().await {
                tracing::warn!(key = %self.object_key, error = %e, "Failed to abort empty multipart upload");
            }
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.object_key)
                .body(Bytes::new().into())
                .send()
                .await
                .map_err(|e| storage_error(e, &self.object_key))?;
            return Ok(0);
        }

        let parts = CompletedMultipartUpload::builder()
            .set_parts(Some(std::mem::take(&mut self.completed)))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.object_key)
            .upload_id(&self.upload_id)
            .multipart_upload(parts)
            .send()
            .await
            .map_err(|e| storage_error(e, &self.object_key))?;
        Ok(self.total)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.cancel().await
    }
}
