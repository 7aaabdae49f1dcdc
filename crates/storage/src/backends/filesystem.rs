//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Block size for streaming reads (64 KiB).
const STREAM_BLOCK_SIZE: usize = 64 * 1024;

/// Local filesystem object store.
///
/// Keys are relative paths under `root`. Writes land in a uniquely named
/// sibling temp file that is fsynced and renamed over the target, so readers
/// never observe a partially written object.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating `root` if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Resolve a key to a path inside the root.
    ///
    /// Validation touches the filesystem (`canonicalize`, `symlink_metadata`),
    /// so it runs on the blocking pool.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || resolve_key(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Open a staging file for `key`, creating parent directories.
    async fn stage(&self, key: &str) -> StorageResult<StagedFile> {
        let path = self.key_path(key).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(StagedFile::create(path).await?)
    }
}

/// Reject keys that are not plain relative paths or that resolve outside
/// `root` through a symlink, either at the target or at its nearest existing
/// ancestor.
fn resolve_key(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.is_empty() || key.starts_with('\\') {
        return Err(StorageError::InvalidKey(format!("unusable key: {key:?}")));
    }
    if !Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }

    let path = root.join(key);
    let root_canonical = root.canonicalize().map_err(|e| {
        StorageError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to canonicalize root: {e}"),
        ))
    })?;

    let mut probe = Some(path.as_path());
    while let Some(candidate) = probe {
        match std::fs::symlink_metadata(candidate) {
            Ok(meta) => {
                let canonical = candidate.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!("dangling symlink in key: {key}"))
                    } else {
                        StorageError::Io(e)
                    }
                })?;
                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => probe = candidate.parent(),
            Err(e) => return Err(StorageError::Io(e)),
        }
    }

    Ok(path)
}

/// A file written next to its destination and renamed into place on commit.
struct StagedFile {
    file: fs::File,
    staging: PathBuf,
    target: PathBuf,
    len: u64,
}

impl StagedFile {
    async fn create(target: PathBuf) -> std::io::Result<Self> {
        // Fixed-length name so long targets still fit within NAME_MAX.
        let staging = target.with_file_name(format!(".{}.tmp", Uuid::new_v4()));
        let file = fs::File::create(&staging).await?;
        Ok(Self {
            file,
            staging,
            target,
            len: 0,
        })
    }

    async fn append(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.file.write_all(data).await?;
        self.len += data.len() as u64;
        Ok(())
    }

    /// Fsync and rename over the target. The staging file is removed on failure.
    async fn commit(self) -> StorageResult<u64> {
        let Self {
            file,
            staging,
            target,
            len,
        } = self;
        let synced = file.sync_all().await;
        drop(file);
        let renamed = match synced {
            Ok(()) => fs::rename(&staging, &target).await,
            Err(e) => Err(e),
        };
        if let Err(e) = renamed {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::Io(e));
        }
        Ok(len)
    }

    async fn discard(self) -> StorageResult<()> {
        drop(self.file);
        match fs::remove_file(&self.staging).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(StorageError::Io(e)),
            _ => Ok(()),
        }
    }
}

fn not_found_or_io(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |e| match e.kind() {
        ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
        _ => StorageError::Io(e),
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        Ok(fs::try_exists(&path).await?)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(not_found_or_io(key))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_path(key).await?;
        let mut file = fs::File::open(&path).await.map_err(not_found_or_io(key))?;

        Ok(Box::pin(async_stream::try_stream! {
            let mut block = vec![0u8; STREAM_BLOCK_SIZE];
            loop {
                let n = file.read(&mut block).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&block[..n]);
            }
        }))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let mut staged = self.stage(key).await?;
        if let Err(e) = staged.append(&data).await {
            let _ = staged.discard().await;
            return Err(StorageError::Io(e));
        }
        staged.commit().await.map(|_| ())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Ok(Box::new(FilesystemUpload(self.stage(key).await?)))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path).await.map_err(not_found_or_io(key))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::Config(format!(
                "storage root {} is not a directory",
                self.root.display()
            ))),
            Err(e) => Err(StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root {} not accessible: {e}", self.root.display()),
            ))),
        }
    }
}

/// Streaming upload for the filesystem backend.
struct FilesystemUpload(StagedFile);

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        Ok(self.0.append(&data).await?)
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        self.0.commit().await
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.0.discard().await
    }
}
