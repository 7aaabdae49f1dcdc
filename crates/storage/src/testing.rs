//! Fault-injecting object store shared by the storage and server test suites.
//!
//! Only compiled with the `test-util` feature.

use crate::backends::memory::MemoryBackend;
use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type FaultSlot = Mutex<Option<(String, Fault)>>;

fn lock(slot: &FaultSlot) -> MutexGuard<'_, Option<(String, Fault)>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a faulty backend misbehaves for matching keys.
#[derive(Clone, Copy, Debug)]
pub enum Fault {
    /// Fail with a connection-reset I/O error.
    Unavailable,
    /// Fail with a quota refusal.
    Quota,
    /// Sleep before answering.
    Stall(Duration),
}

impl Fault {
    async fn trigger(self, key: &str) -> StorageResult<()> {
        match self {
            Fault::Unavailable => Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                format!("injected outage for {key}"),
            ))),
            Fault::Quota => Err(StorageError::QuotaExceeded(format!("injected quota for {key}"))),
            Fault::Stall(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

/// Memory backend that injects a fault into writes or reads of keys
/// containing a pattern, and counts deletes.
pub struct FaultyBackend {
    pub inner: MemoryBackend,
    write_fault: FaultSlot,
    read_fault: FaultSlot,
    pub deletes: AtomicUsize,
}

impl FaultyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            write_fault: Mutex::new(None),
            read_fault: Mutex::new(None),
            deletes: AtomicUsize::new(0),
        })
    }

    pub fn fail_writes(&self, pattern: &str, fault: Fault) {
        *lock(&self.write_fault) = Some((pattern.to_string(), fault));
    }

    pub fn fail_reads(&self, pattern: &str, fault: Fault) {
        *lock(&self.read_fault) = Some((pattern.to_string(), fault));
    }

    pub fn heal(&self) {
        *lock(&self.write_fault) = None;
        *lock(&self.read_fault) = None;
    }

    fn matching(slot: &FaultSlot, key: &str) -> Option<Fault> {
        lock(slot)
            .as_ref()
            .filter(|(pattern, _)| key.contains(pattern.as_str()))
            .map(|(_, fault)| *fault)
    }

    async fn before_write(&self, key: &str) -> StorageResult<()> {
        match Self::matching(&self.write_fault, key) {
            Some(fault) => fault.trigger(key).await,
            None => Ok(()),
        }
    }

    async fn before_read(&self, key: &str) -> StorageResult<()> {
        match Self::matching(&self.read_fault, key) {
            Some(fault) => fault.trigger(key).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for FaultyBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.before_read(key).await?;
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.before_read(key).await?;
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.before_read(key).await?;
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.before_write(key).await?;
        self.inner.put(key, data).await
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        self.before_write(key).await?;
        self.inner.put_stream(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}
