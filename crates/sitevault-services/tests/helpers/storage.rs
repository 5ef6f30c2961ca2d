//! Fault-injecting storage wrapper.

use async_trait::async_trait;
use bytes::Bytes;
use sitevault_services::{MemoryStorage, Storage, StorageError};
use sitevault_storage::{PutOptions, StorageBackend, StorageResult, StoredObject};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// [`MemoryStorage`] that fails or stalls on demand and counts every call.
pub struct FlakyStorage {
    inner: MemoryStorage,
    put_calls: AtomicU32,
    delete_calls: AtomicU32,
    list_calls: AtomicU32,
    put_failures: AtomicU32,
    delete_failures: AtomicU32,
    failing_suffix: Mutex<Option<String>>,
    put_delay: Mutex<Option<Duration>>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self {
            inner: MemoryStorage::new("mem://blobs"),
            put_calls: AtomicU32::new(0),
            delete_calls: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
            put_failures: AtomicU32::new(0),
            delete_failures: AtomicU32::new(0),
            failing_suffix: Mutex::new(None),
            put_delay: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    /// Fail the next `n` puts with a transient backend error.
    pub fn fail_next_puts(&self, n: u32) {
        self.put_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` deletes with a transient backend error.
    pub fn fail_next_deletes(&self, n: u32) {
        self.delete_failures.store(n, Ordering::SeqCst);
    }

    /// Fail every put whose key ends with `suffix`.
    pub fn fail_puts_ending_with(&self, suffix: &str) {
        *self.failing_suffix.lock().unwrap() = Some(suffix.to_string());
    }

    /// Make every put take at least `delay`.
    pub fn delay_puts(&self, delay: Duration) {
        *self.put_delay.lock().unwrap() = Some(delay);
    }

    pub fn put_calls(&self) -> u32 {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u32 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Keys currently stored in `bucket`.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        self.inner
            .list(bucket, None, usize::MAX, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.name)
            .collect()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn put(&self, bucket: &str, key: &str, data: Bytes, options: &PutOptions) -> StorageResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.put_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.put_failures) {
            return Err(StorageError::BackendError("injected put failure".to_string()));
        }
        let failing = self
            .failing_suffix
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|suffix| key.ends_with(suffix));
        if failing {
            return Err(StorageError::UploadFailed(format!("injected failure for {}", key)));
        }

        self.inner.put(bucket, key, data, options).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.delete_failures) {
            return Err(StorageError::DeleteFailed("injected delete failure".to_string()));
        }
        self.inner.delete(bucket, key).await
    }

    async fn sign(&self, bucket: &str, key: &str, ttl: Duration) -> StorageResult<String> {
        self.inner.sign(bucket, key, ttl).await
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        self.inner.public_url(bucket, key)
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<StoredObject>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list(bucket, prefix, limit, offset).await
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        self.inner.exists(bucket, key).await
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
