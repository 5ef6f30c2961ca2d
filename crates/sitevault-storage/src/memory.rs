//! In-memory storage backend.
//!
//! Useful for tests, local development, and embedding the coordinator where a
//! throwaway blob store is enough. Objects keep an explicit creation timestamp so
//! callers can seed aged objects.

use crate::keys::{validate_bucket, validate_key};
use crate::traits::{PutOptions, Storage, StorageError, StorageResult, StoredObject};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    content_type: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, BTreeMap<String, MemoryObject>>>,
    base_url: String,
}

impl MemoryStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            base_url: base_url.into(),
        }
    }

    /// Insert an object with an explicit creation time, overwriting any existing one.
    pub async fn put_at(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
        created_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                MemoryObject {
                    data: data.into(),
                    content_type: None,
                    created_at,
                },
            );
        Ok(())
    }

    /// Read an object back.
    pub async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }

    /// Content type recorded at upload, if any.
    pub async fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .and_then(|o| o.content_type.clone())
    }

    /// Number of objects in `bucket`.
    pub async fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> StorageResult<()> {
        validate_bucket(bucket)?;
        validate_key(key)?;

        let mut buckets = self.buckets.write().await;
        let objects = buckets.entry(bucket.to_string()).or_default();
        if !options.upsert && objects.contains_key(key) {
            return Err(StorageError::AlreadyExists(format!("{}/{}", bucket, key)));
        }

        let size = data.len();
        objects.insert(
            key.to_string(),
            MemoryObject {
                data,
                content_type: options.content_type.clone(),
                created_at: Utc::now(),
            },
        );

        tracing::debug!(bucket = %bucket, key = %key, size_bytes = size, "Memory storage upload successful");
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        if let Some(objects) = self.buckets.write().await.get_mut(bucket) {
            objects.remove(key);
        }
        tracing::debug!(bucket = %bucket, key = %key, "Memory storage delete successful");
        Ok(())
    }

    async fn sign(&self, bucket: &str, key: &str, ttl: Duration) -> StorageResult<String> {
        if !self.exists(bucket, key).await? {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
        }
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!("{}?expires={}", self.public_url(bucket, key), expires))
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.base_url.trim_end_matches('/'), bucket, key)
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<StoredObject>> {
        validate_bucket(bucket)?;
        let buckets = self.buckets.read().await;
        let Some(objects) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };

        let prefix = prefix.unwrap_or("");
        Ok(objects
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .skip(offset)
            .take(limit)
            .map(|(name, object)| StoredObject {
                name: name.clone(),
                created_at: object.created_at,
                size: object.data.len() as u64,
            })
            .collect())
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        Ok(self
            .buckets
            .read()
            .await
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key)))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
