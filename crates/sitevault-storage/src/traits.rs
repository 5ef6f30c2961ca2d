//! Storage abstraction trait
//!
//! This module defines the Storage trait that all blob storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("List failed: {0}")]
    ListFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// Whether repeating the same call could succeed.
    ///
    /// Missing objects, conflicts, bad keys, permissions and configuration problems
    /// will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::NotFound(_)
            | StorageError::AlreadyExists(_)
            | StorageError::InvalidKey(_)
            | StorageError::PermissionDenied(_)
            | StorageError::ConfigError(_) => false,
            StorageError::IoError(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            StorageError::UploadFailed(_)
            | StorageError::DeleteFailed(_)
            | StorageError::ListFailed(_)
            | StorageError::Timeout(_)
            | StorageError::BackendError(_) => true,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Options for a single `put`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    /// Overwrite an existing object instead of failing with `AlreadyExists`.
    pub upsert: bool,
}

impl PutOptions {
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Default::default()
        }
    }
}

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Full key inside the bucket.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

/// Storage abstraction trait
///
/// All blob storage backends must implement this trait. Every operation is
/// bucket-scoped; the coordinator never assumes anything about how a backend
/// lays objects out beyond the `(bucket, key)` address.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` at `key`.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> StorageResult<()>;

    /// Delete one object. Deleting a missing object succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Delete several objects. Stops at the first failure.
    async fn delete_many(&self, bucket: &str, keys: &[String]) -> StorageResult<()> {
        for key in keys {
            self.delete(bucket, key).await?;
        }
        Ok(())
    }

    /// Time-limited URL for reading the object.
    async fn sign(&self, bucket: &str, key: &str, ttl: Duration) -> StorageResult<String>;

    /// Unauthenticated URL for the object. Does not check existence.
    fn public_url(&self, bucket: &str, key: &str) -> String;

    /// List objects under `prefix` (the whole bucket when `None`), ordered by key.
    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<StoredObject>>;

    /// Check if an object exists
    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
