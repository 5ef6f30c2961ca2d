use crate::keys::{validate_bucket, validate_key};
use crate::traits::{PutOptions, Storage, StorageError, StorageResult, StoredObject};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem storage implementation
///
/// Buckets are directories directly under `base_path`; keys map to relative paths
/// inside them.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
    staging_path: PathBuf,
}

/// Directory under `base_path` holding writes in progress. Bucket names cannot
/// start with a dot, so it never shows up as a bucket.
const STAGING_DIR: &str = ".staging";

/// A write in progress. The file is removed on drop unless it was renamed away.
struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    fn new(staging_path: &Path) -> Self {
        let name: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Self {
            path: staging_path.join(format!("{}.part", name)),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "Failed to remove staged upload"
                );
            }
        }
    }
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for blob storage (e.g., "/var/lib/sitevault/blobs")
    /// * `base_url` - Base URL for serving files (e.g., "http://localhost:3000/storage")
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();
        let staging_path = base_path.join(STAGING_DIR);

        fs::create_dir_all(&staging_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                staging_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            base_url,
            staging_path,
        })
    }

    fn bucket_path(&self, bucket: &str) -> StorageResult<PathBuf> {
        validate_bucket(bucket)?;
        Ok(self.base_path.join(bucket))
    }

    /// Convert bucket and key to a filesystem path. Keys are validated so they
    /// cannot escape the bucket directory.
    fn key_to_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.bucket_path(bucket)?.join(key))
    }

    fn generate_url(&self, bucket: &str, key: &str) -> String {
        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(bucket),
            encoded_key
        )
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Walk the bucket directory and collect every regular file as an object.
    async fn walk_bucket(&self, root: &Path) -> StorageResult<Vec<StoredObject>> {
        let mut objects = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StorageError::ListFailed(format!(
                        "Failed to read directory {}: {}",
                        dir.display(),
                        e
                    )))
                }
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let relative = match path.strip_prefix(root) {
                    Ok(relative) => relative,
                    Err(_) => continue,
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");

                let meta = entry.metadata().await?;
                let created = meta.created().or_else(|_| meta.modified())?;

                objects.push(StoredObject {
                    name,
                    created_at: DateTime::<Utc>::from(created),
                    size: meta.len(),
                });
            }
        }

        Ok(objects)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> StorageResult<()> {
        let path = self.key_to_path(bucket, key)?;
        let size = data.len();

        if !options.upsert && fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::AlreadyExists(format!("{}/{}", bucket, key)));
        }
        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        // Bytes only become visible under the key once fully written; an attempt
        // dropped mid-write takes its staged file with it.
        let staged = StagedFile::new(&self.staging_path);
        let written = async {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&staged.path)
                .await?;
            file.write_all(&data).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            return Err(match e.kind() {
                ErrorKind::PermissionDenied => {
                    StorageError::PermissionDenied(format!("{}: {}", path.display(), e))
                }
                _ => StorageError::UploadFailed(format!(
                    "Failed to write file {}: {}",
                    path.display(),
                    e
                )),
            });
        }

        let published = if options.upsert {
            fs::rename(&staged.path, &path).await
        } else {
            fs::hard_link(&staged.path, &path).await
        };
        if let Err(e) = published {
            return Err(match e.kind() {
                ErrorKind::AlreadyExists => {
                    StorageError::AlreadyExists(format!("{}/{}", bucket, key))
                }
                _ => StorageError::UploadFailed(format!(
                    "Failed to move upload into place at {}: {}",
                    path.display(),
                    e
                )),
            });
        }

        tracing::info!(
            path = %path.display(),
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(bucket, key)?;
        let start = std::time::Instant::now();

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StorageError::DeleteFailed(format!(
                    "Failed to delete file {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        tracing::info!(
            path = %path.display(),
            bucket = %bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    async fn sign(&self, bucket: &str, key: &str, ttl: Duration) -> StorageResult<String> {
        let path = self.key_to_path(bucket, key)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
        }
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!("{}?expires={}", self.generate_url(bucket, key), expires))
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        self.generate_url(bucket, key)
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<StoredObject>> {
        let root = self.bucket_path(bucket)?;
        let mut objects = self.walk_bucket(&root).await?;

        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            objects.retain(|o| o.name.starts_with(prefix));
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(objects.into_iter().skip(offset).take(limit).collect())
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(bucket, key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
