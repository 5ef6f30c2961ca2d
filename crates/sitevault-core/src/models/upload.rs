use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::progress::UploadProgress;

/// Default number of attempts for every remote call made on behalf of an upload.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Observer invoked with each progress snapshot that was applied.
pub type ProgressCallback = Arc<dyn Fn(&UploadProgress) + Send + Sync>;

/// A file the caller has already received and wants stored.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Lowercased extension of the original filename, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(|e| e.to_lowercase())
    }
}

/// Per-upload options.
#[derive(Clone)]
pub struct UploadConfig {
    /// Storage namespace, required.
    pub bucket: String,
    /// Optional key prefix inside the bucket.
    pub folder: Option<String>,
    /// Maximum size in bytes.
    pub max_size: Option<u64>,
    /// Accepted content types (case-insensitive).
    pub allowed_types: Option<Vec<String>>,
    pub retry_attempts: u32,
    /// Deadline for each remote call attempt.
    pub timeout: Option<Duration>,
    pub on_progress: Option<ProgressCallback>,
}

impl UploadConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            folder: None,
            max_size: None,
            allowed_types: None,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            timeout: None,
            on_progress: None,
        }
    }

    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn allowed_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&UploadProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("bucket", &self.bucket)
            .field("folder", &self.folder)
            .field("max_size", &self.max_size)
            .field("allowed_types", &self.allowed_types)
            .field("retry_attempts", &self.retry_attempts)
            .field("timeout", &self.timeout)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// A blob that landed in storage under a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub bucket: String,
    pub file_path: String,
    pub file_url: String,
    pub upload_id: Uuid,
    pub transaction_id: Uuid,
    pub original_name: String,
    pub content_type: String,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_is_lowercased() {
        let file = UploadFile::new("Site Plan.PDF", "application/pdf", vec![1u8, 2, 3]);
        assert_eq!(file.extension().as_deref(), Some("pdf"));
        assert_eq!(file.size(), 3);
    }

    #[test]
    fn test_extension_missing() {
        assert_eq!(UploadFile::new("README", "text/plain", Vec::new()).extension(), None);
        assert_eq!(UploadFile::new("trailing.", "text/plain", Vec::new()).extension(), None);
    }

    #[test]
    fn test_config_defaults() {
        let config = UploadConfig::new("drawings");
        assert_eq!(config.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert!(config.folder.is_none());
        assert!(config.max_size.is_none());
        assert!(config.allowed_types.is_none());
        assert!(config.on_progress.is_none());
    }
}
