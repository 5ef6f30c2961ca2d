//! Shared key generation and validation for storage backends.

use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;

use crate::traits::{StorageError, StorageResult};

const RANDOM_SUFFIX_LEN: usize = 8;

/// Generate a collision-resistant object key.
///
/// Layout: `{folder}/{unix_millis}-{random}.{extension}`. The folder is trimmed of
/// surrounding slashes and omitted when empty; the extension is omitted when the
/// original file had none.
pub fn generate_object_key(folder: Option<&str>, extension: Option<&str>) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();

    let mut filename = format!("{}-{}", Utc::now().timestamp_millis(), suffix);
    if let Some(ext) = extension.map(str::trim).filter(|e| !e.is_empty()) {
        filename.push('.');
        filename.push_str(ext);
    }

    match folder.map(|f| f.trim_matches('/')).filter(|f| !f.is_empty()) {
        Some(folder) => format!("{}/{}", folder, filename),
        None => filename,
    }
}

/// Reject keys that could escape a bucket or that no backend can address.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment.is_empty() || segment == ".." || segment == ".")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Bucket names are a single path segment.
pub fn validate_bucket(bucket: &str) -> StorageResult<()> {
    if bucket.is_empty() || bucket.contains('/') || bucket.contains('\\') || bucket.starts_with('.') {
        return Err(StorageError::InvalidKey(format!("invalid bucket name: {}", bucket)));
    }
    Ok(())
}
