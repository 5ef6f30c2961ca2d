//! Pre-flight validation of an upload.
//!
//! Runs before any I/O. A file that fails here never reaches storage and never
//! gets a transaction.

use crate::models::{UploadConfig, UploadFile};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Invalid content type: {content_type} (allowed: {allowed:?})")]
    InvalidContentType {
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("Missing bucket")]
    MissingBucket,
}

/// Check `file` against the size and type constraints of `config`, in that order.
pub fn validate(file: &UploadFile, config: &UploadConfig) -> Result<(), ValidationError> {
    if config.bucket.trim().is_empty() {
        return Err(ValidationError::MissingBucket);
    }

    if let Some(max) = config.max_size {
        let size = file.size();
        if size > max {
            return Err(ValidationError::FileTooLarge { size, max });
        }
    }

    if let Some(ref allowed) = config.allowed_types {
        let normalized = file.content_type.trim().to_lowercase();
        if !allowed.iter().any(|ct| ct.trim().to_lowercase() == normalized) {
            return Err(ValidationError::InvalidContentType {
                content_type: file.content_type.clone(),
                allowed: allowed.clone(),
            });
        }
    }

    Ok(())
}
