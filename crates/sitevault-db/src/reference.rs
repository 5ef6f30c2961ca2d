use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("No reference binding for bucket: {0}")]
    UnknownBucket(String),

    #[error("Reference lookup failed: {0}")]
    Lookup(String),
}

/// Answers "does any row point at this object?" for the reconciler.
///
/// Implementations decide per bucket where to look (a drawings table keyed by file
/// path, an attachments table, a profile photo column, ...). An `Err` means the
/// answer is unknown; callers must not treat it as "unreferenced".
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, ReferenceError>;
}
