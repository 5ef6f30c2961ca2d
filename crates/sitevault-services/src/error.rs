use sitevault_core::ValidationError;
use sitevault_storage::StorageError;
use uuid::Uuid;

use crate::transaction_log::TransactionLogError;

/// Why an upload (plain or transactional) did not go through.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The caller's database operation failed. Displays the caller's message as-is.
    #[error(transparent)]
    Database(anyhow::Error),

    #[error("Transaction log error: {0}")]
    TransactionLog(#[from] TransactionLogError),

    #[error("No files to upload")]
    EmptyBatch,
}

impl UploadError {
    /// Stable machine-readable code, used in serialized responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::Validation(_) => "VALIDATION_ERROR",
            UploadError::Storage(_) => "STORAGE_ERROR",
            UploadError::Database(_) => "DATABASE_ERROR",
            UploadError::TransactionLog(_) => "TRANSACTION_LOG_ERROR",
            UploadError::EmptyBatch => "EMPTY_BATCH",
        }
    }

    /// Whether the failure was caught before any I/O happened.
    pub fn is_client_error(&self) -> bool {
        matches!(self, UploadError::Validation(_) | UploadError::EmptyBatch)
    }
}

/// An [`UploadError`] together with the identifiers the caller needs to follow up.
///
/// `upload_id` is always present, even when validation rejected the file and no
/// progress entry exists for it.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct UploadFailure {
    pub upload_id: Uuid,
    /// Transactions touched by the failed operation. The failing one comes first.
    pub transaction_ids: Vec<Uuid>,
    #[source]
    pub error: UploadError,
}

impl UploadFailure {
    pub fn new(upload_id: Uuid, error: impl Into<UploadError>) -> Self {
        Self {
            upload_id,
            transaction_ids: Vec::new(),
            error: error.into(),
        }
    }

    pub fn with_transaction(mut self, transaction_id: Uuid) -> Self {
        self.transaction_ids.push(transaction_id);
        self
    }

    pub fn with_transactions(mut self, transaction_ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.transaction_ids.extend(transaction_ids);
        self
    }

    /// The first transaction involved, if any got as far as being registered.
    pub fn transaction_id(&self) -> Option<Uuid> {
        self.transaction_ids.first().copied()
    }
}

/// A compensating step that could not complete.
///
/// Never surfaced to callers: the original failure wins and these are only logged.
/// Blobs left behind this way are reclaimed by the orphan reconciler.
#[derive(Debug, thiserror::Error)]
pub enum CompensationError {
    #[error("Failed to delete {bucket}/{key}: {error}")]
    BlobDelete {
        bucket: String,
        key: String,
        error: StorageError,
    },

    #[error("Rollback operation failed: {0}")]
    RollbackOperation(anyhow::Error),

    #[error("Transaction log error: {0}")]
    TransactionLog(#[from] TransactionLogError),
}
