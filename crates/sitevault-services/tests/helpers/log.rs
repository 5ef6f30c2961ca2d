//! Transaction logs that misbehave.

use sitevault_services::{
    InMemoryTransactionLog, TransactionLog, TransactionLogError, TransactionStatus,
    UploadTransaction,
};
use uuid::Uuid;

/// Accepts every transition except `committed`, as if the commit step broke.
#[derive(Default)]
pub struct UncommittableLog {
    inner: InMemoryTransactionLog,
}

impl TransactionLog for UncommittableLog {
    fn register(&self, transaction: UploadTransaction) -> Result<Uuid, TransactionLogError> {
        self.inner.register(transaction)
    }

    fn get(&self, id: Uuid) -> Option<UploadTransaction> {
        self.inner.get(id)
    }

    fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> Result<UploadTransaction, TransactionLogError> {
        if status == TransactionStatus::Committed {
            let from = self
                .inner
                .get(id)
                .map(|t| t.status)
                .ok_or(TransactionLogError::NotFound(id))?;
            return Err(TransactionLogError::InvalidTransition { id, from, to: status });
        }
        self.inner.update_status(id, status)
    }

    fn remove(&self, id: Uuid) -> Option<UploadTransaction> {
        self.inner.remove(id)
    }

    fn is_referenced(&self, bucket: &str, key: &str) -> bool {
        self.inner.is_referenced(bucket, key)
    }

    fn tracks_upload(&self, upload_id: Uuid) -> bool {
        self.inner.tracks_upload(upload_id)
    }

    fn active_transactions(&self) -> Vec<UploadTransaction> {
        self.inner.active_transactions()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
