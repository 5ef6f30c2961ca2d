//! Transaction log.
//!
//! Keeps one [`UploadTransaction`] per attempt to land a blob so the reconciler can
//! tell in-flight uploads apart from orphans. The log is a fast path, not a source
//! of truth: it lives in memory, and after a crash any blob it forgot is judged by
//! the reference store alone.

use chrono::Utc;
use sitevault_core::{TransactionStatus, UploadTransaction};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionLogError {
    #[error("Transaction not found: {0}")]
    NotFound(Uuid),

    #[error("Transaction {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Transaction already registered: {0}")]
    AlreadyRegistered(Uuid),
}

pub trait TransactionLog: Send + Sync {
    /// Record a new transaction. Ids are never reused.
    fn register(&self, transaction: UploadTransaction) -> Result<Uuid, TransactionLogError>;

    fn get(&self, id: Uuid) -> Option<UploadTransaction>;

    /// Move a transaction along the state machine, bumping `updated_at`.
    fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> Result<UploadTransaction, TransactionLogError>;

    fn remove(&self, id: Uuid) -> Option<UploadTransaction>;

    /// True when some live transaction still claims `key` in `bucket`.
    fn is_referenced(&self, bucket: &str, key: &str) -> bool;

    /// True while any transaction recorded under `upload_id` is still in the log.
    fn tracks_upload(&self, upload_id: Uuid) -> bool;

    /// Transactions that have not reached a final state.
    fn active_transactions(&self) -> Vec<UploadTransaction>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local [`TransactionLog`].
#[derive(Default)]
pub struct InMemoryTransactionLog {
    transactions: RwLock<HashMap<Uuid, UploadTransaction>>,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionLog for InMemoryTransactionLog {
    fn register(&self, transaction: UploadTransaction) -> Result<Uuid, TransactionLogError> {
        let mut transactions = self.transactions.write().unwrap_or_else(PoisonError::into_inner);
        let id = transaction.id;
        if transactions.contains_key(&id) {
            return Err(TransactionLogError::AlreadyRegistered(id));
        }
        transactions.insert(id, transaction);
        Ok(id)
    }

    fn get(&self, id: Uuid) -> Option<UploadTransaction> {
        self.transactions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> Result<UploadTransaction, TransactionLogError> {
        let mut transactions = self.transactions.write().unwrap_or_else(PoisonError::into_inner);
        let transaction = transactions
            .get_mut(&id)
            .ok_or(TransactionLogError::NotFound(id))?;

        if !transaction.status.can_transition_to(status) {
            return Err(TransactionLogError::InvalidTransition {
                id,
                from: transaction.status,
                to: status,
            });
        }

        transaction.status = status;
        transaction.updated_at = Utc::now();
        Ok(transaction.clone())
    }

    fn remove(&self, id: Uuid) -> Option<UploadTransaction> {
        self.transactions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    fn is_referenced(&self, bucket: &str, key: &str) -> bool {
        self.transactions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|t| t.references(bucket, key))
    }

    fn tracks_upload(&self, upload_id: Uuid) -> bool {
        self.transactions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|t| t.metadata.upload_id == upload_id)
    }

    fn active_transactions(&self) -> Vec<UploadTransaction> {
        let mut active: Vec<_> = self
            .transactions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|t| !t.status.is_final())
            .cloned()
            .collect();
        active.sort_by_key(|t| t.created_at);
        active
    }

    fn len(&self) -> usize {
        self.transactions.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Drop transaction `id` from `log` once `after` has elapsed.
///
/// `on_removed` runs with the removed transaction, if it was still there.
pub fn schedule_removal<F>(
    log: Arc<dyn TransactionLog>,
    id: Uuid,
    after: Duration,
    on_removed: F,
) -> JoinHandle<()>
where
    F: FnOnce(UploadTransaction) + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        if let Some(transaction) = log.remove(id) {
            tracing::debug!(
                transaction_id = %id,
                status = %transaction.status,
                "Transaction removed from log"
            );
            on_removed(transaction);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitevault_core::TransactionMetadata;

    fn transaction(bucket: &str, key: &str) -> UploadTransaction {
        UploadTransaction::new(
            bucket,
            key,
            TransactionMetadata {
                original_name: "plan.pdf".to_string(),
                size: 4,
                content_type: "application/pdf".to_string(),
                upload_id: Uuid::new_v4(),
            },
        )
    }

    #[test]
    fn test_register_and_transition() {
        let log = InMemoryTransactionLog::new();
        let tx = transaction("drawings", "p/1.pdf");
        let created = tx.updated_at;
        let id = log.register(tx).unwrap();

        let updated = log.update_status(id, TransactionStatus::Uploaded).unwrap();
        assert_eq!(updated.status, TransactionStatus::Uploaded);
        assert!(updated.updated_at >= created);

        log.update_status(id, TransactionStatus::Committed).unwrap();
        assert_eq!(log.get(id).unwrap().status, TransactionStatus::Committed);
    }

    #[test]
    fn test_rejects_invalid_transition() {
        let log = InMemoryTransactionLog::new();
        let id = log.register(transaction("drawings", "k")).unwrap();

        let err = log.update_status(id, TransactionStatus::Committed).unwrap_err();
        assert_eq!(
            err,
            TransactionLogError::InvalidTransition {
                id,
                from: TransactionStatus::Pending,
                to: TransactionStatus::Committed,
            }
        );
        assert_eq!(log.get(id).unwrap().status, TransactionStatus::Pending);
    }

    #[test]
    fn test_final_states_are_final() {
        let log = InMemoryTransactionLog::new();
        let id = log.register(transaction("drawings", "k")).unwrap();
        log.update_status(id, TransactionStatus::Failed).unwrap();
        assert!(log.update_status(id, TransactionStatus::Uploaded).is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let log = InMemoryTransactionLog::new();
        let tx = transaction("drawings", "k");
        log.register(tx.clone()).unwrap();
        assert_eq!(
            log.register(tx.clone()),
            Err(TransactionLogError::AlreadyRegistered(tx.id))
        );
    }

    #[test]
    fn test_unknown_transaction() {
        let log = InMemoryTransactionLog::new();
        let id = Uuid::new_v4();
        assert_eq!(
            log.update_status(id, TransactionStatus::Uploaded),
            Err(TransactionLogError::NotFound(id))
        );
    }

    #[test]
    fn test_rolled_back_releases_reference() {
        let log = InMemoryTransactionLog::new();
        let id = log.register(transaction("attachments", "a.pdf")).unwrap();
        assert!(log.is_referenced("attachments", "a.pdf"));
        assert!(!log.is_referenced("drawings", "a.pdf"));

        log.update_status(id, TransactionStatus::Uploaded).unwrap();
        log.update_status(id, TransactionStatus::RolledBack).unwrap();
        assert!(!log.is_referenced("attachments", "a.pdf"));
    }

    #[test]
    fn test_failed_keeps_reference() {
        let log = InMemoryTransactionLog::new();
        let id = log.register(transaction("attachments", "a.pdf")).unwrap();
        log.update_status(id, TransactionStatus::Failed).unwrap();
        assert!(log.is_referenced("attachments", "a.pdf"));
    }

    #[test]
    fn test_active_transactions() {
        let log = InMemoryTransactionLog::new();
        let pending = log.register(transaction("drawings", "a")).unwrap();
        let done = log.register(transaction("drawings", "b")).unwrap();
        log.update_status(done, TransactionStatus::Failed).unwrap();

        let active = log.active_transactions();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, pending);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_tracks_upload_until_last_transaction_leaves() {
        let log = InMemoryTransactionLog::new();
        let batch = Uuid::new_v4();
        let mut first = transaction("drawings", "a");
        first.metadata.upload_id = batch;
        let mut second = transaction("drawings", "b");
        second.metadata.upload_id = batch;
        let first = log.register(first).unwrap();
        let second = log.register(second).unwrap();

        log.remove(first);
        assert!(log.tracks_upload(batch));
        log.remove(second);
        assert!(!log.tracks_upload(batch));
    }

    #[tokio::test]
    async fn test_schedule_removal() {
        let log: Arc<dyn TransactionLog> = Arc::new(InMemoryTransactionLog::new());
        let id = log.register(transaction("drawings", "a")).unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        schedule_removal(log.clone(), id, Duration::from_millis(10), move |removed| {
            let _ = tx.send(removed.id);
        })
        .await
        .unwrap();

        assert_eq!(rx.await.unwrap(), id);
        assert!(log.get(id).is_none());
    }
}
