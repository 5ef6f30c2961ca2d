//! Upload orchestrator.
//!
//! Lands one validated file in blob storage under a tracked transaction, and owns
//! the two ways a landed blob is finalized: commit (keep it) and rollback (delete
//! it). Every remote call goes through the retry executor.

use sitevault_core::{
    validate, ProgressStatus, TransactionMetadata, TransactionStatus, UploadConfig, UploadFile,
    UploadReceipt, UploadTransaction,
};
use sitevault_infra::{retry, RetryPolicy};
use sitevault_storage::{generate_object_key, PutOptions, Storage, StorageError};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{CompensationError, UploadError, UploadFailure};
use crate::progress::{ProgressScope, ProgressTracker};
use crate::settings::UploadSettings;
use crate::transaction_log::{schedule_removal, TransactionLog, TransactionLogError};

pub struct UploadOrchestrator {
    storage: Arc<dyn Storage>,
    log: Arc<dyn TransactionLog>,
    progress: Arc<ProgressTracker>,
    settings: UploadSettings,
}

impl UploadOrchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        log: Arc<dyn TransactionLog>,
        progress: Arc<ProgressTracker>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            storage,
            log,
            progress,
            settings,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn transaction_log(&self) -> &Arc<dyn TransactionLog> {
        &self.log
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Upload a single file with no database write attached.
    ///
    /// The transaction is left `uploaded`: the caller may [`commit`](Self::commit) or
    /// [`rollback`](Self::rollback) it once its own bookkeeping is done. Unfinalized
    /// transactions leave the log after the commit grace period.
    #[tracing::instrument(skip(self, file, config), fields(bucket = %config.bucket, file_name = %file.name))]
    pub async fn upload_file(
        &self,
        file: &UploadFile,
        config: &UploadConfig,
    ) -> Result<UploadReceipt, UploadFailure> {
        let upload_id = Uuid::new_v4();
        let (receipt, guard) = self.land(file, config, ProgressScope::full(upload_id)).await?;

        self.progress.complete(upload_id, config.on_progress.as_ref());
        self.expire(receipt.transaction_id, self.settings.commit_grace_period);
        guard.disarm();

        tracing::info!(
            upload_id = %upload_id,
            transaction_id = %receipt.transaction_id,
            file_path = %receipt.file_path,
            size_bytes = receipt.size,
            "File uploaded"
        );
        Ok(receipt)
    }

    /// Validate, register, and put one file, reporting progress inside `scope`.
    ///
    /// On success the transaction is `uploaded` and progress sits at 90% of the
    /// scope, and the returned guard settles the transaction if the caller is
    /// dropped before finalizing it. On failure nothing that was written is left
    /// claimed by a live transaction, except a `failed` upload the backend may have
    /// partially written.
    pub(crate) async fn land(
        &self,
        file: &UploadFile,
        config: &UploadConfig,
        scope: ProgressScope,
    ) -> Result<(UploadReceipt, TransactionGuard), UploadFailure> {
        let upload_id = scope.upload_id;
        validate(file, config).map_err(|e| {
            tracing::warn!(upload_id = %upload_id, file_name = %file.name, error = %e, "Upload rejected");
            UploadFailure::new(upload_id, e)
        })?;

        let extension = file.extension();
        let file_path = generate_object_key(config.folder.as_deref(), extension.as_deref());
        let transaction = UploadTransaction::new(
            config.bucket.clone(),
            file_path.clone(),
            TransactionMetadata {
                original_name: file.name.clone(),
                size: file.size(),
                content_type: file.content_type.clone(),
                upload_id,
            },
        );
        let transaction_id = self
            .log
            .register(transaction)
            .map_err(|e| UploadFailure::new(upload_id, e))?;
        let guard = TransactionGuard {
            log: self.log.clone(),
            progress: self.progress.clone(),
            transaction_id,
            upload_id,
            commit_grace_period: self.settings.commit_grace_period,
            rollback_grace_period: self.settings.rollback_grace_period,
            armed: true,
        };

        let observer = config.on_progress.as_ref();
        self.progress.start(upload_id);
        self.progress
            .update(upload_id, scope.at(10), ProgressStatus::Uploading, observer);

        let policy = self.policy_for(config);
        // Keys are fresh, so a retried attempt may only overwrite its own earlier try.
        let options = PutOptions {
            upsert: true,
            ..PutOptions::with_content_type(file.content_type.clone())
        };
        let (storage, bucket, key, options) =
            (&self.storage, config.bucket.as_str(), file_path.as_str(), &options);
        let put = retry(&policy, "storage.put", move || {
            storage.put(bucket, key, file.data.clone(), options)
        })
        .await;

        if let Err(e) = put {
            tracing::error!(
                upload_id = %upload_id,
                transaction_id = %transaction_id,
                bucket = %config.bucket,
                file_path = %file_path,
                error = %e,
                "Blob upload failed"
            );
            if let Err(log_err) = self.log.update_status(transaction_id, TransactionStatus::Failed) {
                tracing::warn!(transaction_id = %transaction_id, error = %log_err, "Failed to mark transaction failed");
            }
            self.progress.fail(upload_id, e.to_string(), observer);
            self.expire(transaction_id, self.settings.rollback_grace_period);
            return Err(UploadFailure::new(upload_id, e).with_transaction(transaction_id));
        }

        if let Err(e) = self.log.update_status(transaction_id, TransactionStatus::Uploaded) {
            tracing::error!(transaction_id = %transaction_id, error = %e, "Transaction vanished during upload");
            self.discard(&config.bucket, &file_path, &policy).await;
            self.progress.fail(upload_id, e.to_string(), observer);
            return Err(UploadFailure::new(upload_id, e).with_transaction(transaction_id));
        }
        self.progress
            .update(upload_id, scope.at(90), ProgressStatus::Processing, observer);

        let file_url = match self.file_url(&config.bucket, &file_path, &policy).await {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(transaction_id = %transaction_id, error = %e, "Failed to sign URL for uploaded blob");
                if let Err(comp) = self.rollback(transaction_id).await {
                    tracing::error!(transaction_id = %transaction_id, error = %comp, "Compensation failed");
                }
                self.progress.fail(upload_id, e.to_string(), observer);
                return Err(UploadFailure::new(upload_id, e).with_transaction(transaction_id));
            }
        };

        let receipt = UploadReceipt {
            bucket: config.bucket.clone(),
            file_path,
            file_url,
            upload_id,
            transaction_id,
            original_name: file.name.clone(),
            content_type: file.content_type.clone(),
            size: file.size(),
        };
        Ok((receipt, guard))
    }

    /// Keep the blob: `uploaded -> committed`.
    #[tracing::instrument(skip(self))]
    pub fn commit(&self, transaction_id: Uuid) -> Result<UploadTransaction, TransactionLogError> {
        let transaction = self
            .log
            .update_status(transaction_id, TransactionStatus::Committed)?;
        self.expire(transaction_id, self.settings.commit_grace_period);
        tracing::debug!(file_path = %transaction.file_path, "Transaction committed");
        Ok(transaction)
    }

    /// Undo a landed blob: delete it and mark the transaction `rolled_back`.
    ///
    /// The transaction is marked even when the delete fails, which hands the blob
    /// to the orphan reconciler. The delete failure is still returned so callers
    /// can log it.
    #[tracing::instrument(skip(self))]
    pub async fn rollback(&self, transaction_id: Uuid) -> Result<(), CompensationError> {
        let transaction = self
            .log
            .get(transaction_id)
            .ok_or(TransactionLogError::NotFound(transaction_id))?;
        if !transaction.status.can_transition_to(TransactionStatus::RolledBack) {
            return Err(TransactionLogError::InvalidTransition {
                id: transaction_id,
                from: transaction.status,
                to: TransactionStatus::RolledBack,
            }
            .into());
        }

        let (storage, bucket, key) = (
            &self.storage,
            transaction.bucket.as_str(),
            transaction.file_path.as_str(),
        );
        let deleted = retry(&self.settings.retry_policy(), "storage.delete", move || {
            storage.delete(bucket, key)
        })
        .await;

        self.log
            .update_status(transaction_id, TransactionStatus::RolledBack)?;
        self.expire(transaction_id, self.settings.rollback_grace_period);

        match deleted {
            Ok(()) => {
                tracing::info!(
                    bucket = %transaction.bucket,
                    file_path = %transaction.file_path,
                    "Transaction rolled back"
                );
                Ok(())
            }
            Err(error) => Err(CompensationError::BlobDelete {
                bucket: transaction.bucket,
                key: transaction.file_path,
                error,
            }),
        }
    }

    fn policy_for(&self, config: &UploadConfig) -> RetryPolicy {
        RetryPolicy::new(config.retry_attempts, self.settings.retry_base_delay)
            .with_timeout(config.timeout.or(self.settings.operation_timeout))
    }

    async fn file_url(
        &self,
        bucket: &str,
        key: &str,
        policy: &RetryPolicy,
    ) -> Result<String, StorageError> {
        match self.settings.signed_url_ttl {
            Some(ttl) => {
                let storage = &self.storage;
                retry(policy, "storage.sign", move || storage.sign(bucket, key, ttl)).await
            }
            None => Ok(self.storage.public_url(bucket, key)),
        }
    }

    async fn discard(&self, bucket: &str, key: &str, policy: &RetryPolicy) {
        let storage = &self.storage;
        if let Err(e) = retry(policy, "storage.delete", move || storage.delete(bucket, key)).await {
            tracing::error!(bucket = %bucket, key = %key, error = %e, "Failed to discard blob");
        }
    }

    /// Forget the transaction after `after`.
    pub(crate) fn expire(&self, transaction_id: Uuid, after: Duration) {
        expire(&self.log, &self.progress, transaction_id, after);
    }
}

/// Remove `transaction_id` from `log` after `after`. The progress entry goes with
/// the last transaction of its upload, so a batch keeps its entry until every file
/// has left the log.
fn expire(
    log: &Arc<dyn TransactionLog>,
    progress: &Arc<ProgressTracker>,
    transaction_id: Uuid,
    after: Duration,
) {
    let remaining = log.clone();
    let progress = progress.clone();
    let on_removed = move |transaction: UploadTransaction| {
        let upload_id = transaction.metadata.upload_id;
        if !remaining.tracks_upload(upload_id) {
            progress.remove(upload_id);
        }
    };

    if tokio::runtime::Handle::try_current().is_ok() {
        schedule_removal(log.clone(), transaction_id, after, on_removed);
    } else if let Some(transaction) = log.remove(transaction_id) {
        on_removed(transaction);
    }
}

/// Settles a landed transaction whose upload was abandoned before being finalized.
///
/// On drop, a transaction still `pending` (the put was interrupted) is marked
/// `failed`; one left `uploaded` keeps its blob claim for the commit grace period.
/// Either way it then expires from the log. Final states are left alone.
pub(crate) struct TransactionGuard {
    log: Arc<dyn TransactionLog>,
    progress: Arc<ProgressTracker>,
    transaction_id: Uuid,
    upload_id: Uuid,
    commit_grace_period: Duration,
    rollback_grace_period: Duration,
    armed: bool,
}

impl TransactionGuard {
    pub(crate) fn transaction_id(&self) -> Uuid {
        self.transaction_id
    }

    /// The caller has scheduled the transaction's expiry itself.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(transaction) = self.log.get(self.transaction_id) else {
            return;
        };

        let after = match transaction.status {
            TransactionStatus::Pending => {
                tracing::warn!(
                    transaction_id = %self.transaction_id,
                    file_path = %transaction.file_path,
                    "Upload dropped mid-put, marking transaction failed"
                );
                if let Err(e) = self
                    .log
                    .update_status(self.transaction_id, TransactionStatus::Failed)
                {
                    tracing::warn!(transaction_id = %self.transaction_id, error = %e, "Failed to mark transaction failed");
                }
                self.progress
                    .fail(self.upload_id, "Upload cancelled".to_string(), None);
                self.rollback_grace_period
            }
            TransactionStatus::Uploaded => {
                tracing::warn!(
                    transaction_id = %self.transaction_id,
                    file_path = %transaction.file_path,
                    "Upload dropped before it was finalized"
                );
                self.commit_grace_period
            }
            _ => return,
        };
        expire(&self.log, &self.progress, self.transaction_id, after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction_log::InMemoryTransactionLog;
    use sitevault_storage::MemoryStorage;

    fn orchestrator(storage: Arc<MemoryStorage>) -> (UploadOrchestrator, Arc<dyn TransactionLog>) {
        let log: Arc<dyn TransactionLog> = Arc::new(InMemoryTransactionLog::new());
        let settings = UploadSettings {
            retry_base_delay: Duration::from_millis(1),
            ..UploadSettings::default()
        };
        let orchestrator =
            UploadOrchestrator::new(storage, log.clone(), Arc::new(ProgressTracker::new()), settings);
        (orchestrator, log)
    }

    #[tokio::test]
    async fn test_upload_file() {
        let storage = Arc::new(MemoryStorage::new("mem://blobs"));
        let (orchestrator, log) = orchestrator(storage.clone());
        let file = UploadFile::new("Plan.PDF", "application/pdf", b"%PDF-1.7".to_vec());
        let config = UploadConfig::new("drawings").folder("projects/7");

        let receipt = orchestrator.upload_file(&file, &config).await.unwrap();

        assert!(receipt.file_path.starts_with("projects/7/"));
        assert!(receipt.file_path.ends_with(".pdf"));
        assert_eq!(receipt.file_url, format!("mem://blobs/drawings/{}", receipt.file_path));
        assert_eq!(receipt.size, 8);
        assert_eq!(storage.get("drawings", &receipt.file_path).await.unwrap(), "%PDF-1.7");
        assert_eq!(
            storage.content_type("drawings", &receipt.file_path).await.as_deref(),
            Some("application/pdf")
        );

        let tx = log.get(receipt.transaction_id).unwrap();
        assert_eq!(tx.status, TransactionStatus::Uploaded);
        assert_eq!(tx.metadata.upload_id, receipt.upload_id);

        let progress = orchestrator.progress().get(receipt.upload_id).unwrap();
        assert_eq!(progress.progress, 100);
        assert_eq!(progress.status, ProgressStatus::Completed);
    }

    #[tokio::test]
    async fn test_validation_failure_touches_nothing() {
        let storage = Arc::new(MemoryStorage::new("mem://blobs"));
        let (orchestrator, log) = orchestrator(storage.clone());
        let file = UploadFile::new("big.jpg", "image/jpeg", vec![0u8; 2048]);
        let config = UploadConfig::new("avatars").max_size(1024);

        let failure = orchestrator.upload_file(&file, &config).await.unwrap_err();

        assert!(matches!(failure.error, UploadError::Validation(_)));
        assert!(failure.transaction_id().is_none());
        assert!(orchestrator.progress().get(failure.upload_id).is_none());
        assert!(log.is_empty());
        assert_eq!(storage.object_count("avatars").await, 0);
    }

    #[tokio::test]
    async fn test_signed_url() {
        let storage = Arc::new(MemoryStorage::new("mem://blobs"));
        let log: Arc<dyn TransactionLog> = Arc::new(InMemoryTransactionLog::new());
        let settings = UploadSettings {
            signed_url_ttl: Some(Duration::from_secs(300)),
            ..UploadSettings::default()
        };
        let orchestrator =
            UploadOrchestrator::new(storage, log, Arc::new(ProgressTracker::new()), settings);

        let receipt = orchestrator
            .upload_file(&UploadFile::new("a.png", "image/png", vec![1u8]), &UploadConfig::new("avatars"))
            .await
            .unwrap();
        assert!(receipt.file_url.contains("?expires="));
    }

    #[tokio::test]
    async fn test_commit_and_rollback() {
        let storage = Arc::new(MemoryStorage::new("mem://blobs"));
        let (orchestrator, log) = orchestrator(storage.clone());
        let config = UploadConfig::new("attachments");

        let kept = orchestrator
            .upload_file(&UploadFile::new("a.txt", "text/plain", b"a".to_vec()), &config)
            .await
            .unwrap();
        let undone = orchestrator
            .upload_file(&UploadFile::new("b.txt", "text/plain", b"b".to_vec()), &config)
            .await
            .unwrap();

        orchestrator.commit(kept.transaction_id).unwrap();
        orchestrator.rollback(undone.transaction_id).await.unwrap();

        assert_eq!(log.get(kept.transaction_id).unwrap().status, TransactionStatus::Committed);
        assert_eq!(log.get(undone.transaction_id).unwrap().status, TransactionStatus::RolledBack);
        assert!(storage.exists("attachments", &kept.file_path).await.unwrap());
        assert!(!storage.exists("attachments", &undone.file_path).await.unwrap());
        assert!(!log.is_referenced("attachments", &undone.file_path));
    }

    #[tokio::test]
    async fn test_rollback_of_committed_is_rejected() {
        let storage = Arc::new(MemoryStorage::new("mem://blobs"));
        let (orchestrator, _log) = orchestrator(storage.clone());
        let receipt = orchestrator
            .upload_file(&UploadFile::new("a.txt", "text/plain", b"a".to_vec()), &UploadConfig::new("attachments"))
            .await
            .unwrap();
        orchestrator.commit(receipt.transaction_id).unwrap();

        let err = orchestrator.rollback(receipt.transaction_id).await.unwrap_err();
        assert!(matches!(
            err,
            CompensationError::TransactionLog(TransactionLogError::InvalidTransition { .. })
        ));
        assert!(storage.exists("attachments", &receipt.file_path).await.unwrap());
    }

    fn pending(log: &Arc<dyn TransactionLog>, upload_id: Uuid, key: &str) -> Uuid {
        let transaction = UploadTransaction::new(
            "drawings",
            key,
            TransactionMetadata {
                original_name: "sheet.pdf".to_string(),
                size: 4,
                content_type: "application/pdf".to_string(),
                upload_id,
            },
        );
        log.register(transaction).unwrap()
    }

    fn guard(orchestrator: &UploadOrchestrator, transaction_id: Uuid, upload_id: Uuid) -> TransactionGuard {
        TransactionGuard {
            log: orchestrator.log.clone(),
            progress: orchestrator.progress.clone(),
            transaction_id,
            upload_id,
            commit_grace_period: Duration::from_millis(10),
            rollback_grace_period: Duration::from_millis(10),
            armed: true,
        }
    }

    #[tokio::test]
    async fn test_dropped_guard_settles_transaction() {
        let (orchestrator, log) = orchestrator(Arc::new(MemoryStorage::new("mem://blobs")));
        let upload_id = Uuid::new_v4();
        orchestrator.progress().start(upload_id);
        let interrupted = pending(&log, upload_id, "a.pdf");
        let abandoned = pending(&log, Uuid::new_v4(), "b.pdf");
        log.update_status(abandoned, TransactionStatus::Uploaded).unwrap();

        drop(guard(&orchestrator, interrupted, upload_id));
        drop(guard(&orchestrator, abandoned, Uuid::new_v4()));

        assert_eq!(log.get(interrupted).unwrap().status, TransactionStatus::Failed);
        assert_eq!(log.get(abandoned).unwrap().status, TransactionStatus::Uploaded);
        assert_eq!(
            orchestrator.progress().get(upload_id).unwrap().status,
            ProgressStatus::Failed
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(log.is_empty());
        assert!(orchestrator.progress().get(upload_id).is_none());
    }

    #[tokio::test]
    async fn test_disarmed_guard_leaves_transaction_alone() {
        let (orchestrator, log) = orchestrator(Arc::new(MemoryStorage::new("mem://blobs")));
        let id = pending(&log, Uuid::new_v4(), "a.pdf");

        guard(&orchestrator, id, Uuid::new_v4()).disarm();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(log.get(id).unwrap().status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_batch_progress_outlives_first_transaction() {
        let (orchestrator, log) = orchestrator(Arc::new(MemoryStorage::new("mem://blobs")));
        let batch = Uuid::new_v4();
        orchestrator.progress().start(batch);
        let first = pending(&log, batch, "a.pdf");
        let second = pending(&log, batch, "b.pdf");

        orchestrator.expire(first, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(log.get(first).is_none());
        assert!(orchestrator.progress().get(batch).is_some());

        orchestrator.expire(second, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(orchestrator.progress().get(batch).is_none());
    }
}
