//! Transactional uploads.
//!
//! Pairs a blob upload with the caller's database write as a two-step saga: the
//! blob lands first, the caller's operation runs with the receipt, and the blob is
//! committed if the operation succeeds or deleted if it fails. Compensation
//! failures are logged and never mask the original error.

use futures::stream::{self, StreamExt};
use sitevault_core::{validate, ProgressStatus, UploadConfig, UploadFile, UploadReceipt};
use std::future::{Future, Ready};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CompensationError, UploadError, UploadFailure};
use crate::orchestrator::{TransactionGuard, UploadOrchestrator};
use crate::progress::ProgressScope;

/// A committed transactional upload.
#[derive(Debug, Clone)]
pub struct TransactionalUpload<T> {
    pub data: T,
    pub upload: UploadReceipt,
    pub transaction_id: Uuid,
}

/// A committed bulk upload. `uploads` and `transaction_ids` follow file order.
#[derive(Debug, Clone)]
pub struct BulkTransactionalUpload<T> {
    /// Progress entry covering the whole batch.
    pub upload_id: Uuid,
    pub data: T,
    pub uploads: Vec<UploadReceipt>,
    pub transaction_ids: Vec<Uuid>,
}

type NoRollback = fn(UploadReceipt) -> Ready<anyhow::Result<()>>;

pub struct TransactionalCoordinator {
    orchestrator: Arc<UploadOrchestrator>,
}

impl TransactionalCoordinator {
    pub fn new(orchestrator: Arc<UploadOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Upload `file`, then run `database_operation` with the receipt.
    ///
    /// If the operation fails the blob is deleted and the operation's error is
    /// returned unchanged.
    #[tracing::instrument(skip_all, fields(bucket = %config.bucket, file_name = %file.name))]
    pub async fn transactional_upload<T, F, Fut>(
        &self,
        file: &UploadFile,
        config: &UploadConfig,
        database_operation: F,
    ) -> Result<TransactionalUpload<T>, UploadFailure>
    where
        F: FnOnce(UploadReceipt) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.run(file, config, database_operation, None::<NoRollback>)
            .await
    }

    /// Like [`transactional_upload`](Self::transactional_upload), additionally running
    /// `rollback_operation` after the blob was deleted when the database write fails.
    ///
    /// A failing rollback operation is logged; the caller still sees the database error.
    #[tracing::instrument(skip_all, fields(bucket = %config.bucket, file_name = %file.name))]
    pub async fn transactional_upload_with_rollback<T, F, Fut, R, RFut>(
        &self,
        file: &UploadFile,
        config: &UploadConfig,
        database_operation: F,
        rollback_operation: R,
    ) -> Result<TransactionalUpload<T>, UploadFailure>
    where
        F: FnOnce(UploadReceipt) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        R: FnOnce(UploadReceipt) -> RFut,
        RFut: Future<Output = anyhow::Result<()>>,
    {
        self.run(file, config, database_operation, Some(rollback_operation))
            .await
    }

    async fn run<T, F, Fut, R, RFut>(
        &self,
        file: &UploadFile,
        config: &UploadConfig,
        database_operation: F,
        rollback_operation: Option<R>,
    ) -> Result<TransactionalUpload<T>, UploadFailure>
    where
        F: FnOnce(UploadReceipt) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        R: FnOnce(UploadReceipt) -> RFut,
        RFut: Future<Output = anyhow::Result<()>>,
    {
        let upload_id = Uuid::new_v4();
        let (receipt, guard) = self
            .orchestrator
            .land(file, config, ProgressScope::new(upload_id, 0, 80))
            .await?;
        let transaction_id = receipt.transaction_id;
        let progress = self.orchestrator.progress();
        let observer = config.on_progress.as_ref();

        match database_operation(receipt.clone()).await {
            Ok(data) => {
                progress.update(upload_id, 90, ProgressStatus::Processing, observer);
                self.finalize(guard);
                progress.complete(upload_id, observer);

                tracing::info!(
                    upload_id = %upload_id,
                    transaction_id = %transaction_id,
                    file_path = %receipt.file_path,
                    "Transactional upload committed"
                );
                Ok(TransactionalUpload {
                    data,
                    upload: receipt,
                    transaction_id,
                })
            }
            Err(error) => {
                tracing::warn!(
                    upload_id = %upload_id,
                    transaction_id = %transaction_id,
                    error = %error,
                    "Database operation failed, rolling back upload"
                );
                self.compensate(std::slice::from_ref(&receipt)).await;

                if let Some(rollback_operation) = rollback_operation {
                    if let Err(e) = rollback_operation(receipt).await {
                        let e = CompensationError::RollbackOperation(e);
                        tracing::error!(transaction_id = %transaction_id, error = %e, "Compensation failed");
                    }
                }

                progress.fail(upload_id, error.to_string(), observer);
                Err(UploadFailure::new(upload_id, UploadError::Database(error))
                    .with_transaction(transaction_id))
            }
        }
    }

    /// Upload every file, then run one `database_operation` over all receipts.
    ///
    /// All files are validated before any is uploaded. If any upload or the
    /// database write fails, every blob that landed is deleted. Files upload
    /// sequentially unless the bulk concurrency setting allows more.
    #[tracing::instrument(skip_all, fields(bucket = %config.bucket, file_count = files.len()))]
    pub async fn bulk_upload_with_transaction<T, F, Fut>(
        &self,
        files: &[UploadFile],
        config: &UploadConfig,
        database_operation: F,
    ) -> Result<BulkTransactionalUpload<T>, UploadFailure>
    where
        F: FnOnce(Vec<UploadReceipt>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let upload_id = Uuid::new_v4();
        if files.is_empty() {
            return Err(UploadFailure::new(upload_id, UploadError::EmptyBatch));
        }
        for file in files {
            validate(file, config).map_err(|e| {
                tracing::warn!(upload_id = %upload_id, file_name = %file.name, error = %e, "Bulk upload rejected");
                UploadFailure::new(upload_id, e)
            })?;
        }

        let progress = self.orchestrator.progress();
        let observer = config.on_progress.as_ref();
        progress.start(upload_id);
        progress.update(upload_id, 5, ProgressStatus::Uploading, observer);

        let (landed, guards, failure) = self.land_all(files, config, upload_id).await;
        let transaction_ids: Vec<Uuid> = landed.iter().map(|r| r.transaction_id).collect();

        if let Some(failure) = failure {
            tracing::warn!(
                upload_id = %upload_id,
                landed = landed.len(),
                error = %failure,
                "Bulk upload failed, rolling back landed files"
            );
            self.compensate(&landed).await;
            progress.fail(upload_id, failure.error.to_string(), observer);
            return Err(failure.with_transactions(transaction_ids));
        }

        let data = match database_operation(landed.clone()).await {
            Ok(data) => data,
            Err(error) => {
                tracing::warn!(
                    upload_id = %upload_id,
                    error = %error,
                    "Database operation failed, rolling back bulk upload"
                );
                self.compensate(&landed).await;
                progress.fail(upload_id, error.to_string(), observer);
                return Err(UploadFailure::new(upload_id, UploadError::Database(error))
                    .with_transactions(transaction_ids));
            }
        };
        progress.update(upload_id, 75, ProgressStatus::Processing, observer);

        let count = landed.len();
        for (index, guard) in guards.into_iter().enumerate() {
            self.finalize(guard);
            let scope = ProgressScope::part(upload_id, 75, 95, index, count);
            progress.update(upload_id, scope.at(100), ProgressStatus::Processing, observer);
        }
        progress.complete(upload_id, observer);

        tracing::info!(upload_id = %upload_id, file_count = count, "Bulk upload committed");
        Ok(BulkTransactionalUpload {
            upload_id,
            data,
            uploads: landed,
            transaction_ids,
        })
    }

    /// Land each file inside its share of the 5-65% band.
    ///
    /// After the first failure no new upload starts; uploads already in flight run
    /// to completion so none is left `pending`.
    async fn land_all(
        &self,
        files: &[UploadFile],
        config: &UploadConfig,
        upload_id: Uuid,
    ) -> (Vec<UploadReceipt>, Vec<TransactionGuard>, Option<UploadFailure>) {
        let count = files.len();
        let halted = &AtomicBool::new(false);
        let concurrency = self.orchestrator.settings().bulk_concurrency.max(1);

        let mut results = stream::iter(files.iter().enumerate())
            .map(move |(index, file)| async move {
                if halted.load(Ordering::SeqCst) {
                    return None;
                }
                let scope = ProgressScope::part(upload_id, 5, 65, index, count);
                let result = self.orchestrator.land(file, config, scope).await;
                if result.is_err() {
                    halted.store(true, Ordering::SeqCst);
                }
                Some(result)
            })
            .buffered(concurrency);

        let mut landed = Vec::with_capacity(count);
        let mut guards = Vec::with_capacity(count);
        let mut failure: Option<UploadFailure> = None;
        while let Some(result) = results.next().await {
            match result {
                Some(Ok((receipt, guard))) => {
                    landed.push(receipt);
                    guards.push(guard);
                }
                Some(Err(e)) if failure.is_none() => failure = Some(e),
                Some(Err(e)) => {
                    tracing::warn!(upload_id = %upload_id, error = %e, "Additional bulk upload failure");
                }
                None => {}
            }
        }
        (landed, guards, failure)
    }

    /// Commit the guarded transaction. A failure here leaves it `uploaded`, which
    /// still claims the blob, so the reconciler never deletes it while the
    /// transaction remains in the log (one commit grace period).
    fn finalize(&self, guard: TransactionGuard) {
        let transaction_id = guard.transaction_id();
        if let Err(e) = self.orchestrator.commit(transaction_id) {
            tracing::error!(
                transaction_id = %transaction_id,
                error = %e,
                "Failed to commit transaction, keeping blob"
            );
            self.orchestrator
                .expire(transaction_id, self.orchestrator.settings().commit_grace_period);
        }
        guard.disarm();
    }

    async fn compensate(&self, receipts: &[UploadReceipt]) {
        for receipt in receipts {
            if let Err(e) = self.orchestrator.rollback(receipt.transaction_id).await {
                tracing::error!(
                    transaction_id = %receipt.transaction_id,
                    bucket = %receipt.bucket,
                    file_path = %receipt.file_path,
                    error = %e,
                    "Compensation failed, blob left for the orphan reconciler"
                );
            }
        }
    }
}
