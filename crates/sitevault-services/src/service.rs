use sitevault_core::{
    Config, UploadConfig, UploadFile, UploadProgress, UploadReceipt, UploadTransaction,
};
use sitevault_db::ReferenceStore;
use sitevault_storage::Storage;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::coordinator::{BulkTransactionalUpload, TransactionalCoordinator, TransactionalUpload};
use crate::error::{CompensationError, UploadFailure};
use crate::orchestrator::UploadOrchestrator;
use crate::progress::ProgressTracker;
use crate::reconciler::OrphanReconciler;
use crate::settings::{ReconcilerSettings, UploadSettings};
use crate::transaction_log::{InMemoryTransactionLog, TransactionLog, TransactionLogError};

/// Entry point wiring storage, the transaction log, the progress tracker, and the
/// reconciler together.
///
/// Instances share nothing: two services built side by side keep separate logs and
/// progress entries.
pub struct UploadService {
    orchestrator: Arc<UploadOrchestrator>,
    coordinator: TransactionalCoordinator,
    reconciler: Arc<OrphanReconciler>,
}

impl UploadService {
    pub fn new(
        storage: Arc<dyn Storage>,
        references: Arc<dyn ReferenceStore>,
        settings: UploadSettings,
        reconciler_settings: ReconcilerSettings,
    ) -> Self {
        Self::with_transaction_log(
            storage,
            references,
            Arc::new(InMemoryTransactionLog::new()),
            settings,
            reconciler_settings,
        )
    }

    pub fn from_config(
        config: &Config,
        storage: Arc<dyn Storage>,
        references: Arc<dyn ReferenceStore>,
    ) -> Self {
        Self::new(
            storage,
            references,
            UploadSettings::from(config),
            ReconcilerSettings::from(config),
        )
    }

    pub fn with_transaction_log(
        storage: Arc<dyn Storage>,
        references: Arc<dyn ReferenceStore>,
        log: Arc<dyn TransactionLog>,
        settings: UploadSettings,
        reconciler_settings: ReconcilerSettings,
    ) -> Self {
        let progress = Arc::new(ProgressTracker::new());
        let orchestrator = Arc::new(UploadOrchestrator::new(
            storage.clone(),
            log.clone(),
            progress,
            settings,
        ));
        let reconciler = Arc::new(OrphanReconciler::new(
            storage,
            log,
            references,
            reconciler_settings,
        ));

        Self {
            coordinator: TransactionalCoordinator::new(orchestrator.clone()),
            orchestrator,
            reconciler,
        }
    }

    pub async fn upload_file(
        &self,
        file: &UploadFile,
        config: &UploadConfig,
    ) -> Result<UploadReceipt, UploadFailure> {
        self.orchestrator.upload_file(file, config).await
    }

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
        self.coordinator
            .transactional_upload(file, config, database_operation)
            .await
    }

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
        self.coordinator
            .transactional_upload_with_rollback(file, config, database_operation, rollback_operation)
            .await
    }

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
        self.coordinator
            .bulk_upload_with_transaction(files, config, database_operation)
            .await
    }

    /// Finalize a plain upload the caller has recorded.
    pub fn commit(&self, transaction_id: Uuid) -> Result<UploadTransaction, TransactionLogError> {
        self.orchestrator.commit(transaction_id)
    }

    /// Undo a plain upload the caller could not record.
    pub async fn rollback(&self, transaction_id: Uuid) -> Result<(), CompensationError> {
        self.orchestrator.rollback(transaction_id).await
    }

    pub fn get_upload_progress(&self, upload_id: Uuid) -> Option<UploadProgress> {
        self.orchestrator.progress().get(upload_id)
    }

    pub fn transaction(&self, transaction_id: Uuid) -> Option<UploadTransaction> {
        self.orchestrator.transaction_log().get(transaction_id)
    }

    pub fn active_transactions(&self) -> Vec<UploadTransaction> {
        self.orchestrator.transaction_log().active_transactions()
    }

    pub fn reconciler(&self) -> &Arc<OrphanReconciler> {
        &self.reconciler
    }

    pub fn schedule_cleanup(&self, every: Duration) -> bool {
        self.reconciler.schedule_cleanup(every)
    }

    pub async fn stop_cleanup(&self) -> bool {
        self.reconciler.stop_cleanup().await
    }
}
