//! Sitevault Services Layer
//!
//! Transactional upload coordination between blob storage and a relational store:
//! the upload orchestrator lands files under tracked transactions, the coordinator
//! pairs each landing with the caller's database write and compensates when that
//! write fails, and the orphan reconciler sweeps up whatever a crash or a failed
//! compensation left behind. [`UploadService`] wires them together.

pub mod coordinator;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod reconciler;
pub mod response;
pub mod service;
pub mod settings;
pub mod transaction_log;

pub use coordinator::{BulkTransactionalUpload, TransactionalCoordinator, TransactionalUpload};
pub use error::{CompensationError, UploadError, UploadFailure};
pub use orchestrator::UploadOrchestrator;
pub use progress::{ProgressScope, ProgressTracker};
pub use reconciler::OrphanReconciler;
pub use response::{TransactionalResponse, UploadResponse};
pub use service::UploadService;
pub use settings::{ReconcilerSettings, UploadSettings};
pub use transaction_log::{
    schedule_removal, InMemoryTransactionLog, TransactionLog, TransactionLogError,
};

pub use sitevault_core::{
    CleanupResult, Config, ProgressStatus, TransactionStatus, UploadConfig, UploadFile,
    UploadProgress, UploadReceipt, UploadTransaction,
};
pub use sitevault_db::{InMemoryReferenceStore, ReferenceStore};
pub use sitevault_storage::{create_storage, LocalStorage, MemoryStorage, Storage, StorageError};
