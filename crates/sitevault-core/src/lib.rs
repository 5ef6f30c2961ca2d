//! Sitevault Core Library
//!
//! This crate provides the domain models, validation, and configuration shared by
//! every sitevault component: upload transactions and their state machine, client
//! observable upload progress, reconciliation results, and the per-upload options.

pub mod config;
pub mod models;
pub mod storage_types;
pub mod validation;

// Re-export commonly used types
pub use config::{Config, ReferenceBinding};
pub use models::{
    CleanupResult, ProgressCallback, ProgressStatus, TransactionMetadata, TransactionStatus,
    UploadConfig, UploadFile, UploadProgress, UploadReceipt, UploadTransaction,
};
pub use storage_types::StorageBackend;
pub use validation::{validate, ValidationError};
