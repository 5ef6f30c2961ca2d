//! Wire shapes for reporting upload outcomes to clients.

use serde::Serialize;
use sitevault_core::UploadReceipt;
use uuid::Uuid;

use crate::coordinator::{BulkTransactionalUpload, TransactionalUpload};
use crate::error::UploadFailure;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub upload_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,
}

impl From<&UploadReceipt> for UploadResponse {
    fn from(receipt: &UploadReceipt) -> Self {
        Self {
            success: true,
            file_path: Some(receipt.file_path.clone()),
            file_url: Some(receipt.file_url.clone()),
            error: None,
            upload_id: receipt.upload_id,
            transaction_id: Some(receipt.transaction_id),
        }
    }
}

impl From<&UploadFailure> for UploadResponse {
    fn from(failure: &UploadFailure) -> Self {
        Self {
            success: false,
            file_path: None,
            file_url: None,
            error: Some(failure.to_string()),
            upload_id: failure.upload_id,
            transaction_id: failure.transaction_id(),
        }
    }
}

impl From<&Result<UploadReceipt, UploadFailure>> for UploadResponse {
    fn from(result: &Result<UploadReceipt, UploadFailure>) -> Self {
        match result {
            Ok(receipt) => receipt.into(),
            Err(failure) => failure.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionalResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_result: Option<UploadResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,
}

impl<T> TransactionalResponse<T> {
    pub fn failed(failure: &UploadFailure) -> Self {
        Self {
            success: false,
            data: None,
            upload_result: Some(failure.into()),
            error: Some(failure.to_string()),
            transaction_id: failure.transaction_id(),
        }
    }
}

impl<T> From<Result<TransactionalUpload<T>, UploadFailure>> for TransactionalResponse<T> {
    fn from(result: Result<TransactionalUpload<T>, UploadFailure>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                upload_result: Some((&outcome.upload).into()),
                data: Some(outcome.data),
                error: None,
                transaction_id: Some(outcome.transaction_id),
            },
            Err(failure) => Self::failed(&failure),
        }
    }
}

/// Bulk results report the batch's first transaction; per-file details are in `data`.
impl<T> From<Result<BulkTransactionalUpload<T>, UploadFailure>> for TransactionalResponse<T> {
    fn from(result: Result<BulkTransactionalUpload<T>, UploadFailure>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                upload_result: None,
                data: Some(outcome.data),
                error: None,
                transaction_id: outcome.transaction_ids.first().copied(),
            },
            Err(failure) => Self::failed(&failure),
        }
    }
}
