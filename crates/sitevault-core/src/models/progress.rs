use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl ProgressStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Failed)
    }
}

impl Display for ProgressStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProgressStatus::Uploading => write!(f, "uploading"),
            ProgressStatus::Processing => write!(f, "processing"),
            ProgressStatus::Completed => write!(f, "completed"),
            ProgressStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Client-observable state of one upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub upload_id: Uuid,
    /// 0-100, non-decreasing until the status is terminal.
    pub progress: u8,
    pub status: ProgressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadProgress {
    pub fn new(upload_id: Uuid) -> Self {
        Self {
            upload_id,
            progress: 0,
            status: ProgressStatus::Uploading,
            error: None,
        }
    }
}
