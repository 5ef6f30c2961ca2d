use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of one attempt to land one blob.
///
/// ```text
/// pending -> uploaded -> committed
///    |          \-----> rolled_back
///    \-> failed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Uploaded,
    Committed,
    Failed,
    RolledBack,
}

impl TransactionStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Uploaded) | (Pending, Failed) | (Uploaded, Committed) | (Uploaded, RolledBack)
        )
    }

    /// No further transitions are possible.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::RolledBack | TransactionStatus::Failed
        )
    }

    /// Whether a transaction in this state still claims its blob.
    ///
    /// Everything except `rolled_back` counts: a `failed` upload may have been
    /// partially written by the backend and is left to age out through the log.
    pub fn holds_reference(self) -> bool {
        self != TransactionStatus::RolledBack
    }
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Uploaded => write!(f, "uploaded"),
            TransactionStatus::Committed => write!(f, "committed"),
            TransactionStatus::Failed => write!(f, "failed"),
            TransactionStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "uploaded" => Ok(TransactionStatus::Uploaded),
            "committed" => Ok(TransactionStatus::Committed),
            "failed" => Ok(TransactionStatus::Failed),
            "rolled_back" => Ok(TransactionStatus::RolledBack),
            _ => Err(anyhow::anyhow!("Invalid transaction status: {}", s)),
        }
    }
}

/// Attributes recorded alongside a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetadata {
    pub original_name: String,
    pub size: u64,
    pub content_type: String,
    /// Progress tracker entry that shares this transaction's lifetime.
    pub upload_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadTransaction {
    pub id: Uuid,
    pub bucket: String,
    pub file_path: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: TransactionMetadata,
}

impl UploadTransaction {
    /// Create a new `pending` transaction with a fresh id.
    pub fn new(
        bucket: impl Into<String>,
        file_path: impl Into<String>,
        metadata: TransactionMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            bucket: bucket.into(),
            file_path: file_path.into(),
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
            metadata,
        }
    }

    /// True when this transaction still claims `key` in `bucket`.
    pub fn references(&self, bucket: &str, key: &str) -> bool {
        self.status.holds_reference() && self.bucket == bucket && self.file_path == key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::*;

    const ALL: [TransactionStatus; 5] = [Pending, Uploaded, Committed, Failed, RolledBack];

    #[test]
    fn test_allowed_transitions() {
        assert!(Pending.can_transition_to(Uploaded));
        assert!(Pending.can_transition_to(Failed));
        assert!(Uploaded.can_transition_to(Committed));
        assert!(Uploaded.can_transition_to(RolledBack));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Pending.can_transition_to(Committed));
        assert!(!Pending.can_transition_to(RolledBack));
        assert!(!Uploaded.can_transition_to(Pending));
        assert!(!Uploaded.can_transition_to(Uploaded));
        assert!(!Committed.can_transition_to(RolledBack));
    }

    #[test]
    fn test_final_states_have_no_exits() {
        for from in ALL.into_iter().filter(|s| s.is_final()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_status_round_trips_through_string() {
        for status in ALL {
            assert_eq!(status.to_string().parse::<TransactionStatus>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_string(&RolledBack).unwrap(),
            "\"rolled_back\""
        );
    }

    #[test]
    fn test_rolled_back_releases_reference() {
        let mut tx = UploadTransaction::new(
            "drawings",
            "plans/1.pdf",
            TransactionMetadata {
                original_name: "1.pdf".to_string(),
                size: 10,
                content_type: "application/pdf".to_string(),
                upload_id: Uuid::new_v4(),
            },
        );
        assert!(tx.references("drawings", "plans/1.pdf"));
        assert!(!tx.references("attachments", "plans/1.pdf"));

        tx.status = RolledBack;
        assert!(!tx.references("drawings", "plans/1.pdf"));
    }
}
