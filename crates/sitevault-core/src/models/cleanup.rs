use serde::{Deserialize, Serialize};

/// Outcome of one reconciliation pass. Returned for logging, never persisted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub cleaned_files: usize,
    pub failed_cleanups: usize,
    pub total_processed: usize,
}

impl CleanupResult {
    /// Fold another pass (e.g. another bucket) into this one.
    pub fn absorb(&mut self, other: CleanupResult) {
        self.cleaned_files += other.cleaned_files;
        self.failed_cleanups += other.failed_cleanups;
        self.total_processed += other.total_processed;
    }
}
