//! Client-observable upload progress.
//!
//! Entries only move forward: the percentage never decreases and nothing changes
//! once an entry reached `completed` or `failed`. Updates that would violate either
//! rule are dropped silently.

use sitevault_core::{ProgressCallback, ProgressStatus, UploadProgress};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

#[derive(Default)]
pub struct ProgressTracker {
    entries: RwLock<HashMap<Uuid, UploadProgress>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `upload_id` at 0% if it is not tracked yet.
    pub fn start(&self, upload_id: Uuid) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(upload_id)
            .or_insert_with(|| UploadProgress::new(upload_id));
    }

    /// Apply an update and notify `observer` with the resulting snapshot.
    ///
    /// Returns `None` when the entry is unknown or already terminal. The observer is
    /// called after the lock is released.
    pub fn update(
        &self,
        upload_id: Uuid,
        progress: u8,
        status: ProgressStatus,
        observer: Option<&ProgressCallback>,
    ) -> Option<UploadProgress> {
        self.apply(upload_id, observer, |entry| {
            entry.progress = entry.progress.max(progress.min(100));
            if status_rank(status) > status_rank(entry.status) {
                entry.status = status;
            }
        })
    }

    pub fn complete(&self, upload_id: Uuid, observer: Option<&ProgressCallback>) -> Option<UploadProgress> {
        self.apply(upload_id, observer, |entry| {
            entry.progress = 100;
            entry.status = ProgressStatus::Completed;
        })
    }

    /// Mark the entry failed, keeping the percentage it reached.
    pub fn fail(
        &self,
        upload_id: Uuid,
        error: impl Into<String>,
        observer: Option<&ProgressCallback>,
    ) -> Option<UploadProgress> {
        let error = error.into();
        self.apply(upload_id, observer, move |entry| {
            entry.status = ProgressStatus::Failed;
            entry.error = Some(error);
        })
    }

    pub fn get(&self, upload_id: Uuid) -> Option<UploadProgress> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&upload_id)
            .cloned()
    }

    pub fn remove(&self, upload_id: Uuid) -> Option<UploadProgress> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&upload_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply<F>(&self, upload_id: Uuid, observer: Option<&ProgressCallback>, change: F) -> Option<UploadProgress>
    where
        F: FnOnce(&mut UploadProgress),
    {
        let snapshot = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let entry = entries.get_mut(&upload_id)?;
            if entry.status.is_terminal() {
                tracing::debug!(upload_id = %upload_id, status = %entry.status, "Ignoring progress update for finished upload");
                return None;
            }
            change(entry);
            entry.clone()
        };

        if let Some(observer) = observer {
            observer(&snapshot);
        }
        Some(snapshot)
    }
}

fn status_rank(status: ProgressStatus) -> u8 {
    match status {
        ProgressStatus::Uploading => 0,
        ProgressStatus::Processing => 1,
        ProgressStatus::Completed | ProgressStatus::Failed => 2,
    }
}

/// Maps a 0-100 sub-step onto a slice of an upload's overall progress.
///
/// A bulk upload gives each file its own scope so per-file reports add up to one
/// monotonic bar for the whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressScope {
    pub upload_id: Uuid,
    start: u8,
    end: u8,
}

impl ProgressScope {
    /// The whole 0-100 range.
    pub fn full(upload_id: Uuid) -> Self {
        Self::new(upload_id, 0, 100)
    }

    pub fn new(upload_id: Uuid, start: u8, end: u8) -> Self {
        let end = end.min(100);
        Self {
            upload_id,
            start: start.min(end),
            end,
        }
    }

    /// Slice `index` of `count` equal parts of `start..end`.
    pub fn part(upload_id: Uuid, start: u8, end: u8, index: usize, count: usize) -> Self {
        let count = count.max(1);
        let span = usize::from(end.saturating_sub(start));
        let lo = usize::from(start) + span * index / count;
        let hi = usize::from(start) + span * (index + 1) / count;
        Self::new(upload_id, lo as u8, hi as u8)
    }

    /// Overall percentage for `pct` percent of this scope.
    pub fn at(&self, pct: u8) -> u8 {
        let span = u16::from(self.end - self.start);
        self.start + (span * u16::from(pct.min(100)) / 100) as u8
    }
}
