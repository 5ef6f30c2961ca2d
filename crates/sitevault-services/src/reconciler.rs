//! Orphan reconciliation.
//!
//! Finds blobs no live transaction and no database row refers to, and deletes them.
//! Candidates must be older than a minimum age so uploads whose database write is
//! still in flight are never touched. A reference check that errors counts as
//! "referenced".

use chrono::{Duration as ChronoDuration, Utc};
use sitevault_core::CleanupResult;
use sitevault_db::ReferenceStore;
use sitevault_infra::retry;
use sitevault_storage::{Storage, StorageError};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::settings::ReconcilerSettings;
use crate::transaction_log::TransactionLog;

struct CleanupSchedule {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct OrphanReconciler {
    storage: Arc<dyn Storage>,
    log: Arc<dyn TransactionLog>,
    references: Arc<dyn ReferenceStore>,
    settings: ReconcilerSettings,
    schedule: Mutex<Option<CleanupSchedule>>,
}

impl OrphanReconciler {
    pub fn new(
        storage: Arc<dyn Storage>,
        log: Arc<dyn TransactionLog>,
        references: Arc<dyn ReferenceStore>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            storage,
            log,
            references,
            settings,
            schedule: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    /// Keys in `bucket` older than `older_than_minutes` that nothing refers to.
    ///
    /// Only listing errors fail the call; per-object reference failures skip the
    /// object.
    #[tracing::instrument(skip(self))]
    pub async fn find_orphaned_files(
        &self,
        bucket: &str,
        older_than_minutes: u64,
    ) -> Result<Vec<String>, StorageError> {
        let cutoff = i64::try_from(older_than_minutes)
            .ok()
            .and_then(ChronoDuration::try_minutes)
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            // Nothing can be that old.
            return Ok(Vec::new());
        };
        let page_size = self.settings.page_size.max(1);

        let mut orphans = Vec::new();
        let mut offset = 0;
        loop {
            let storage = &self.storage;
            let page = retry(&self.settings.retry, "storage.list", move || {
                storage.list(bucket, None, page_size, offset)
            })
            .await?;
            let fetched = page.len();

            for object in page {
                if object.created_at >= cutoff {
                    continue;
                }
                if self.log.is_referenced(bucket, &object.name) {
                    tracing::debug!(key = %object.name, "Skipping blob claimed by a live transaction");
                    continue;
                }
                match self.references.exists(bucket, &object.name).await {
                    Ok(true) => {}
                    Ok(false) => orphans.push(object.name),
                    Err(e) => {
                        tracing::warn!(
                            key = %object.name,
                            error = %e,
                            "Reference check failed, treating blob as referenced"
                        );
                    }
                }
            }

            if fetched < page_size {
                break;
            }
            offset += fetched;
        }

        tracing::debug!(orphans = orphans.len(), "Orphan scan finished");
        Ok(orphans)
    }

    /// Delete every orphan in `bucket`.
    ///
    /// Each key is checked against the transaction log again right before its
    /// delete, so an upload that started after the scan is left alone. In dry-run
    /// mode nothing is deleted and `cleaned_files` counts what would have been.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_orphaned_files(
        &self,
        bucket: &str,
        older_than_minutes: u64,
    ) -> Result<CleanupResult, StorageError> {
        let orphans = self.find_orphaned_files(bucket, older_than_minutes).await?;
        let mut result = CleanupResult {
            total_processed: orphans.len(),
            ..CleanupResult::default()
        };

        for key in &orphans {
            if self.log.is_referenced(bucket, key) {
                tracing::info!(key = %key, "Blob was claimed during cleanup, skipping");
                continue;
            }

            if self.settings.dry_run {
                tracing::info!(key = %key, "Dry run: would delete orphaned blob");
                result.cleaned_files += 1;
                continue;
            }

            let storage = &self.storage;
            let key_ref = key.as_str();
            match retry(&self.settings.retry, "storage.delete", move || {
                storage.delete(bucket, key_ref)
            })
            .await
            {
                Ok(()) => {
                    tracing::info!(key = %key, "Deleted orphaned blob");
                    result.cleaned_files += 1;
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Failed to delete orphaned blob");
                    result.failed_cleanups += 1;
                }
            }
        }

        tracing::info!(
            cleaned_files = result.cleaned_files,
            failed_cleanups = result.failed_cleanups,
            total_processed = result.total_processed,
            dry_run = self.settings.dry_run,
            "Orphan cleanup finished"
        );
        Ok(result)
    }

    /// One pass over every configured bucket. Bucket failures are logged and skipped.
    pub async fn run_once(&self) -> CleanupResult {
        let mut total = CleanupResult::default();
        for bucket in &self.settings.buckets {
            match self
                .cleanup_orphaned_files(bucket, self.settings.older_than_minutes)
                .await
            {
                Ok(result) => total.absorb(result),
                Err(e) => {
                    tracing::error!(bucket = %bucket, error = %e, "Orphan cleanup failed for bucket");
                }
            }
        }
        total
    }

    /// Run [`run_once`](Self::run_once) now and then once per `every`.
    ///
    /// Returns `false` without starting anything if a schedule is already running.
    /// The background task holds only a weak reference and exits once the
    /// reconciler is dropped.
    pub fn schedule_cleanup(self: &Arc<Self>, every: Duration) -> bool {
        let mut schedule = self.schedule.lock().unwrap_or_else(PoisonError::into_inner);
        if schedule.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            tracing::debug!("Orphan cleanup already scheduled");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(Self::cleanup_loop(Arc::downgrade(self), every, shutdown_rx));
        *schedule = Some(CleanupSchedule {
            shutdown_tx,
            handle,
        });

        tracing::info!(
            interval_secs = every.as_secs(),
            buckets = ?self.settings.buckets,
            "Orphan cleanup scheduled"
        );
        true
    }

    /// Stop the scheduled job and wait for an in-progress pass to finish.
    ///
    /// Returns `false` when nothing was scheduled.
    pub async fn stop_cleanup(&self) -> bool {
        let schedule = self
            .schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(schedule) = schedule else {
            return false;
        };

        if let Err(e) = schedule.shutdown_tx.send(()).await {
            tracing::debug!(error = %e, "Orphan cleanup task already stopped");
        }
        if let Err(e) = schedule.handle.await {
            tracing::warn!(error = %e, "Orphan cleanup task ended abnormally");
        }
        tracing::info!("Orphan cleanup stopped");
        true
    }

    pub fn is_scheduled(&self) -> bool {
        self.schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    async fn cleanup_loop(reconciler: Weak<Self>, every: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(reconciler) = reconciler.upgrade() else {
                        break;
                    };
                    tracing::info!("Starting scheduled orphan cleanup");
                    let result = reconciler.run_once().await;
                    tracing::info!(
                        cleaned_files = result.cleaned_files,
                        failed_cleanups = result.failed_cleanups,
                        total_processed = result.total_processed,
                        "Scheduled orphan cleanup completed"
                    );
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction_log::InMemoryTransactionLog;
    use sitevault_core::{TransactionMetadata, UploadTransaction};
    use sitevault_db::InMemoryReferenceStore;
    use sitevault_storage::MemoryStorage;
    use uuid::Uuid;

    struct Fixture {
        storage: Arc<MemoryStorage>,
        log: Arc<InMemoryTransactionLog>,
        references: Arc<InMemoryReferenceStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                storage: Arc::new(MemoryStorage::new("mem://blobs")),
                log: Arc::new(InMemoryTransactionLog::new()),
                references: Arc::new(InMemoryReferenceStore::new()),
            }
        }

        fn reconciler(&self, settings: ReconcilerSettings) -> OrphanReconciler {
            OrphanReconciler::new(
                self.storage.clone(),
                self.log.clone(),
                self.references.clone(),
                settings,
            )
        }

        async fn aged(&self, bucket: &str, key: &str, minutes: i64) {
            self.storage
                .put_at(bucket, key, b"x".to_vec(), Utc::now() - ChronoDuration::minutes(minutes))
                .await
                .unwrap();
        }
    }

    fn settings() -> ReconcilerSettings {
        ReconcilerSettings {
            buckets: vec!["drawings".to_string()],
            ..ReconcilerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_only_old_unreferenced_blobs_are_orphans() {
        let f = Fixture::new();
        f.aged("drawings", "old-orphan.pdf", 90).await;
        f.aged("drawings", "old-referenced.pdf", 90).await;
        f.aged("drawings", "fresh.pdf", 5).await;
        f.references.insert("drawings", "old-referenced.pdf").await;

        let orphans = f
            .reconciler(settings())
            .find_orphaned_files("drawings", 60)
            .await
            .unwrap();
        assert_eq!(orphans, vec!["old-orphan.pdf".to_string()]);
    }

    #[tokio::test]
    async fn test_log_claim_protects_blob() {
        let f = Fixture::new();
        f.aged("drawings", "in-flight.pdf", 90).await;
        f.log
            .register(UploadTransaction::new(
                "drawings",
                "in-flight.pdf",
                TransactionMetadata {
                    original_name: "a.pdf".to_string(),
                    size: 1,
                    content_type: "application/pdf".to_string(),
                    upload_id: Uuid::new_v4(),
                },
            ))
            .unwrap();

        let result = f
            .reconciler(settings())
            .cleanup_orphaned_files("drawings", 60)
            .await
            .unwrap();
        assert_eq!(result, CleanupResult::default());
        assert!(f.storage.exists("drawings", "in-flight.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_pages_through_listing() {
        let f = Fixture::new();
        for i in 0..7 {
            f.aged("drawings", &format!("orphan-{}.pdf", i), 120).await;
        }
        let reconciler = f.reconciler(ReconcilerSettings {
            page_size: 3,
            ..settings()
        });

        let result = reconciler.cleanup_orphaned_files("drawings", 60).await.unwrap();
        assert_eq!(result.cleaned_files, 7);
        assert_eq!(result.total_processed, 7);
        assert_eq!(f.storage.object_count("drawings").await, 0);
    }

    #[tokio::test]
    async fn test_dry_run_deletes_nothing() {
        let f = Fixture::new();
        f.aged("drawings", "orphan.pdf", 90).await;
        let reconciler = f.reconciler(ReconcilerSettings {
            dry_run: true,
            ..settings()
        });

        let result = reconciler.cleanup_orphaned_files("drawings", 60).await.unwrap();
        assert_eq!(result.cleaned_files, 1);
        assert!(f.storage.exists("drawings", "orphan.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_schedule_is_idempotent() {
        let f = Fixture::new();
        f.aged("drawings", "orphan.pdf", 90).await;
        let reconciler = Arc::new(f.reconciler(settings()));

        assert!(reconciler.schedule_cleanup(Duration::from_secs(3600)));
        assert!(!reconciler.schedule_cleanup(Duration::from_secs(3600)));
        assert!(reconciler.is_scheduled());

        // The first pass runs immediately.
        for _ in 0..100 {
            if f.storage.object_count("drawings").await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.storage.object_count("drawings").await, 0);

        assert!(reconciler.stop_cleanup().await);
        assert!(!reconciler.is_scheduled());
        assert!(!reconciler.stop_cleanup().await);
        assert!(reconciler.schedule_cleanup(Duration::from_secs(3600)));
        assert!(reconciler.stop_cleanup().await);
    }
}
