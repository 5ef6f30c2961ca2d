use sitevault_core::Config;
use sitevault_infra::RetryPolicy;
use std::time::Duration;

/// Process-wide knobs for the upload orchestrator and the transactional coordinator.
///
/// Per-upload options (bucket, size limits, attempts) live in
/// [`sitevault_core::UploadConfig`] instead.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Attempts for compensating deletes, which have no per-upload config.
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    /// Default per-attempt deadline when the upload config sets none.
    pub operation_timeout: Option<Duration>,
    /// Hand out signed URLs with this lifetime instead of public ones.
    pub signed_url_ttl: Option<Duration>,
    /// How long committed (and never-finalized uploaded) transactions stay in the log.
    pub commit_grace_period: Duration,
    /// How long rolled back and failed transactions stay in the log.
    pub rollback_grace_period: Duration,
    /// Files uploaded at once by a bulk upload. 1 means sequential.
    pub bulk_concurrency: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for UploadSettings {
    fn from(config: &Config) -> Self {
        Self {
            retry_attempts: config.retry_attempts,
            retry_base_delay: config.retry_base_delay(),
            operation_timeout: config.operation_timeout(),
            signed_url_ttl: config.signed_url_ttl(),
            commit_grace_period: config.commit_grace_period(),
            rollback_grace_period: config.rollback_grace_period(),
            bulk_concurrency: config.bulk_upload_concurrency.max(1),
        }
    }
}

impl UploadSettings {
    /// Policy for remote calls made without a per-upload config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_base_delay).with_timeout(self.operation_timeout)
    }
}

/// Settings for the orphan reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Buckets swept by the scheduled job.
    pub buckets: Vec<String>,
    /// Objects younger than this are never considered orphans by the scheduled job.
    pub older_than_minutes: u64,
    /// Objects fetched per listing call.
    pub page_size: usize,
    /// Report what would be deleted without deleting anything.
    pub dry_run: bool,
    pub retry: RetryPolicy,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ReconcilerSettings {
    fn from(config: &Config) -> Self {
        Self {
            buckets: config.cleanup_buckets.clone(),
            older_than_minutes: config.orphan_min_age_minutes,
            page_size: 1000,
            dry_run: false,
            retry: RetryPolicy::new(config.retry_attempts, config.retry_base_delay())
                .with_timeout(config.operation_timeout()),
        }
    }
}
