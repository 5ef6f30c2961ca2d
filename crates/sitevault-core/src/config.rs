//! Configuration module
//!
//! Process-level settings for the upload coordinator and the orphan reconciler.
//! Per-upload options live in [`crate::models::UploadConfig`].

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::models::upload::DEFAULT_RETRY_ATTEMPTS;
use crate::storage_types::StorageBackend;

const RETRY_BASE_DELAY_MS: u64 = 1000;
const COMMIT_GRACE_PERIOD_SECS: u64 = 3600;
const ROLLBACK_GRACE_PERIOD_SECS: u64 = 60;
const CLEANUP_INTERVAL_MINUTES: u64 = 60;
const ORPHAN_MIN_AGE_MINUTES: u64 = 60;
const DEFAULT_CLEANUP_BUCKETS: &str = "drawings,attachments,avatars";
const DEFAULT_REFERENCE_BINDINGS: &str =
    "drawings=drawings.file_path,attachments=attachments.file_path,avatars=profiles.avatar_path";

static SQL_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Where the reconciler looks to decide whether a blob in `bucket` is referenced:
/// a row in `table` whose `column` equals the object key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceBinding {
    pub bucket: String,
    pub table: String,
    pub column: String,
}

impl FromStr for ReferenceBinding {
    type Err = anyhow::Error;

    /// Parses `bucket=table.column`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bucket, target) = s
            .trim()
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid reference binding (expected bucket=table.column): {}", s))?;
        let (table, column) = target
            .split_once('.')
            .ok_or_else(|| anyhow::anyhow!("Invalid reference binding (expected bucket=table.column): {}", s))?;

        let bucket = bucket.trim();
        let table = table.trim();
        let column = column.trim();

        if bucket.is_empty() {
            return Err(anyhow::anyhow!("Reference binding has an empty bucket: {}", s));
        }
        for ident in [table, column] {
            if !SQL_IDENTIFIER.is_match(ident) {
                return Err(anyhow::anyhow!("Invalid SQL identifier in reference binding: {}", ident));
            }
        }

        Ok(ReferenceBinding {
            bucket: bucket.to_string(),
            table: table.to_string(),
            column: column.to_string(),
        })
    }
}

impl Display for ReferenceBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}={}.{}", self.bucket, self.table, self.column)
    }
}

fn parse_bindings(raw: &str) -> Result<Vec<ReferenceBinding>, anyhow::Error> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub log_json: bool,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub local_storage_path: String,
    pub storage_public_base_url: String,
    /// Signed URL lifetime; 0 hands out public URLs instead.
    pub signed_url_ttl_secs: u64,
    // Metadata store
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub reference_bindings: Vec<ReferenceBinding>,
    // Upload coordination
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Per-attempt deadline for remote calls; 0 disables it.
    pub operation_timeout_secs: u64,
    pub commit_grace_period_secs: u64,
    pub rollback_grace_period_secs: u64,
    pub bulk_upload_concurrency: usize,
    // Orphan reconciliation
    pub cleanup_buckets: Vec<String>,
    pub cleanup_interval_minutes: u64,
    pub orphan_min_age_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_json: false,
            storage_backend: StorageBackend::Local,
            local_storage_path: "./data/blobs".to_string(),
            storage_public_base_url: "http://localhost:3000/storage".to_string(),
            signed_url_ttl_secs: 0,
            database_url: None,
            db_max_connections: 5,
            reference_bindings: parse_bindings(DEFAULT_REFERENCE_BINDINGS).unwrap_or_default(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay_ms: RETRY_BASE_DELAY_MS,
            operation_timeout_secs: 0,
            commit_grace_period_secs: COMMIT_GRACE_PERIOD_SECS,
            rollback_grace_period_secs: ROLLBACK_GRACE_PERIOD_SECS,
            bulk_upload_concurrency: 1,
            cleanup_buckets: parse_list(DEFAULT_CLEANUP_BUCKETS),
            cleanup_interval_minutes: CLEANUP_INTERVAL_MINUTES,
            orphan_min_age_minutes: ORPHAN_MIN_AGE_MINUTES,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or(defaults.environment);

        let log_json = env::var("LOG_FORMAT")
            .map(|v| v.trim().eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(v) => v.parse::<StorageBackend>()?,
            Err(_) => defaults.storage_backend,
        };

        let reference_bindings = match env::var("REFERENCE_BINDINGS") {
            Ok(v) => parse_bindings(&v)?,
            Err(_) => defaults.reference_bindings,
        };

        let cleanup_buckets = env::var("CLEANUP_BUCKETS")
            .map(|v| parse_list(&v))
            .unwrap_or(defaults.cleanup_buckets);

        let config = Config {
            environment,
            log_json,
            storage_backend,
            local_storage_path: env::var("LOCAL_STORAGE_PATH")
                .unwrap_or(defaults.local_storage_path),
            storage_public_base_url: env::var("STORAGE_PUBLIC_BASE_URL")
                .unwrap_or(defaults.storage_public_base_url),
            signed_url_ttl_secs: env_or("SIGNED_URL_TTL_SECS", defaults.signed_url_ttl_secs),
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", defaults.db_max_connections),
            reference_bindings,
            retry_attempts: env_or("UPLOAD_RETRY_ATTEMPTS", defaults.retry_attempts),
            retry_base_delay_ms: env_or("UPLOAD_RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
            operation_timeout_secs: env_or(
                "UPLOAD_OPERATION_TIMEOUT_SECS",
                defaults.operation_timeout_secs,
            ),
            commit_grace_period_secs: env_or(
                "COMMIT_GRACE_PERIOD_SECS",
                defaults.commit_grace_period_secs,
            ),
            rollback_grace_period_secs: env_or(
                "ROLLBACK_GRACE_PERIOD_SECS",
                defaults.rollback_grace_period_secs,
            ),
            bulk_upload_concurrency: env_or(
                "BULK_UPLOAD_CONCURRENCY",
                defaults.bulk_upload_concurrency,
            ),
            cleanup_buckets,
            cleanup_interval_minutes: env_or(
                "CLEANUP_INTERVAL_MINUTES",
                defaults.cleanup_interval_minutes,
            ),
            orphan_min_age_minutes: env_or("ORPHAN_MIN_AGE_MINUTES", defaults.orphan_min_age_minutes),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.retry_attempts == 0 {
            return Err(anyhow::anyhow!("UPLOAD_RETRY_ATTEMPTS must be at least 1"));
        }
        if self.bulk_upload_concurrency == 0 {
            return Err(anyhow::anyhow!("BULK_UPLOAD_CONCURRENCY must be at least 1"));
        }
        if self.cleanup_interval_minutes == 0 {
            return Err(anyhow::anyhow!("CLEANUP_INTERVAL_MINUTES must be at least 1"));
        }
        if self.storage_public_base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("STORAGE_PUBLIC_BASE_URL cannot be empty"));
        }
        for bucket in &self.cleanup_buckets {
            if self.binding_for(bucket).is_none() {
                tracing::warn!(
                    bucket = %bucket,
                    "No reference binding for cleanup bucket; every object will be treated as referenced"
                );
            }
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn binding_for(&self, bucket: &str) -> Option<&ReferenceBinding> {
        self.reference_bindings.iter().find(|b| b.bucket == bucket)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_secs > 0).then(|| Duration::from_secs(self.operation_timeout_secs))
    }

    pub fn signed_url_ttl(&self) -> Option<Duration> {
        (self.signed_url_ttl_secs > 0).then(|| Duration::from_secs(self.signed_url_ttl_secs))
    }

    pub fn commit_grace_period(&self) -> Duration {
        Duration::from_secs(self.commit_grace_period_secs)
    }

    pub fn rollback_grace_period(&self) -> Duration {
        Duration::from_secs(self.rollback_grace_period_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes.saturating_mul(60))
    }
}
