//! Sitevault CLI: one-off uploads and orphan sweeps against the configured storage.
//!
//! Configuration comes from the environment (see `Config::from_env`). Reconcile and
//! watch need DATABASE_URL so reference checks hit the real metadata tables.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sitevault_core::{Config, UploadConfig, UploadFile};
use sitevault_db::{InMemoryReferenceStore, PgReferenceStore, ReferenceStore};
use sitevault_services::{OrphanReconciler, ReconcilerSettings, UploadResponse, UploadService};
use sitevault_storage::{create_storage, Storage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sitevault", about = "Transactional upload coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file into a bucket
    Upload {
        /// Path to the file to upload
        file: PathBuf,
        /// Target bucket
        #[arg(long, default_value = "attachments")]
        bucket: String,
        /// Optional folder inside the bucket
        #[arg(long)]
        folder: Option<String>,
        /// Declared content type
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
    },
    /// Delete unreferenced blobs once
    Reconcile {
        /// Bucket to sweep (repeatable; defaults to CLEANUP_BUCKETS)
        #[arg(long)]
        bucket: Vec<String>,
        /// Minimum age in minutes (defaults to ORPHAN_MIN_AGE_MINUTES)
        #[arg(long)]
        older_than: Option<u64>,
        /// Report candidates without deleting them
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the orphan sweep periodically until interrupted
    Watch {
        /// Minutes between sweeps (defaults to CLEANUP_INTERVAL_MINUTES)
        #[arg(long)]
        interval_minutes: Option<u64>,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

fn minutes_to_duration(minutes: u64) -> Option<Duration> {
    minutes.checked_mul(60).map(Duration::from_secs)
}

async fn reference_store(config: &Config) -> anyhow::Result<Arc<dyn ReferenceStore>> {
    let pool = sitevault_db::connect(config).await?;
    Ok(Arc::new(PgReferenceStore::new(pool, &config.reference_bindings)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    sitevault_infra::init_telemetry(sitevault_infra::telemetry::DEFAULT_FILTER, config.log_json)
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let storage: Arc<dyn Storage> = create_storage(&config)
        .await
        .context("Failed to initialize storage")?;

    match cli.command {
        Commands::Upload {
            file,
            bucket,
            folder,
            content_type,
        } => {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("File path has no usable file name")?
                .to_string();
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            // Plain uploads never consult the reference store.
            let service = UploadService::from_config(
                &config,
                storage,
                Arc::new(InMemoryReferenceStore::new()),
            );
            let mut upload_config = UploadConfig::new(bucket);
            if let Some(folder) = folder {
                upload_config = upload_config.folder(folder);
            }

            let result = service
                .upload_file(&UploadFile::new(name, content_type, data), &upload_config)
                .await;
            print_json(&UploadResponse::from(&result))?;
            if let Err(failure) = result {
                return Err(failure.into());
            }
        }
        Commands::Reconcile {
            bucket,
            older_than,
            dry_run,
        } => {
            let mut settings = ReconcilerSettings::from(&config);
            if !bucket.is_empty() {
                settings.buckets = bucket;
            }
            if let Some(minutes) = older_than {
                settings.older_than_minutes = minutes;
            }
            settings.dry_run = dry_run;

            let reconciler = OrphanReconciler::new(
                storage,
                Arc::new(sitevault_services::InMemoryTransactionLog::new()),
                reference_store(&config).await?,
                settings,
            );
            let result = reconciler.run_once().await;
            print_json(&result)?;
        }
        Commands::Watch { interval_minutes } => {
            let every = match interval_minutes {
                Some(minutes) => minutes_to_duration(minutes)
                    .context("--interval-minutes is too large")?,
                None => config.cleanup_interval(),
            };
            if every.is_zero() {
                anyhow::bail!("--interval-minutes must be greater than 0");
            }

            let service =
                UploadService::from_config(&config, storage, reference_store(&config).await?);
            service.schedule_cleanup(every);
            tracing::info!(interval_secs = every.as_secs(), "Orphan cleanup scheduled");

            shutdown_signal().await;
            service.stop_cleanup().await;
            tracing::info!("Orphan cleanup stopped");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_minutes_conversion() {
        assert_eq!(minutes_to_duration(5), Some(Duration::from_secs(300)));
        assert_eq!(minutes_to_duration(0), Some(Duration::ZERO));
        assert_eq!(minutes_to_duration(u64::MAX), None);
    }

    #[test]
    fn test_watch_accepts_huge_interval_argument() {
        let cli = Cli::try_parse_from(["sitevault", "watch", "--interval-minutes", "18446744073709551615"])
            .unwrap();
        match cli.command {
            Commands::Watch { interval_minutes } => {
                assert!(minutes_to_duration(interval_minutes.unwrap()).is_none());
            }
            _ => panic!("expected watch"),
        }
    }
}
