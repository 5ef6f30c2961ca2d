//! Shared fixtures for the sitevault-services integration tests.
//!
//! Run from the workspace root: `cargo test -p sitevault-services`.
#![allow(dead_code)]

pub mod log;
pub mod references;
pub mod storage;

use sitevault_services::{
    InMemoryReferenceStore, ReconcilerSettings, ReferenceStore, Storage, UploadService,
    UploadSettings,
};
use std::sync::Arc;
use std::time::Duration;

pub use log::UncommittableLog;
pub use references::FailingReferenceStore;
pub use storage::FlakyStorage;

pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Settings with a 1 ms backoff so retry tests stay fast.
pub fn fast_settings() -> UploadSettings {
    UploadSettings {
        retry_base_delay: Duration::from_millis(1),
        ..UploadSettings::default()
    }
}

pub fn fast_reconciler_settings() -> ReconcilerSettings {
    let mut settings = ReconcilerSettings::default();
    settings.retry.base_delay = Duration::from_millis(1);
    settings
}

pub struct TestService {
    pub service: UploadService,
    pub storage: Arc<FlakyStorage>,
    pub references: Arc<InMemoryReferenceStore>,
}

impl TestService {
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: UploadSettings) -> Self {
        let storage = Arc::new(FlakyStorage::new());
        let references = Arc::new(InMemoryReferenceStore::new());
        let service = UploadService::new(
            storage.clone() as Arc<dyn Storage>,
            references.clone() as Arc<dyn ReferenceStore>,
            settings,
            fast_reconciler_settings(),
        );
        Self {
            service,
            storage,
            references,
        }
    }
}
