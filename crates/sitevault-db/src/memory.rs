//! In-memory reference store, for tests and storage-only deployments.

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

use crate::reference::{ReferenceError, ReferenceStore};

#[derive(Default)]
pub struct InMemoryReferenceStore {
    references: RwLock<HashSet<(String, String)>>,
}

impl InMemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, bucket: &str, key: &str) {
        self.references
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()));
    }

    pub async fn remove(&self, bucket: &str, key: &str) -> bool {
        self.references
            .write()
            .await
            .remove(&(bucket.to_string(), key.to_string()))
    }
}

#[async_trait]
impl ReferenceStore for InMemoryReferenceStore {
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, ReferenceError> {
        Ok(self
            .references
            .read()
            .await
            .contains(&(bucket.to_string(), key.to_string())))
    }
}
