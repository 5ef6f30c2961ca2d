//! Reference stores that misbehave.

use async_trait::async_trait;
use sitevault_db::{ReferenceError, ReferenceStore};

/// Every lookup fails, as if the database were unreachable.
pub struct FailingReferenceStore;

#[async_trait]
impl ReferenceStore for FailingReferenceStore {
    async fn exists(&self, _bucket: &str, _key: &str) -> Result<bool, ReferenceError> {
        Err(ReferenceError::Lookup("connection refused".to_string()))
    }
}
