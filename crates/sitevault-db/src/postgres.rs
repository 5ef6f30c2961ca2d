//! Postgres-backed reference lookups.

use async_trait::async_trait;
use sitevault_core::ReferenceBinding;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::reference::{ReferenceError, ReferenceStore};

/// Reference store that checks one `table.column` per bucket.
#[derive(Clone)]
pub struct PgReferenceStore {
    pool: PgPool,
    /// bucket -> prepared existence query
    queries: HashMap<String, String>,
}

impl PgReferenceStore {
    /// Bindings are expected to come from [`ReferenceBinding`]'s parser, which
    /// only admits plain SQL identifiers.
    pub fn new(pool: PgPool, bindings: &[ReferenceBinding]) -> Self {
        let queries = bindings
            .iter()
            .map(|b| (b.bucket.clone(), existence_query(b)))
            .collect();
        Self { pool, queries }
    }

    pub fn buckets(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }
}

fn existence_query(binding: &ReferenceBinding) -> String {
    format!(
        r#"SELECT EXISTS(SELECT 1 FROM "{}" WHERE "{}" = $1)"#,
        binding.table, binding.column
    )
}

#[async_trait]
impl ReferenceStore for PgReferenceStore {
    #[tracing::instrument(skip(self), fields(db.operation = "reference_exists"))]
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, ReferenceError> {
        let query = self
            .queries
            .get(bucket)
            .ok_or_else(|| ReferenceError::UnknownBucket(bucket.to_string()))?;

        let found: bool = sqlx::query_scalar(query)
            .bind(key)
            .fetch_one(&self.pool)
            .await?;

        Ok(found)
    }
}
