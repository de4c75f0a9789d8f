//! Document storage quota tracking.
//!
//! Usage is always recomputed from the `documents` table rather than kept as
//! a counter, so deletes and failed ingestions can never leave it stale. The
//! check-then-write window during ingestion is closed by [`IngestLocks`]
//! (per-instance serialization) plus an in-transaction re-read of usage; see
//! `documents::DocumentStore::ingest`.

use engram_common::Result;
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Clone)]
pub struct QuotaTracker {
    pool: SqlitePool,
}

impl QuotaTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Total stored bytes across the instance's documents.
    pub async fn usage_bytes(&self, instance_id: &str) -> Result<i64> {
        usage_bytes_in(&self.pool, instance_id).await
    }

    /// Current usage in megabytes.
    pub async fn usage_mb(&self, instance_id: &str) -> Result<f64> {
        Ok(mb(self.usage_bytes(instance_id).await?))
    }
}

/// Sum stored bytes through an arbitrary executor so the same query can run
/// against the pool or inside an open write transaction.
pub(crate) async fn usage_bytes_in<'e, E>(executor: E, instance_id: &str) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let row = sqlx::query(
        "SELECT COALESCE(SUM(size_bytes), 0) AS used FROM documents WHERE instance_id = ?",
    )
    .bind(instance_id)
    .fetch_one(executor)
    .await?;

    Ok(row.try_get("used")?)
}

pub(crate) fn mb(bytes: i64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Per-instance ingest serialization.
///
/// Two concurrent ingestions for the same instance could otherwise both read
/// an under-quota usage figure and jointly overshoot the ceiling. Ingestion
/// holds the instance's lock across the usage check and the insert; separate
/// instances proceed in parallel.
#[derive(Clone, Default)]
pub struct IngestLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl IngestLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_instance(&self, instance_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lock()
            .entry(instance_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
