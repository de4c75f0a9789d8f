//! Per-instance memory configuration.
//!
//! The configuration row is explicit shared state, created lazily on first
//! access: any code path that needs an instance's quota or API key goes
//! through [`ConfigStore::get_or_create`], so an instance that has never been
//! touched gets a fresh random key the moment it is first addressed. The
//! ownership (`instances`) and session (`sessions`) tables are read-only
//! here; the provisioning and identity layers populate them.

use chrono::Utc;
use engram_common::{InstanceConfig, MemoryError, Result};
use rand::{distributions::Alphanumeric, Rng};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::info;

/// Default document quota for instances without an explicit plan override.
pub const DEFAULT_MAX_DOCUMENTS_MB: f64 = 50.0;

const KEY_SUFFIX_LEN: usize = 48;

#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
    default_quota_mb: f64,
}

impl ConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            default_quota_mb: DEFAULT_MAX_DOCUMENTS_MB,
        }
    }

    pub fn with_default_quota(pool: SqlitePool, default_quota_mb: f64) -> Self {
        Self {
            pool,
            default_quota_mb,
        }
    }

    /// Load the instance's configuration, creating it with a generated key
    /// and the default quota when absent.
    pub async fn get_or_create(&self, instance_id: &str) -> Result<InstanceConfig> {
        if instance_id.trim().is_empty() {
            return Err(MemoryError::validation("instance_id must not be empty"));
        }

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO instance_configs
             (instance_id, memory_api_key, max_documents_mb, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(instance_id)
        .bind(generate_key())
        .bind(self.default_quota_mb)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            info!(instance_id = %instance_id, "Created memory config for instance");
        }

        self.fetch(instance_id).await
    }

    /// Replace the instance's memory API key with a freshly generated one.
    /// The old key stops authorizing immediately.
    pub async fn rotate_key(&self, instance_id: &str) -> Result<InstanceConfig> {
        self.get_or_create(instance_id).await?;

        sqlx::query("UPDATE instance_configs SET memory_api_key = ? WHERE instance_id = ?")
            .bind(generate_key())
            .bind(instance_id)
            .execute(&self.pool)
            .await?;

        info!(instance_id = %instance_id, "Rotated memory API key");
        self.fetch(instance_id).await
    }

    /// Set the instance's document quota (plan changes flow through here).
    pub async fn set_quota(&self, instance_id: &str, max_documents_mb: f64) -> Result<InstanceConfig> {
        if !max_documents_mb.is_finite() || max_documents_mb <= 0.0 {
            return Err(MemoryError::validation(
                "max_documents_mb must be a positive number",
            ));
        }

        self.get_or_create(instance_id).await?;

        sqlx::query("UPDATE instance_configs SET max_documents_mb = ? WHERE instance_id = ?")
            .bind(max_documents_mb)
            .bind(instance_id)
            .execute(&self.pool)
            .await?;

        self.fetch(instance_id).await
    }

    /// Operator that owns the instance, per the provisioning layer.
    pub async fn owner_of(&self, instance_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT operator_id FROM instances WHERE id = ?")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => Some(row.try_get("operator_id")?),
            None => None,
        })
    }

    /// Operator behind a session token, per the identity layer.
    pub async fn operator_for_session(&self, token: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT operator_id FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => Some(row.try_get("operator_id")?),
            None => None,
        })
    }

    /// Record instance ownership. Called by the provisioning layer (and by
    /// tests standing in for it), never by request handlers.
    pub async fn upsert_owner(&self, instance_id: &str, operator_id: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO instances (id, operator_id) VALUES (?, ?)")
            .bind(instance_id)
            .bind(operator_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a session token. Called by the identity layer (and by tests
    /// standing in for it).
    pub async fn upsert_session(&self, token: &str, operator_id: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO sessions (token, operator_id) VALUES (?, ?)")
            .bind(token)
            .bind(operator_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch(&self, instance_id: &str) -> Result<InstanceConfig> {
        let row = sqlx::query(
            "SELECT instance_id, memory_api_key, max_documents_mb, created_at
             FROM instance_configs WHERE instance_id = ?",
        )
        .bind(instance_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(InstanceConfig {
            instance_id: row.try_get("instance_id")?,
            memory_api_key: row.try_get("memory_api_key")?,
            max_documents_mb: row.try_get("max_documents_mb")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn generate_key() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("emk_{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_long_and_distinct() {
        let a = generate_key();
        let b = generate_key();
        assert!(a.starts_with("emk_"));
        assert_eq!(a.len(), 4 + KEY_SUFFIX_LEN);
        assert_ne!(a, b);
    }
}
