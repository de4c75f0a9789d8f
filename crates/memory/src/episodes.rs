//! Episodic summary store.

use chrono::{DateTime, Utc};
use engram_common::{Episode, MemoryError, NewEpisode, Result};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct EpisodeFilter {
    /// Restrict to episodes involving one conversational counterpart.
    pub sender_id: Option<String>,
    /// Only episodes that happened at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Clone)]
pub struct EpisodeStore {
    pool: SqlitePool,
}

impl EpisodeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn store(&self, instance_id: &str, new: NewEpisode) -> Result<Episode> {
        let summary = new.summary.trim().to_string();
        if summary.is_empty() {
            return Err(MemoryError::validation("summary must not be empty"));
        }

        let created_at = Utc::now();
        let record = Episode {
            id: Uuid::new_v4().to_string(),
            instance_id: instance_id.to_string(),
            sender_id: new.sender_id.filter(|s| !s.trim().is_empty()),
            summary,
            tags: crate::normalize_tags(new.tags),
            // Ingest may lag the real event; callers supply happened_at when
            // they know better than "now".
            happened_at: new.happened_at.unwrap_or(created_at),
            created_at,
        };

        sqlx::query(
            "INSERT INTO episodes
             (id, instance_id, sender_id, summary, tags, happened_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.instance_id)
        .bind(&record.sender_id)
        .bind(&record.summary)
        .bind(serde_json::to_string(&record.tags)?)
        .bind(record.happened_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        debug!(
            episode_id = %record.id,
            instance_id = %instance_id,
            "Stored episode"
        );

        Ok(record)
    }

    /// Newest `happened_at` first.
    pub async fn list(&self, instance_id: &str, filter: EpisodeFilter) -> Result<Vec<Episode>> {
        let limit = crate::clamp_limit(filter.limit);
        let since = filter.since.unwrap_or(DateTime::UNIX_EPOCH);

        let rows = match filter.sender_id {
            Some(ref sender_id) => {
                sqlx::query(
                    "SELECT * FROM episodes
                     WHERE instance_id = ? AND sender_id = ? AND happened_at >= ?
                     ORDER BY happened_at DESC
                     LIMIT ?",
                )
                .bind(instance_id)
                .bind(sender_id)
                .bind(since)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM episodes
                     WHERE instance_id = ? AND happened_at >= ?
                     ORDER BY happened_at DESC
                     LIMIT ?",
                )
                .bind(instance_id)
                .bind(since)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(episode_from_row).collect()
    }
}

fn episode_from_row(row: &SqliteRow) -> Result<Episode> {
    let tags: Vec<String> = serde_json::from_str(&row.try_get::<String, _>("tags")?)?;

    Ok(Episode {
        id: row.try_get("id")?,
        instance_id: row.try_get("instance_id")?,
        sender_id: row.try_get("sender_id")?,
        summary: row.try_get("summary")?,
        tags,
        happened_at: row.try_get("happened_at")?,
        created_at: row.try_get("created_at")?,
    })
}
