//! Audit-tracked decision store.
//!
//! Decisions are append-only: after creation the only mutable field is the
//! outcome pair, written by [`DecisionStore::update_outcome`].

use chrono::{DateTime, Utc};
use engram_common::{Decision, MemoryError, NewDecision, Result};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct DecisionFilter {
    /// When non-empty, only decisions whose tag set intersects these tags.
    pub tags: Vec<String>,
    /// Only decisions created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Clone)]
pub struct DecisionStore {
    pool: SqlitePool,
}

impl DecisionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn store(&self, instance_id: &str, new: NewDecision) -> Result<Decision> {
        let context = new.context.trim().to_string();
        if context.is_empty() {
            return Err(MemoryError::validation("context must not be empty"));
        }

        let decision_text = new.decision.trim().to_string();
        if decision_text.is_empty() {
            return Err(MemoryError::validation("decision must not be empty"));
        }

        let reasoning = crate::normalize_entries(new.reasoning);
        if reasoning.is_empty() {
            return Err(MemoryError::validation(
                "at least one reasoning entry is required",
            ));
        }

        let record = Decision {
            id: Uuid::new_v4().to_string(),
            instance_id: instance_id.to_string(),
            sender_id: new.sender_id.filter(|s| !s.trim().is_empty()),
            context,
            decision: decision_text,
            reasoning,
            alternatives: crate::normalize_entries(new.alternatives),
            tags: crate::normalize_tags(new.tags),
            outcome: None,
            outcome_at: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO decisions
             (id, instance_id, sender_id, context, decision, reasoning, alternatives, tags,
              outcome, outcome_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?)",
        )
        .bind(&record.id)
        .bind(&record.instance_id)
        .bind(&record.sender_id)
        .bind(&record.context)
        .bind(&record.decision)
        .bind(serde_json::to_string(&record.reasoning)?)
        .bind(serde_json::to_string(&record.alternatives)?)
        .bind(serde_json::to_string(&record.tags)?)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        debug!(
            decision_id = %record.id,
            instance_id = %instance_id,
            "Stored decision"
        );

        Ok(record)
    }

    pub async fn get(&self, instance_id: &str, id: &str) -> Result<Option<Decision>> {
        let row = sqlx::query("SELECT * FROM decisions WHERE id = ? AND instance_id = ?")
            .bind(id)
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decision_from_row).transpose()
    }

    /// Newest first by `created_at`. `limit` is clamped server-side
    /// regardless of the caller's request.
    pub async fn list(&self, instance_id: &str, filter: DecisionFilter) -> Result<Vec<Decision>> {
        let limit = crate::clamp_limit(filter.limit);
        let offset = filter.offset.unwrap_or(0).max(0);
        let since = filter.since.unwrap_or(DateTime::UNIX_EPOCH);

        // Tag filtering happens on the decoded rows; paging can only be
        // pushed into SQL when no tag filter applies.
        let rows = if filter.tags.is_empty() {
            sqlx::query(
                "SELECT * FROM decisions
                 WHERE instance_id = ? AND created_at >= ?
                 ORDER BY created_at DESC
                 LIMIT ? OFFSET ?",
            )
            .bind(instance_id)
            .bind(since)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT * FROM decisions
                 WHERE instance_id = ? AND created_at >= ?
                 ORDER BY created_at DESC",
            )
            .bind(instance_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?
        };

        let mut decisions = Vec::with_capacity(rows.len());
        for row in &rows {
            decisions.push(decision_from_row(row)?);
        }

        if !filter.tags.is_empty() {
            decisions.retain(|d| tags_intersect(&d.tags, &filter.tags));
            decisions = decisions
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect();
        }

        Ok(decisions)
    }

    /// Close the loop on a decision. Idempotent: re-setting replaces the
    /// prior outcome and refreshes `outcome_at`.
    pub async fn update_outcome(
        &self,
        instance_id: &str,
        id: &str,
        outcome: &str,
    ) -> Result<Decision> {
        let outcome = outcome.trim();
        if outcome.is_empty() {
            return Err(MemoryError::validation("outcome must not be empty"));
        }

        let result = sqlx::query(
            "UPDATE decisions SET outcome = ?, outcome_at = ?
             WHERE id = ? AND instance_id = ?",
        )
        .bind(outcome)
        .bind(Utc::now())
        .bind(id)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MemoryError::not_found(format!("decision {}", id)));
        }

        debug!(decision_id = %id, instance_id = %instance_id, "Recorded decision outcome");

        self.get(instance_id, id)
            .await?
            .ok_or_else(|| MemoryError::not_found(format!("decision {}", id)))
    }
}

fn decision_from_row(row: &SqliteRow) -> Result<Decision> {
    let reasoning: Vec<String> = serde_json::from_str(&row.try_get::<String, _>("reasoning")?)?;
    let alternatives: Vec<String> =
        serde_json::from_str(&row.try_get::<String, _>("alternatives")?)?;
    let tags: Vec<String> = serde_json::from_str(&row.try_get::<String, _>("tags")?)?;

    Ok(Decision {
        id: row.try_get("id")?,
        instance_id: row.try_get("instance_id")?,
        sender_id: row.try_get("sender_id")?,
        context: row.try_get("context")?,
        decision: row.try_get("decision")?,
        reasoning,
        alternatives,
        tags,
        outcome: row.try_get("outcome")?,
        outcome_at: row.try_get("outcome_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn tags_intersect(row_tags: &[String], wanted: &[String]) -> bool {
    row_tags.iter().any(|t| wanted.iter().any(|w| w == t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_intersect_requires_common_member() {
        let row = vec!["billing".to_string(), "upgrade".to_string()];
        assert!(tags_intersect(&row, &["upgrade".to_string()]));
        assert!(tags_intersect(
            &row,
            &["other".to_string(), "billing".to_string()]
        ));
        assert!(!tags_intersect(&row, &["unrelated".to_string()]));
        assert!(!tags_intersect(&row, &[]));
    }
}
