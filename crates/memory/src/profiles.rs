//! Per-counterpart profile store.
//!
//! One profile per `(instance_id, sender_id)`. Upsert is a partial merge:
//! fields absent from the patch keep their stored value, so independent
//! writers can each contribute what they learned without clobbering the rest.

use chrono::Utc;
use engram_common::{MemoryError, Profile, ProfilePatch, Result};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::debug;

#[derive(Clone)]
pub struct ProfileStore {
    pool: SqlitePool,
}

impl ProfileStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, instance_id: &str, sender_id: &str) -> Result<Option<Profile>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE instance_id = ? AND sender_id = ?")
            .bind(instance_id)
            .bind(sender_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(profile_from_row).transpose()
    }

    /// Create or merge. Never a destructive replace: the read and the write
    /// share one transaction so concurrent upserts cannot lose fields.
    pub async fn upsert(
        &self,
        instance_id: &str,
        sender_id: &str,
        patch: ProfilePatch,
    ) -> Result<Profile> {
        if sender_id.trim().is_empty() {
            return Err(MemoryError::validation("sender_id must not be empty"));
        }

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT * FROM profiles WHERE instance_id = ? AND sender_id = ?")
            .bind(instance_id)
            .bind(sender_id)
            .fetch_optional(&mut *tx)
            .await?;

        let mut profile = match existing {
            Some(ref row) => profile_from_row(row)?,
            None => Profile {
                instance_id: instance_id.to_string(),
                sender_id: sender_id.to_string(),
                name: None,
                role: None,
                timezone: None,
                communication_style: None,
                current_focus: None,
                preferences: Vec::new(),
                updated_at: Utc::now(),
            },
        };

        merge_patch(&mut profile, patch);
        profile.updated_at = Utc::now();

        sqlx::query(
            "INSERT OR REPLACE INTO profiles
             (instance_id, sender_id, name, role, timezone, communication_style,
              current_focus, preferences, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&profile.instance_id)
        .bind(&profile.sender_id)
        .bind(&profile.name)
        .bind(&profile.role)
        .bind(&profile.timezone)
        .bind(&profile.communication_style)
        .bind(&profile.current_focus)
        .bind(serde_json::to_string(&profile.preferences)?)
        .bind(profile.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            instance_id = %instance_id,
            sender_id = %sender_id,
            "Upserted profile"
        );

        Ok(profile)
    }

    /// No-op when the profile does not exist.
    pub async fn delete(&self, instance_id: &str, sender_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM profiles WHERE instance_id = ? AND sender_id = ?")
            .bind(instance_id)
            .bind(sender_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Field-wise last-writer-wins: only fields present in the patch change.
fn merge_patch(profile: &mut Profile, patch: ProfilePatch) {
    if let Some(name) = patch.name {
        profile.name = Some(name);
    }
    if let Some(role) = patch.role {
        profile.role = Some(role);
    }
    if let Some(timezone) = patch.timezone {
        profile.timezone = Some(timezone);
    }
    if let Some(style) = patch.communication_style {
        profile.communication_style = Some(style);
    }
    if let Some(focus) = patch.current_focus {
        profile.current_focus = Some(focus);
    }
    if let Some(preferences) = patch.preferences {
        profile.preferences = preferences;
    }
}

fn profile_from_row(row: &SqliteRow) -> Result<Profile> {
    let preferences: Vec<String> =
        serde_json::from_str(&row.try_get::<String, _>("preferences")?)?;

    Ok(Profile {
        instance_id: row.try_get("instance_id")?,
        sender_id: row.try_get("sender_id")?,
        name: row.try_get("name")?,
        role: row.try_get("role")?,
        timezone: row.try_get("timezone")?,
        communication_style: row.try_get("communication_style")?,
        current_focus: row.try_get("current_focus")?,
        preferences,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_profile() -> Profile {
        Profile {
            instance_id: "i".into(),
            sender_id: "s".into(),
            name: None,
            role: None,
            timezone: None,
            communication_style: None,
            current_focus: None,
            preferences: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn merge_leaves_absent_fields_untouched() {
        let mut profile = empty_profile();
        profile.name = Some("Ana".into());
        profile.preferences = vec!["short replies".into()];

        merge_patch(
            &mut profile,
            ProfilePatch {
                role: Some("admin".into()),
                ..Default::default()
            },
        );

        assert_eq!(profile.name.as_deref(), Some("Ana"));
        assert_eq!(profile.role.as_deref(), Some("admin"));
        assert_eq!(profile.preferences, vec!["short replies".to_string()]);
    }

    #[test]
    fn merge_overwrites_supplied_fields() {
        let mut profile = empty_profile();
        profile.current_focus = Some("launch".into());

        merge_patch(
            &mut profile,
            ProfilePatch {
                current_focus: Some("hiring".into()),
                preferences: Some(vec!["bullet points".into()]),
                ..Default::default()
            },
        );

        assert_eq!(profile.current_focus.as_deref(), Some("hiring"));
        assert_eq!(profile.preferences, vec!["bullet points".to_string()]);
    }
}
