//! SQLite persistence layer.
//!
//! One pool per process, WAL journal mode so readers never block the single
//! writer. Schema creation is idempotent; `connect` can be called against an
//! existing database file.

use engram_common::Result;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

/// Open (or create) the database at `db_path` and ensure the schema exists.
pub async fn connect(db_path: &str) -> Result<SqlitePool> {
    let url = format!("sqlite://{}?mode=rwc", db_path);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA journal_mode = WAL")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&url)
        .await?;

    migrate(&pool).await?;

    info!(db_path = %db_path, "Memory database ready");
    Ok(pool)
}

/// Create all tables and indexes if they do not exist yet.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS instance_configs (
            instance_id      TEXT PRIMARY KEY,
            memory_api_key   TEXT NOT NULL,
            max_documents_mb REAL NOT NULL,
            created_at       TEXT NOT NULL
        )
        "#,
        // Ownership and session rows are written by the provisioning and
        // identity layers; this service only reads them.
        r#"
        CREATE TABLE IF NOT EXISTS instances (
            id          TEXT PRIMARY KEY,
            operator_id TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token       TEXT PRIMARY KEY,
            operator_id TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS decisions (
            id           TEXT PRIMARY KEY,
            instance_id  TEXT NOT NULL,
            sender_id    TEXT,
            context      TEXT NOT NULL,
            decision     TEXT NOT NULL,
            reasoning    TEXT NOT NULL,
            alternatives TEXT NOT NULL,
            tags         TEXT NOT NULL,
            outcome      TEXT,
            outcome_at   TEXT,
            created_at   TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_decisions_instance_created
         ON decisions(instance_id, created_at DESC)",
        r#"
        CREATE TABLE IF NOT EXISTS episodes (
            id          TEXT PRIMARY KEY,
            instance_id TEXT NOT NULL,
            sender_id   TEXT,
            summary     TEXT NOT NULL,
            tags        TEXT NOT NULL,
            happened_at TEXT NOT NULL,
            created_at  TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_episodes_instance_happened
         ON episodes(instance_id, happened_at DESC)",
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            instance_id         TEXT NOT NULL,
            sender_id           TEXT NOT NULL,
            name                TEXT,
            role                TEXT,
            timezone            TEXT,
            communication_style TEXT,
            current_focus       TEXT,
            preferences         TEXT NOT NULL,
            updated_at          TEXT NOT NULL,
            PRIMARY KEY (instance_id, sender_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id          TEXT PRIMARY KEY,
            instance_id TEXT NOT NULL,
            filename    TEXT NOT NULL,
            mime_type   TEXT NOT NULL,
            content     TEXT NOT NULL,
            size_bytes  INTEGER NOT NULL,
            embedding   BLOB,
            created_at  TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_documents_instance_created
         ON documents(instance_id, created_at DESC)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Encode an embedding vector as little-endian f32 bytes for BLOB storage.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode a BLOB column back into an embedding vector. Trailing bytes that
/// do not form a full f32 are ignored.
pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_blob_roundtrip() {
        let embedding = vec![0.25_f32, -1.5, 3.0, 0.0];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_embedding(&blob), embedding);
    }

    #[test]
    fn blob_decode_ignores_trailing_bytes() {
        let mut blob = embedding_to_blob(&[1.0_f32]);
        blob.push(0xFF);
        assert_eq!(blob_to_embedding(&blob), vec![1.0_f32]);
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engram.db");
        let pool = connect(path.to_str().unwrap()).await.unwrap();
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();
    }
}
