//! Knowledge document store with quota-enforced ingestion.

use chrono::Utc;
use engram_common::{DocumentMeta, KnowledgeDocument, MemoryError, NewDocument, Result};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ConfigStore;
use crate::db::{blob_to_embedding, embedding_to_blob};
use crate::embedding::{EmbeddingClient, EmbeddingOutcome};
use crate::quota::{self, IngestLocks};

#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
    configs: ConfigStore,
    embedder: Arc<dyn EmbeddingClient>,
    locks: IngestLocks,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool, configs: ConfigStore, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            pool,
            configs,
            embedder,
            locks: IngestLocks::new(),
        }
    }

    /// Metadata-only listing, newest first. Stable pagination: the digest
    /// compaction consumer pages through this without ever loading content.
    pub async fn list(
        &self,
        instance_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<DocumentMeta>> {
        let limit = crate::clamp_limit(limit);
        let offset = offset.unwrap_or(0).max(0);

        let rows = sqlx::query(
            "SELECT id, instance_id, filename, mime_type, size_bytes,
                    embedding IS NOT NULL AS has_embedding, created_at
             FROM documents
             WHERE instance_id = ?
             ORDER BY created_at DESC
             LIMIT ? OFFSET ?",
        )
        .bind(instance_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(meta_from_row).collect()
    }

    /// Full rows, content and embeddings included. Search loads on demand;
    /// listings never pay for this.
    pub async fn load_all(&self, instance_id: &str) -> Result<Vec<KnowledgeDocument>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE instance_id = ?")
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(document_from_row).collect()
    }

    /// Ingest extracted text as a new document.
    ///
    /// Validation and the embedding attempt happen before the write; the
    /// quota check and the insert share one transaction under the instance's
    /// ingest lock, so concurrent ingestions can never jointly exceed the
    /// quota.
    pub async fn ingest(&self, instance_id: &str, new: NewDocument) -> Result<KnowledgeDocument> {
        let filename = new.filename.trim().to_string();
        if filename.is_empty() {
            return Err(MemoryError::validation("filename must not be empty"));
        }

        // Empty extraction signals an unreadable source (e.g. a scanned
        // PDF); it is rejected before any quota accounting.
        if new.content.trim().is_empty() {
            return Err(MemoryError::EmptyContent);
        }

        let size_bytes = match new.size_bytes {
            Some(size) if size > 0 => size,
            Some(_) => {
                return Err(MemoryError::validation("size_bytes must be positive"));
            }
            None => new.content.len() as i64,
        };

        let config = self.configs.get_or_create(instance_id).await?;

        // Eager, best-effort: a missing vector leaves the row reachable by
        // lexical search only.
        let embedding = match self.embedder.embed(&new.content).await {
            EmbeddingOutcome::Embedded(vector) => Some(vector),
            EmbeddingOutcome::Unavailable => {
                debug!(
                    instance_id = %instance_id,
                    filename = %filename,
                    "Ingesting without embedding, provider unavailable"
                );
                None
            }
        };

        let record = KnowledgeDocument {
            id: Uuid::new_v4().to_string(),
            instance_id: instance_id.to_string(),
            filename,
            mime_type: new.mime_type,
            content: new.content,
            size_bytes,
            embedding,
            created_at: Utc::now(),
        };

        let lock = self.locks.for_instance(instance_id);
        let _guard = lock.lock().await;

        let mut tx = self.pool.begin().await?;

        // Usage is re-read inside the transaction: the figure the quota
        // check sees is the figure the insert commits against.
        let used_bytes = quota::usage_bytes_in(&mut *tx, instance_id).await?;
        let used_mb = quota::mb(used_bytes);
        let requested_mb = quota::mb(size_bytes);

        if used_mb + requested_mb > config.max_documents_mb {
            return Err(MemoryError::QuotaExceeded {
                used_mb,
                requested_mb,
                quota_mb: config.max_documents_mb,
            });
        }

        sqlx::query(
            "INSERT INTO documents
             (id, instance_id, filename, mime_type, content, size_bytes, embedding, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.instance_id)
        .bind(&record.filename)
        .bind(&record.mime_type)
        .bind(&record.content)
        .bind(record.size_bytes)
        .bind(record.embedding.as_deref().map(embedding_to_blob))
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            document_id = %record.id,
            instance_id = %instance_id,
            size_bytes = record.size_bytes,
            embedded = record.embedding.is_some(),
            "Ingested document"
        );

        Ok(record)
    }

    pub async fn delete(&self, instance_id: &str, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ? AND instance_id = ?")
            .bind(id)
            .bind(instance_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MemoryError::not_found(format!("document {}", id)));
        }

        info!(document_id = %id, instance_id = %instance_id, "Deleted document");
        Ok(())
    }
}

fn meta_from_row(row: &SqliteRow) -> Result<DocumentMeta> {
    Ok(DocumentMeta {
        id: row.try_get("id")?,
        instance_id: row.try_get("instance_id")?,
        filename: row.try_get("filename")?,
        mime_type: row.try_get("mime_type")?,
        size_bytes: row.try_get("size_bytes")?,
        has_embedding: row.try_get("has_embedding")?,
        created_at: row.try_get("created_at")?,
    })
}

fn document_from_row(row: &SqliteRow) -> Result<KnowledgeDocument> {
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;

    Ok(KnowledgeDocument {
        id: row.try_get("id")?,
        instance_id: row.try_get("instance_id")?,
        filename: row.try_get("filename")?,
        mime_type: row.try_get("mime_type")?,
        content: row.try_get("content")?,
        size_bytes: row.try_get("size_bytes")?,
        embedding: embedding.as_deref().map(blob_to_embedding),
        created_at: row.try_get("created_at")?,
    })
}
