//! Entity types for the four memory stores.
//!
//! Every row is scoped by an opaque `instance_id` (one deployed agent and its
//! isolated memory). Rows may reference an external `sender_id` — an opaque
//! conversational-counterpart label that this subsystem neither owns nor
//! validates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An audit-tracked decision made by an agent.
///
/// Append-only except for the outcome pair, which is set by the single
/// "close the loop" operation and may be overwritten (last write wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub instance_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,

    /// The situation the decision was made in.
    pub context: String,

    /// What was decided.
    pub decision: String,

    /// Ordered, non-empty chain of reasoning steps.
    pub reasoning: Vec<String>,

    #[serde(default)]
    pub alternatives: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// Input for creating a decision. `instance_id` comes from the request scope.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDecision {
    #[serde(default)]
    pub sender_id: Option<String>,
    pub context: String,
    pub decision: String,
    pub reasoning: Vec<String>,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// An episodic summary of something that happened to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub instance_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,

    pub summary: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// When the event actually happened. Distinct from `created_at`:
    /// ingest time may lag the real event.
    pub happened_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEpisode {
    #[serde(default)]
    pub sender_id: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Defaults to creation time when not supplied.
    #[serde(default)]
    pub happened_at: Option<DateTime<Utc>>,
}

/// Per-counterpart profile, one per `(instance_id, sender_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub instance_id: String,
    pub sender_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub communication_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_focus: Option<String>,

    #[serde(default)]
    pub preferences: Vec<String>,

    pub updated_at: DateTime<Utc>,
}

/// Partial update for a profile. Fields left `None` are untouched by upsert;
/// an upsert is never a destructive replace.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub communication_style: Option<String>,
    #[serde(default)]
    pub current_focus: Option<String>,
    #[serde(default)]
    pub preferences: Option<Vec<String>>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.role.is_none()
            && self.timezone.is_none()
            && self.communication_style.is_none()
            && self.current_focus.is_none()
            && self.preferences.is_none()
    }
}

/// A fully loaded knowledge document, extracted text included.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub instance_id: String,
    pub filename: String,
    pub mime_type: String,
    pub content: String,
    pub size_bytes: i64,
    /// Present when the embedding provider was reachable at ingest time.
    /// Never serialized into API responses.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeDocument {
    /// Listing view of this document, content left behind.
    pub fn meta(&self) -> DocumentMeta {
        DocumentMeta {
            id: self.id.clone(),
            instance_id: self.instance_id.clone(),
            filename: self.filename.clone(),
            mime_type: self.mime_type.clone(),
            size_bytes: self.size_bytes,
            has_embedding: self.embedding.is_some(),
            created_at: self.created_at,
        }
    }
}

/// Listing view of a document. Content is loaded on demand by search, not
/// shipped with listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub instance_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub has_embedding: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for ingesting a document. `content` is the plain text produced by
/// the upstream extraction step; callers never send raw file bytes here.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDocument {
    pub filename: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    pub content: String,
    /// Original file size. Defaults to the extracted text length.
    #[serde(default)]
    pub size_bytes: Option<i64>,
}

fn default_mime_type() -> String {
    "text/plain".into()
}

/// Per-instance memory configuration, created lazily on first access.
///
/// `memory_api_key` is the only secret capable of programmatic (non-session)
/// access to that instance's memory.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceConfig {
    pub instance_id: String,
    pub memory_api_key: String,
    pub max_documents_mb: f64,
    pub created_at: DateTime<Utc>,
}
