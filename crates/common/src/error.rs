//! Error types for the Engram memory service.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    /// Access Guard denial. Deliberately carries no detail: callers must not
    /// be able to distinguish "no such instance" from "wrong credential".
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "Document quota exceeded: {used_mb:.2}MB stored + {requested_mb:.2}MB requested > {quota_mb:.2}MB quota"
    )]
    QuotaExceeded {
        used_mb: f64,
        requested_mb: f64,
        quota_mb: f64,
    },

    /// Extraction produced no usable text (e.g. a scanned or image-only
    /// source). Distinct from quota failure so clients can tell the two apart.
    #[error("Document content is empty after extraction")]
    EmptyContent,

    #[error("Upstream collaborator unavailable: {0}")]
    Upstream(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MemoryError {
    /// Stable machine-checkable error kind, carried alongside the
    /// human-readable message in every failure response.
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::Unauthorized => "UNAUTHORIZED",
            MemoryError::Validation(_) => "VALIDATION",
            MemoryError::NotFound(_) => "NOT_FOUND",
            MemoryError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            MemoryError::EmptyContent => "EMPTY_CONTENT",
            MemoryError::Upstream(_) => "UPSTREAM_UNAVAILABLE",
            MemoryError::Storage(_) => "STORAGE",
            MemoryError::Serialization(_) => "STORAGE",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        MemoryError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        MemoryError::NotFound(what.into())
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
