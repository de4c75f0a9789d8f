//! Durable memory layer for deployed conversational agents.
//!
//! Each agent instance accumulates four structured memory kinds, all scoped
//! by an opaque instance identifier and never visible across instances:
//!
//! - **Decisions**: audit-tracked choices with ordered reasoning and a
//!   close-the-loop outcome field
//! - **Episodes**: timestamped summaries of what happened
//! - **Profiles**: one partial-merge profile per conversational counterpart
//! - **Documents**: quota-bounded corpus of ingested knowledge text
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────┐
//!                    │    Retriever     │  one query, concurrent fan-out
//!                    └───┬────┬────┬────┘
//!            embed once  │    │    │
//!       ┌────────────────┤    │    ├────────────────┐
//!       ▼                ▼    ▼    ▼                ▼
//! ┌───────────┐  ┌──────────┐ ┌──────────┐  ┌────────────┐
//! │ Documents │  │ Decisions│ │ Episodes │  │  Profiles  │
//! │ (hybrid)  │  │ (newest) │ │ (sender) │  │  (sender)  │
//! └─────┬─────┘  └──────────┘ └──────────┘  └────────────┘
//!       │ vector when embeddable, lexical fallback otherwise
//! ```
//!
//! Document ingestion passes the quota tracker; the usage check and the
//! insert share one transaction under a per-instance lock.

pub mod config;
pub mod db;
pub mod decisions;
pub mod documents;
pub mod embedding;
pub mod episodes;
pub mod profiles;
pub mod quota;
pub mod retrieval;

pub use config::{ConfigStore, DEFAULT_MAX_DOCUMENTS_MB};
pub use decisions::{DecisionFilter, DecisionStore};
pub use documents::DocumentStore;
pub use embedding::{cosine_similarity, EmbeddingClient, EmbeddingOutcome, HttpEmbeddingClient};
pub use episodes::{EpisodeFilter, EpisodeStore};
pub use profiles::ProfileStore;
pub use quota::QuotaTracker;
pub use retrieval::{DocumentHit, Retriever, SearchRequest, SearchResponse};

/// Hard ceiling applied to every list operation regardless of the caller's
/// requested page size.
pub const MAX_LIST_LIMIT: i64 = 200;

const DEFAULT_LIST_LIMIT: i64 = 50;

pub(crate) fn clamp_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// Trim entries and drop blanks, preserving order.
pub(crate) fn normalize_entries(entries: Vec<String>) -> Vec<String> {
    entries
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

/// Tags have set semantics: trimmed, blanks dropped, duplicates removed
/// with first-seen order kept.
pub(crate) fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = Vec::new();
    for tag in normalize_entries(tags) {
        if !seen.contains(&tag) {
            seen.push(tag);
        }
    }
    seen
}
