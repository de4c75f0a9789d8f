//! Unified retrieval across all four memory stores.
//!
//! One query fans out to documents, decisions, episodes and the sender's
//! profile. Document retrieval is hybrid: vector similarity when the
//! embedding provider answers, lexical term overlap when it does not. The
//! enabled fetches run concurrently; each store read may be a separate
//! round-trip to storage.

use chrono::{DateTime, Utc};
use engram_common::{Decision, Episode, KnowledgeDocument, MemoryError, Profile, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::decisions::{DecisionFilter, DecisionStore};
use crate::documents::DocumentStore;
use crate::embedding::{cosine_similarity, EmbeddingClient, EmbeddingOutcome};
use crate::episodes::{EpisodeFilter, EpisodeStore};
use crate::profiles::ProfileStore;

pub const MAX_TOP_K: usize = 20;
pub const DEFAULT_TOP_K: usize = 5;

/// Sender used for episode filtering and profile lookup when the caller
/// names none.
pub const DEFAULT_SENDER: &str = "default";

const EXCERPT_CHARS: usize = 500;
const FILENAME_MATCH_BONUS: f32 = 0.25;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,

    #[serde(default)]
    pub top_k: Option<usize>,

    #[serde(default)]
    pub sender_id: Option<String>,

    #[serde(default = "default_true")]
    pub include_docs: bool,
    #[serde(default = "default_true")]
    pub include_decisions: bool,
    #[serde(default = "default_true")]
    pub include_episodes: bool,
    #[serde(default = "default_true")]
    pub include_profile: bool,
}

fn default_true() -> bool {
    true
}

/// A ranked document match. Content is trimmed to an excerpt; full documents
/// stay in the store.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentHit {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub score: f32,
    pub excerpt: String,
    pub created_at: DateTime<Utc>,
}

/// Disabled categories come back empty (null for the profile), never absent
/// from the shape.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub profile: Option<Profile>,
    pub decisions: Vec<Decision>,
    pub episodes: Vec<Episode>,
    pub documents: Vec<DocumentHit>,
}

pub struct Retriever {
    decisions: DecisionStore,
    episodes: EpisodeStore,
    profiles: ProfileStore,
    documents: DocumentStore,
    embedder: Arc<dyn EmbeddingClient>,
}

impl Retriever {
    pub fn new(
        decisions: DecisionStore,
        episodes: EpisodeStore,
        profiles: ProfileStore,
        documents: DocumentStore,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Self {
        Self {
            decisions,
            episodes,
            profiles,
            documents,
            embedder,
        }
    }

    pub async fn search(&self, instance_id: &str, request: SearchRequest) -> Result<SearchResponse> {
        let SearchRequest {
            query,
            top_k,
            sender_id,
            include_docs,
            include_decisions,
            include_episodes,
            include_profile,
        } = request;

        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(MemoryError::validation("query must not be empty"));
        }

        let top_k = clamp_top_k(top_k);
        let sender_id = sender_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SENDER.to_string());

        debug!(
            instance_id = %instance_id,
            top_k = top_k,
            sender_id = %sender_id,
            "Running unified memory search"
        );

        // A disabled category is skipped entirely: no store read, no
        // embedding call.
        let documents_fut = async {
            if include_docs {
                self.search_documents(instance_id, &query, top_k).await
            } else {
                Ok(Vec::new())
            }
        };

        let decisions_fut = async {
            if include_decisions {
                self.decisions
                    .list(
                        instance_id,
                        DecisionFilter {
                            limit: Some(top_k as i64),
                            ..Default::default()
                        },
                    )
                    .await
            } else {
                Ok(Vec::new())
            }
        };

        let episodes_fut = async {
            if include_episodes {
                self.episodes
                    .list(
                        instance_id,
                        EpisodeFilter {
                            sender_id: Some(sender_id.clone()),
                            limit: Some(top_k as i64),
                            ..Default::default()
                        },
                    )
                    .await
            } else {
                Ok(Vec::new())
            }
        };

        let profile_fut = async {
            if include_profile {
                self.profiles.get(instance_id, &sender_id).await
            } else {
                Ok(None)
            }
        };

        let (documents, decisions, episodes, profile) =
            tokio::join!(documents_fut, decisions_fut, episodes_fut, profile_fut);

        Ok(SearchResponse {
            profile: profile?,
            decisions: decisions?,
            episodes: episodes?,
            documents: documents?,
        })
    }

    /// One embedding attempt per query. `Unavailable` is never an error
    /// here: the search degrades to lexical matching instead.
    async fn search_documents(
        &self,
        instance_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<DocumentHit>> {
        let documents = self.documents.load_all(instance_id).await?;

        match self.embedder.embed(query).await {
            EmbeddingOutcome::Embedded(query_vector) => {
                Ok(rank_by_similarity(documents, &query_vector, top_k))
            }
            EmbeddingOutcome::Unavailable => {
                debug!(
                    instance_id = %instance_id,
                    "Embedding unavailable, using lexical document search"
                );
                Ok(rank_lexical(documents, query, top_k))
            }
        }
    }
}

fn clamp_top_k(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K)
}

/// Vector mode: only documents with a stored embedding participate.
fn rank_by_similarity(
    documents: Vec<KnowledgeDocument>,
    query_vector: &[f32],
    top_k: usize,
) -> Vec<DocumentHit> {
    let mut scored: Vec<(f32, KnowledgeDocument)> = documents
        .into_iter()
        .filter_map(|doc| {
            let score = doc
                .embedding
                .as_deref()
                .map(|embedding| cosine_similarity(embedding, query_vector))?;
            Some((score, doc))
        })
        .collect();

    sort_hits(&mut scored);
    scored.truncate(top_k);
    scored.into_iter().map(|(score, doc)| hit(score, doc)).collect()
}

/// Lexical fallback: fraction of query terms present in the content, with a
/// bonus for filename matches. Only positive scores are returned.
fn rank_lexical(
    documents: Vec<KnowledgeDocument>,
    query: &str,
    top_k: usize,
) -> Vec<DocumentHit> {
    let terms: Vec<String> = {
        let mut terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        terms.sort();
        terms.dedup();
        terms
    };

    if terms.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(f32, KnowledgeDocument)> = documents
        .into_iter()
        .filter_map(|doc| {
            let score = lexical_score(&terms, &doc);
            (score > 0.0).then_some((score, doc))
        })
        .collect();

    sort_hits(&mut scored);
    scored.truncate(top_k);
    scored.into_iter().map(|(score, doc)| hit(score, doc)).collect()
}

fn lexical_score(terms: &[String], doc: &KnowledgeDocument) -> f32 {
    let content = doc.content.to_lowercase();
    let filename = doc.filename.to_lowercase();

    let matched = terms.iter().filter(|term| content.contains(*term)).count();
    let mut score = matched as f32 / terms.len() as f32;

    if terms.iter().any(|term| filename.contains(term)) {
        score += FILENAME_MATCH_BONUS;
    }

    score
}

/// Score descending, recency breaking ties.
fn sort_hits(scored: &mut [(f32, KnowledgeDocument)]) {
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.created_at.cmp(&a.1.created_at))
    });
}

fn hit(score: f32, doc: KnowledgeDocument) -> DocumentHit {
    DocumentHit {
        excerpt: excerpt(&doc.content),
        id: doc.id,
        filename: doc.filename,
        mime_type: doc.mime_type,
        score,
        created_at: doc.created_at,
    }
}

fn excerpt(content: &str) -> String {
    match content.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}
