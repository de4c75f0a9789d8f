//! Application state for the API server.

use engram_memory::{
    ConfigStore, DecisionStore, DocumentStore, EmbeddingClient, EpisodeStore, ProfileStore,
    QuotaTracker, Retriever,
};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;

use crate::auth::AccessGuard;

/// Shared application state: one handle per store plus the Access Guard and
/// the retrieval orchestrator. Handlers are stateless; everything here is a
/// cheap clone over the shared pool.
pub struct AppState {
    pub configs: ConfigStore,
    pub decisions: DecisionStore,
    pub episodes: EpisodeStore,
    pub profiles: ProfileStore,
    pub documents: DocumentStore,
    pub quota: QuotaTracker,
    pub retriever: Retriever,
    pub guard: AccessGuard,

    /// Server start time (for health checks)
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<dyn EmbeddingClient>,
        default_quota_mb: f64,
    ) -> Self {
        let configs = ConfigStore::with_default_quota(pool.clone(), default_quota_mb);
        let decisions = DecisionStore::new(pool.clone());
        let episodes = EpisodeStore::new(pool.clone());
        let profiles = ProfileStore::new(pool.clone());
        let documents = DocumentStore::new(pool.clone(), configs.clone(), embedder.clone());
        let quota = QuotaTracker::new(pool);

        let retriever = Retriever::new(
            decisions.clone(),
            episodes.clone(),
            profiles.clone(),
            documents.clone(),
            embedder,
        );

        let guard = AccessGuard::new(configs.clone());

        Self {
            configs,
            decisions,
            episodes,
            profiles,
            documents,
            quota,
            retriever,
            guard,
            start_time: std::time::Instant::now(),
        }
    }

    /// Get the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
