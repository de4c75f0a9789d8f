//! HTTP API for the Engram memory service.
//!
//! Exposes one deployed agent instance's durable memory — decisions,
//! episodes, per-sender profiles and the knowledge document corpus — to the
//! agent itself (via its memory API key) and to the owning operator (via a
//! session).
//!
//! # Endpoints
//!
//! All memory routes live under `/api/v1/instances/{instance_id}/memory` and
//! pass the Access Guard first.
//!
//! - `POST /decisions`, `GET /decisions`, `GET /decisions/{id}`,
//!   `POST /decisions/{id}/outcome`
//! - `POST /episodes`, `GET /episodes`
//! - `GET|PUT|DELETE /profiles/{sender_id}`
//! - `GET /documents`, `POST /documents`, `DELETE /documents/{id}`
//! - `POST /search` — unified retrieval across all four stores
//! - `GET /record` — GET-only variant of every write operation
//! - `GET /config`, `POST /config/rotate-key`
//! - `GET /health` — unauthenticated liveness
//!
//! # Architecture
//!
//! ```text
//! Agent runtime / operator dashboard
//!    │
//!    ▼
//! ┌─────────────────┐
//! │   API (axum)    │ ◄── this crate: Access Guard + routes
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  engram-memory  │ ──► │ Embedding        │
//! │  stores + quota │     │ provider (HTTP,  │
//! │  + retrieval    │     │ may be down)     │
//! └─────────────────┘     └──────────────────┘
//! ```

pub mod auth;
pub mod compat;
pub mod config;
pub mod routes;
pub mod state;

use axum::{
    http::HeaderValue,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use auth::{AccessGuard, Authorizer, Credentials};
pub use config::ServiceConfig;
pub use state::AppState;

/// Create the API router with all routes configured.
pub fn create_router(state: Arc<AppState>, cors_origins: Option<Vec<String>>) -> Router {
    let memory_routes = Router::new()
        .route(
            "/decisions",
            post(routes::store_decision).get(routes::list_decisions),
        )
        .route("/decisions/{id}", get(routes::get_decision))
        .route(
            "/decisions/{id}/outcome",
            post(routes::update_decision_outcome),
        )
        .route(
            "/episodes",
            post(routes::store_episode).get(routes::list_episodes),
        )
        .route(
            "/profiles/{sender_id}",
            get(routes::get_profile)
                .put(routes::upsert_profile)
                .delete(routes::delete_profile),
        )
        .route(
            "/documents",
            get(routes::list_documents).post(routes::ingest_document),
        )
        .route("/documents/{id}", delete(routes::delete_document))
        .route("/search", post(routes::search))
        .route("/record", get(routes::record))
        .route("/config", get(routes::get_config))
        .route("/config/rotate-key", post(routes::rotate_key));

    Router::new()
        .route("/health", get(routes::health))
        .nest("/api/v1/instances/{instance_id}/memory", memory_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: Option<Vec<String>>) -> CorsLayer {
    match origins {
        Some(origins) if !origins.iter().any(|o| o == "*") => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}

/// Start the API server on the given address.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let router = create_router(state, cors_origins_from_env());

    info!(%addr, "Starting Engram memory API");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn cors_origins_from_env() -> Option<Vec<String>> {
    std::env::var("ENGRAM_CORS_ORIGINS")
        .ok()
        .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
}
