//! HTTP route handlers for the memory API.
//!
//! Every instance-scoped handler passes the Access Guard before touching any
//! store. Failures map to a stable `{error, code}` body; store internals and
//! credentials never reach a response.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use engram_common::{
    Decision, DocumentMeta, Episode, MemoryError, NewDecision, NewDocument, NewEpisode, Profile,
    ProfilePatch,
};
use engram_memory::{DecisionFilter, EpisodeFilter, SearchRequest, SearchResponse};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use crate::auth::Credentials;
use crate::compat::{self, RecordOp};
use crate::AppState;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<MemoryError> for ApiError {
    fn from(err: MemoryError) -> Self {
        let status = match &err {
            MemoryError::Unauthorized => StatusCode::UNAUTHORIZED,
            MemoryError::Validation(_) => StatusCode::BAD_REQUEST,
            MemoryError::NotFound(_) => StatusCode::NOT_FOUND,
            MemoryError::QuotaExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            MemoryError::EmptyContent => StatusCode::UNPROCESSABLE_ENTITY,
            MemoryError::Upstream(_) => StatusCode::BAD_GATEWAY,
            MemoryError::Storage(_) | MemoryError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Store-layer failures stay in the logs; the response carries a
        // generic message.
        let message = match &err {
            MemoryError::Storage(_) | MemoryError::Serialization(_) => {
                error!(error = %err, "Store failure");
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };

        Self {
            status,
            body: ErrorBody {
                error: message,
                code: err.code(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    instance_id: &str,
    query_key: Option<String>,
) -> Result<(), ApiError> {
    let credentials = Credentials::from_headers(headers).with_query_key(query_key);
    state.guard.authorize(instance_id, &credentials).await?;
    Ok(())
}

// ============================================================================
// Health
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

/// Health check endpoint. The only route exempt from the Access Guard.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
    })
}

// ============================================================================
// Decisions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListDecisionsQuery {
    /// Comma-separated tag filter.
    pub tags: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub key: Option<String>,
}

pub async fn store_decision(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<NewDecision>,
) -> Result<(StatusCode, Json<Decision>), ApiError> {
    authorize(&state, &headers, &instance_id, None).await?;
    let decision = state.decisions.store(&instance_id, body).await?;
    Ok((StatusCode::CREATED, Json(decision)))
}

pub async fn list_decisions(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListDecisionsQuery>,
) -> Result<Json<Vec<Decision>>, ApiError> {
    authorize(&state, &headers, &instance_id, query.key.clone()).await?;

    let filter = DecisionFilter {
        tags: query
            .tags
            .as_deref()
            .map(compat::split_commas)
            .unwrap_or_default(),
        since: query.since,
        limit: query.limit,
        offset: query.offset,
    };

    Ok(Json(state.decisions.list(&instance_id, filter).await?))
}

pub async fn get_decision(
    State(state): State<Arc<AppState>>,
    Path((instance_id, id)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
) -> Result<Json<Decision>, ApiError> {
    authorize(&state, &headers, &instance_id, query.key).await?;

    let decision = state
        .decisions
        .get(&instance_id, &id)
        .await?
        .ok_or_else(|| MemoryError::not_found(format!("decision {}", id)))?;

    Ok(Json(decision))
}

#[derive(Debug, Deserialize)]
pub struct OutcomeRequest {
    pub outcome: String,
}

pub async fn update_decision_outcome(
    State(state): State<Arc<AppState>>,
    Path((instance_id, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<OutcomeRequest>,
) -> Result<Json<Decision>, ApiError> {
    authorize(&state, &headers, &instance_id, None).await?;

    let decision = state
        .decisions
        .update_outcome(&instance_id, &id, &body.outcome)
        .await?;

    Ok(Json(decision))
}

// ============================================================================
// Episodes
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListEpisodesQuery {
    pub sender_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub key: Option<String>,
}

pub async fn store_episode(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<NewEpisode>,
) -> Result<(StatusCode, Json<Episode>), ApiError> {
    authorize(&state, &headers, &instance_id, None).await?;
    let episode = state.episodes.store(&instance_id, body).await?;
    Ok((StatusCode::CREATED, Json(episode)))
}

pub async fn list_episodes(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListEpisodesQuery>,
) -> Result<Json<Vec<Episode>>, ApiError> {
    authorize(&state, &headers, &instance_id, query.key.clone()).await?;

    let filter = EpisodeFilter {
        sender_id: query.sender_id,
        since: query.since,
        limit: query.limit,
    };

    Ok(Json(state.episodes.list(&instance_id, filter).await?))
}

// ============================================================================
// Profiles
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: Option<String>,
}

pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path((instance_id, sender_id)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
) -> Result<Json<Profile>, ApiError> {
    authorize(&state, &headers, &instance_id, query.key).await?;

    let profile = state
        .profiles
        .get(&instance_id, &sender_id)
        .await?
        .ok_or_else(|| MemoryError::not_found(format!("profile for sender {}", sender_id)))?;

    Ok(Json(profile))
}

pub async fn upsert_profile(
    State(state): State<Arc<AppState>>,
    Path((instance_id, sender_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<Profile>, ApiError> {
    authorize(&state, &headers, &instance_id, None).await?;

    let profile = state
        .profiles
        .upsert(&instance_id, &sender_id, patch)
        .await?;

    Ok(Json(profile))
}

pub async fn delete_profile(
    State(state): State<Arc<AppState>>,
    Path((instance_id, sender_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, &instance_id, None).await?;
    state.profiles.delete(&instance_id, &sender_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Documents
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListDocumentsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub key: Option<String>,
}

pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListDocumentsQuery>,
) -> Result<Json<Vec<DocumentMeta>>, ApiError> {
    authorize(&state, &headers, &instance_id, query.key.clone()).await?;

    Ok(Json(
        state
            .documents
            .list(&instance_id, query.limit, query.offset)
            .await?,
    ))
}

pub async fn ingest_document(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<NewDocument>,
) -> Result<(StatusCode, Json<DocumentMeta>), ApiError> {
    authorize(&state, &headers, &instance_id, None).await?;
    let document = state.documents.ingest(&instance_id, body).await?;
    Ok((StatusCode::CREATED, Json(document.meta())))
}

pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path((instance_id, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, &instance_id, None).await?;
    state.documents.delete(&instance_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Unified search
// ============================================================================

pub async fn search(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    authorize(&state, &headers, &instance_id, None).await?;
    Ok(Json(state.retriever.search(&instance_id, request).await?))
}

// ============================================================================
// GET-only write compatibility
// ============================================================================

pub async fn record(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers, &instance_id, params.get("key").cloned()).await?;

    let value = match compat::parse_record(&params)? {
        RecordOp::Decision(new) => {
            let decision = state.decisions.store(&instance_id, new).await?;
            serde_json::to_value(decision).map_err(MemoryError::from)?
        }
        RecordOp::Episode(new) => {
            let episode = state.episodes.store(&instance_id, new).await?;
            serde_json::to_value(episode).map_err(MemoryError::from)?
        }
        RecordOp::Profile { sender_id, patch } => {
            let profile = state.profiles.upsert(&instance_id, &sender_id, patch).await?;
            serde_json::to_value(profile).map_err(MemoryError::from)?
        }
        RecordOp::Outcome {
            decision_id,
            outcome,
        } => {
            let decision = state
                .decisions
                .update_outcome(&instance_id, &decision_id, &outcome)
                .await?;
            serde_json::to_value(decision).map_err(MemoryError::from)?
        }
    };

    Ok(Json(value))
}

// ============================================================================
// Instance config
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub instance_id: String,
    pub memory_api_key: String,
    pub max_documents_mb: f64,
    pub used_mb: f64,
}

pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
) -> Result<Json<ConfigResponse>, ApiError> {
    authorize(&state, &headers, &instance_id, query.key).await?;

    let config = state.configs.get_or_create(&instance_id).await?;
    let used_mb = state.quota.usage_mb(&instance_id).await?;

    Ok(Json(ConfigResponse {
        instance_id: config.instance_id,
        memory_api_key: config.memory_api_key,
        max_documents_mb: config.max_documents_mb,
        used_mb,
    }))
}

pub async fn rotate_key(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ConfigResponse>, ApiError> {
    authorize(&state, &headers, &instance_id, None).await?;

    let config = state.configs.rotate_key(&instance_id).await?;
    let used_mb = state.quota.usage_mb(&instance_id).await?;

    Ok(Json(ConfigResponse {
        instance_id: config.instance_id,
        memory_api_key: config.memory_api_key,
        max_documents_mb: config.max_documents_mb,
        used_mb,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_shape() {
        let err: ApiError = MemoryError::validation("query must not be empty").into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.code, "VALIDATION");

        let json = serde_json::to_string(&err.body).unwrap();
        assert!(json.contains("query must not be empty"));
        assert!(json.contains("VALIDATION"));
    }

    #[test]
    fn storage_errors_are_masked() {
        let err: ApiError = MemoryError::Storage(sqlx::Error::PoolClosed).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body.error, "internal storage error");
    }

    #[test]
    fn unauthorized_maps_to_401_with_opaque_message() {
        let err: ApiError = MemoryError::Unauthorized.into();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.body.error, "Unauthorized");
        assert_eq!(err.body.code, "UNAUTHORIZED");
    }

    #[test]
    fn quota_maps_to_413() {
        let err: ApiError = MemoryError::QuotaExceeded {
            used_mb: 6.0,
            requested_mb: 6.0,
            quota_mb: 10.0,
        }
        .into();
        assert_eq!(err.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.body.code, "QUOTA_EXCEEDED");
    }

    #[test]
    fn outcome_request_deserializes() {
        let body: OutcomeRequest = serde_json::from_str(r#"{"outcome": "user upgraded"}"#).unwrap();
        assert_eq!(body.outcome, "user upgraded");
    }
}
