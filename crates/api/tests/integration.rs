//! Integration tests for the memory API.
//!
//! These tests spin up a real HTTP server on a random port and drive it with
//! reqwest, exercising both authorization paths end to end. The embedding
//! provider is absent throughout, so document search runs in lexical mode.

use async_trait::async_trait;
use engram_api::{create_router, AppState};
use engram_memory::{db, ConfigStore, EmbeddingClient, EmbeddingOutcome};
use std::sync::Arc;
use tempfile::TempDir;

const INSTANCE: &str = "inst-1";
const SESSION: &str = "sess-op1";
const MEMORY_BASE: &str = "/api/v1/instances/inst-1/memory";

/// Provider that is always down: search must degrade, never fail.
struct NoEmbeddings;

#[async_trait]
impl EmbeddingClient for NoEmbeddings {
    async fn embed(&self, _text: &str) -> EmbeddingOutcome {
        EmbeddingOutcome::Unavailable
    }
}

struct TestServer {
    base: String,
    configs: ConfigStore,
    _dir: TempDir,
}

/// Spin up a test server on a random port, seeding the ownership and session
/// rows the provisioning/identity layers would normally write.
async fn start_test_server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engram.db");
    let pool = db::connect(path.to_str().unwrap()).await.unwrap();

    let state = Arc::new(AppState::new(pool, Arc::new(NoEmbeddings), 50.0));
    let configs = state.configs.clone();
    configs.upsert_owner(INSTANCE, "op-1").await.unwrap();
    configs.upsert_session(SESSION, "op-1").await.unwrap();

    let router = create_router(state, Some(vec!["*".to_string()]));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        configs,
        _dir: dir,
    }
}

/// Helper to GET a path with headers and return (status, body_string).
async fn get(base: &str, path: &str, headers: &[(&str, &str)]) -> (u16, String) {
    let client = reqwest::Client::new();
    let mut req = client.get(format!("{}{}", base, path));
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    let resp = req.send().await.unwrap();
    (resp.status().as_u16(), resp.text().await.unwrap())
}

/// Helper to send JSON with the given method and return (status, body_string).
async fn send_json(
    method: reqwest::Method,
    base: &str,
    path: &str,
    headers: &[(&str, &str)],
    json: &str,
) -> (u16, String) {
    let client = reqwest::Client::new();
    let mut req = client
        .request(method, format!("{}{}", base, path))
        .header("content-type", "application/json")
        .body(json.to_string());
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    let resp = req.send().await.unwrap();
    (resp.status().as_u16(), resp.text().await.unwrap())
}

async fn post_json(base: &str, path: &str, headers: &[(&str, &str)], json: &str) -> (u16, String) {
    send_json(reqwest::Method::POST, base, path, headers, json).await
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap()
}

/// Read the instance's memory API key over the session path.
async fn memory_key(server: &TestServer) -> String {
    let (status, body) = get(
        &server.base,
        &format!("{MEMORY_BASE}/config"),
        &[("x-session-token", SESSION)],
    )
    .await;
    assert_eq!(status, 200, "config read failed: {}", body);
    json(&body)["memory_api_key"].as_str().unwrap().to_string()
}

fn bearer(key: &str) -> String {
    format!("Bearer {}", key)
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn health_needs_no_credentials() {
    let server = start_test_server().await;
    let (status, body) = get(&server.base, "/health", &[]).await;
    assert_eq!(status, 200);
    assert!(body.contains("healthy"));
}

// ============================================================================
// Access guard
// ============================================================================

#[tokio::test]
async fn requests_without_credentials_are_rejected() {
    let server = start_test_server().await;
    let (status, body) = post_json(
        &server.base,
        &format!("{MEMORY_BASE}/decisions"),
        &[],
        r#"{"context": "c", "decision": "d", "reasoning": ["r"]}"#,
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(json(&body)["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn denial_does_not_reveal_whether_the_instance_exists() {
    let server = start_test_server().await;

    let (status_known, body_known) = get(
        &server.base,
        &format!("{MEMORY_BASE}/config"),
        &[("authorization", "Bearer emk_wrong")],
    )
    .await;
    let (status_unknown, body_unknown) = get(
        &server.base,
        "/api/v1/instances/no-such-instance/memory/config",
        &[("authorization", "Bearer emk_wrong")],
    )
    .await;

    assert_eq!(status_known, 401);
    assert_eq!(status_unknown, 401);
    assert_eq!(body_known, body_unknown);
}

#[tokio::test]
async fn session_of_a_non_owner_is_rejected() {
    let server = start_test_server().await;
    server.configs.upsert_session("sess-other", "op-2").await.unwrap();

    let (status, _) = get(
        &server.base,
        &format!("{MEMORY_BASE}/config"),
        &[("x-session-token", "sess-other")],
    )
    .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn rotate_key_invalidates_the_old_secret() {
    let server = start_test_server().await;
    let old_key = memory_key(&server).await;

    let (status, body) = post_json(
        &server.base,
        &format!("{MEMORY_BASE}/config/rotate-key"),
        &[("x-session-token", SESSION)],
        "",
    )
    .await;
    assert_eq!(status, 200);
    let new_key = json(&body)["memory_api_key"].as_str().unwrap().to_string();
    assert_ne!(old_key, new_key);

    let (status, _) = get(
        &server.base,
        &format!("{MEMORY_BASE}/decisions"),
        &[("authorization", &bearer(&old_key))],
    )
    .await;
    assert_eq!(status, 401);

    let (status, _) = get(
        &server.base,
        &format!("{MEMORY_BASE}/decisions"),
        &[("authorization", &bearer(&new_key))],
    )
    .await;
    assert_eq!(status, 200);
}

// ============================================================================
// Decisions
// ============================================================================

#[tokio::test]
async fn decision_lifecycle_over_http() {
    let server = start_test_server().await;
    let key = memory_key(&server).await;
    let auth = bearer(&key);
    let headers: &[(&str, &str)] = &[("authorization", &auth)];

    let (status, body) = post_json(
        &server.base,
        &format!("{MEMORY_BASE}/decisions"),
        headers,
        r#"{
            "context": "user exceeded limit",
            "decision": "recommend upgrade",
            "reasoning": ["over quota", "asked about features"]
        }"#,
    )
    .await;
    assert_eq!(status, 201);
    let id = json(&body)["id"].as_str().unwrap().to_string();

    let (status, body) = get(&server.base, &format!("{MEMORY_BASE}/decisions"), headers).await;
    assert_eq!(status, 200);
    let listed = json(&body);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], id.as_str());

    let (status, body) = get(
        &server.base,
        &format!("{MEMORY_BASE}/decisions/{id}"),
        headers,
    )
    .await;
    assert_eq!(status, 200);
    let fetched = json(&body);
    assert_eq!(fetched["context"], "user exceeded limit");
    assert_eq!(fetched["reasoning"][0], "over quota");
    assert_eq!(fetched["reasoning"][1], "asked about features");
    assert!(fetched.get("outcome").is_none());

    let (status, _) = post_json(
        &server.base,
        &format!("{MEMORY_BASE}/decisions/{id}/outcome"),
        headers,
        r#"{"outcome": "user upgraded"}"#,
    )
    .await;
    assert_eq!(status, 200);

    let (_, body) = get(
        &server.base,
        &format!("{MEMORY_BASE}/decisions/{id}"),
        headers,
    )
    .await;
    let closed = json(&body);
    assert_eq!(closed["outcome"], "user upgraded");
    assert!(closed["outcome_at"].is_string());
}

#[tokio::test]
async fn decision_without_reasoning_is_a_validation_error() {
    let server = start_test_server().await;
    let key = memory_key(&server).await;
    let auth = bearer(&key);

    let (status, body) = post_json(
        &server.base,
        &format!("{MEMORY_BASE}/decisions"),
        &[("authorization", &auth)],
        r#"{"context": "c", "decision": "d", "reasoning": []}"#,
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(json(&body)["code"], "VALIDATION");
}

#[tokio::test]
async fn missing_decision_is_404() {
    let server = start_test_server().await;
    let key = memory_key(&server).await;
    let auth = bearer(&key);

    let (status, body) = get(
        &server.base,
        &format!("{MEMORY_BASE}/decisions/not-a-real-id"),
        &[("authorization", &auth)],
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(json(&body)["code"], "NOT_FOUND");
}

// ============================================================================
// Episodes
// ============================================================================

#[tokio::test]
async fn episodes_store_and_filter_by_sender() {
    let server = start_test_server().await;
    let key = memory_key(&server).await;
    let auth = bearer(&key);
    let headers: &[(&str, &str)] = &[("authorization", &auth)];

    for (sender, summary) in [("ana", "talked pricing"), ("ben", "asked for docs")] {
        let (status, _) = post_json(
            &server.base,
            &format!("{MEMORY_BASE}/episodes"),
            headers,
            &format!(r#"{{"sender_id": "{sender}", "summary": "{summary}"}}"#),
        )
        .await;
        assert_eq!(status, 201);
    }

    // Secret path via query parameter, for GET-only callers
    let (status, body) = get(
        &server.base,
        &format!("{MEMORY_BASE}/episodes?sender_id=ana&key={key}"),
        &[],
    )
    .await;
    assert_eq!(status, 200);
    let episodes = json(&body);
    assert_eq!(episodes.as_array().unwrap().len(), 1);
    assert_eq!(episodes[0]["summary"], "talked pricing");
}

// ============================================================================
// Profiles
// ============================================================================

#[tokio::test]
async fn profile_upserts_merge_over_http() {
    let server = start_test_server().await;
    let key = memory_key(&server).await;
    let auth = bearer(&key);
    let headers: &[(&str, &str)] = &[("authorization", &auth)];

    let (status, _) = send_json(
        reqwest::Method::PUT,
        &server.base,
        &format!("{MEMORY_BASE}/profiles/ana"),
        headers,
        r#"{"name": "Ana"}"#,
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = send_json(
        reqwest::Method::PUT,
        &server.base,
        &format!("{MEMORY_BASE}/profiles/ana"),
        headers,
        r#"{"role": "admin"}"#,
    )
    .await;
    assert_eq!(status, 200);
    let merged = json(&body);
    assert_eq!(merged["name"], "Ana");
    assert_eq!(merged["role"], "admin");

    let (status, _) = send_json(
        reqwest::Method::DELETE,
        &server.base,
        &format!("{MEMORY_BASE}/profiles/ana"),
        headers,
        "",
    )
    .await;
    assert_eq!(status, 204);

    let (status, body) = get(
        &server.base,
        &format!("{MEMORY_BASE}/profiles/ana"),
        headers,
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(json(&body)["code"], "NOT_FOUND");
}

// ============================================================================
// Documents & quota
// ============================================================================

#[tokio::test]
async fn document_quota_is_enforced_over_http() {
    let server = start_test_server().await;
    server.configs.set_quota(INSTANCE, 10.0).await.unwrap();
    let key = memory_key(&server).await;
    let auth = bearer(&key);
    let headers: &[(&str, &str)] = &[("authorization", &auth)];

    let six_mb = 6 * 1024 * 1024;
    let (status, _) = post_json(
        &server.base,
        &format!("{MEMORY_BASE}/documents"),
        headers,
        &format!(
            r#"{{"filename": "first.txt", "content": "first document text", "size_bytes": {six_mb}}}"#
        ),
    )
    .await;
    assert_eq!(status, 201);

    let (status, body) = post_json(
        &server.base,
        &format!("{MEMORY_BASE}/documents"),
        headers,
        &format!(
            r#"{{"filename": "second.txt", "content": "second document text", "size_bytes": {six_mb}}}"#
        ),
    )
    .await;
    assert_eq!(status, 413);
    assert_eq!(json(&body)["code"], "QUOTA_EXCEEDED");

    let (_, body) = get(&server.base, &format!("{MEMORY_BASE}/documents"), headers).await;
    assert_eq!(json(&body).as_array().unwrap().len(), 1);

    let (_, body) = get(&server.base, &format!("{MEMORY_BASE}/config"), headers).await;
    assert_eq!(json(&body)["used_mb"], 6.0);
}

#[tokio::test]
async fn empty_extraction_is_a_distinct_error() {
    let server = start_test_server().await;
    let key = memory_key(&server).await;
    let auth = bearer(&key);

    let (status, body) = post_json(
        &server.base,
        &format!("{MEMORY_BASE}/documents"),
        &[("authorization", &auth)],
        r#"{"filename": "scan.pdf", "content": "   ", "size_bytes": 1024}"#,
    )
    .await;
    assert_eq!(status, 422);
    assert_eq!(json(&body)["code"], "EMPTY_CONTENT");
}

// ============================================================================
// Unified search
// ============================================================================

#[tokio::test]
async fn search_returns_lexical_hits_when_embeddings_are_down() {
    let server = start_test_server().await;
    let key = memory_key(&server).await;
    let auth = bearer(&key);
    let headers: &[(&str, &str)] = &[("authorization", &auth)];

    for (filename, content) in [
        ("rust.md", "rust ownership and borrowing notes"),
        ("food.md", "cooking with garlic"),
    ] {
        let (status, _) = post_json(
            &server.base,
            &format!("{MEMORY_BASE}/documents"),
            headers,
            &format!(r#"{{"filename": "{filename}", "content": "{content}"}}"#),
        )
        .await;
        assert_eq!(status, 201);
    }

    let (status, body) = post_json(
        &server.base,
        &format!("{MEMORY_BASE}/search"),
        headers,
        r#"{"query": "rust ownership"}"#,
    )
    .await;
    assert_eq!(status, 200);
    let result = json(&body);
    assert_eq!(result["documents"].as_array().unwrap().len(), 1);
    assert_eq!(result["documents"][0]["filename"], "rust.md");
    assert!(result["profile"].is_null());
    assert!(result["decisions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn search_with_docs_disabled_returns_empty_documents() {
    let server = start_test_server().await;
    let key = memory_key(&server).await;
    let auth = bearer(&key);

    let (status, body) = post_json(
        &server.base,
        &format!("{MEMORY_BASE}/search"),
        &[("authorization", &auth)],
        r#"{"query": "anything", "include_docs": false}"#,
    )
    .await;
    assert_eq!(status, 200);
    assert!(json(&body)["documents"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn search_rejects_empty_queries() {
    let server = start_test_server().await;
    let key = memory_key(&server).await;
    let auth = bearer(&key);

    let (status, body) = post_json(
        &server.base,
        &format!("{MEMORY_BASE}/search"),
        &[("authorization", &auth)],
        r#"{"query": "  "}"#,
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(json(&body)["code"], "VALIDATION");
}

// ============================================================================
// GET-only write compatibility
// ============================================================================

#[tokio::test]
async fn record_endpoint_writes_via_get() {
    let server = start_test_server().await;
    let key = memory_key(&server).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}{}/record", server.base, MEMORY_BASE))
        .query(&[
            ("type", "decision"),
            ("context", "user exceeded limit"),
            ("decision", "recommend upgrade"),
            ("reasoning", "over quota|asked about features"),
            ("tags", "billing,upgrade"),
            ("key", key.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let decision: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(decision["reasoning"][0], "over quota");
    assert_eq!(decision["reasoning"][1], "asked about features");
    assert_eq!(decision["tags"][0], "billing");

    let decision_id = decision["id"].as_str().unwrap();
    let resp = client
        .get(format!("{}{}/record", server.base, MEMORY_BASE))
        .query(&[
            ("type", "outcome"),
            ("decision_id", decision_id),
            ("outcome", "user upgraded"),
            ("key", key.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let closed: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(closed["outcome"], "user upgraded");
    assert!(closed["outcome_at"].is_string());
}

#[tokio::test]
async fn record_endpoint_upserts_profiles_via_get() {
    let server = start_test_server().await;
    let key = memory_key(&server).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}{}/record", server.base, MEMORY_BASE))
        .query(&[
            ("type", "profile"),
            ("sender_id", "ana"),
            ("name", "Ana"),
            ("preferences", "short replies,markdown"),
            ("key", key.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let profile: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(profile["name"], "Ana");
    assert_eq!(profile["preferences"][1], "markdown");
}

#[tokio::test]
async fn record_endpoint_rejects_unknown_types() {
    let server = start_test_server().await;
    let key = memory_key(&server).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}{}/record", server.base, MEMORY_BASE))
        .query(&[("type", "banana"), ("key", key.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}
