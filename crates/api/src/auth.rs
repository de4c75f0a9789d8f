//! Access Guard: dual-mode authorization for instance memory.
//!
//! Two independent paths can authorize a request, tried in sequence:
//!
//! 1. **Session path** — an operator session token; authorized iff that
//!    operator owns the target instance.
//! 2. **Secret path** — the instance's memory API key as a bearer token
//!    (or `key` query parameter for GET-only integrations).
//!
//! Handlers depend only on the guard's single yes/no outcome, never on which
//! path answered. Denial is one opaque `Unauthorized`: the response does not
//! distinguish "instance unknown" from "wrong credential" from "session not
//! owner".

use async_trait::async_trait;
use axum::http::HeaderMap;
use engram_common::{MemoryError, Result};
use engram_memory::ConfigStore;
use tracing::warn;

const SESSION_HEADER: &str = "x-session-token";

/// Credentials extracted from a request. All fields optional; the guard
/// decides which (if any) authorize.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub session_token: Option<String>,
    pub bearer_token: Option<String>,
    /// `key` query parameter. Accepted on GET routes only, for callers whose
    /// tooling cannot set headers.
    pub query_key: Option<String>,
}

impl Credentials {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let bearer_token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);

        let session_token = headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self {
            session_token,
            bearer_token,
            query_key: None,
        }
    }

    pub fn with_query_key(mut self, key: Option<String>) -> Self {
        self.query_key = key;
        self
    }
}

/// One authorization capability. Implementations answer `Ok(false)` for
/// "this path does not apply", reserving errors for storage failures.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, instance_id: &str, credentials: &Credentials) -> Result<bool>;
}

/// Operator-session path.
pub struct SessionAuthorizer {
    configs: ConfigStore,
}

impl SessionAuthorizer {
    pub fn new(configs: ConfigStore) -> Self {
        Self { configs }
    }
}

#[async_trait]
impl Authorizer for SessionAuthorizer {
    async fn authorize(&self, instance_id: &str, credentials: &Credentials) -> Result<bool> {
        let Some(token) = credentials.session_token.as_deref() else {
            return Ok(false);
        };

        let Some(operator) = self.configs.operator_for_session(token).await? else {
            return Ok(false);
        };

        let Some(owner) = self.configs.owner_of(instance_id).await? else {
            return Ok(false);
        };

        Ok(owner == operator)
    }
}

/// Per-instance secret path.
pub struct SecretAuthorizer {
    configs: ConfigStore,
}

impl SecretAuthorizer {
    pub fn new(configs: ConfigStore) -> Self {
        Self { configs }
    }
}

#[async_trait]
impl Authorizer for SecretAuthorizer {
    async fn authorize(&self, instance_id: &str, credentials: &Credentials) -> Result<bool> {
        let provided = credentials
            .bearer_token
            .as_deref()
            .or(credentials.query_key.as_deref());

        let Some(provided) = provided else {
            return Ok(false);
        };

        // Lazy creation doubles as the opaqueness guarantee: an instance
        // nobody has touched gets a fresh random key here, and the caller's
        // guess cannot match it.
        let config = self.configs.get_or_create(instance_id).await?;

        Ok(constant_time_eq(
            config.memory_api_key.as_bytes(),
            provided.as_bytes(),
        ))
    }
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    // XOR all bytes and accumulate — constant time regardless of where mismatch occurs
    let mut result: u8 = 0;
    for (a, b) in expected.iter().zip(provided.iter()) {
        result |= a ^ b;
    }
    result == 0
}

/// The guard itself: authorization paths tried in sequence, first success
/// wins, all failures collapse into one opaque denial.
pub struct AccessGuard {
    authorizers: Vec<Box<dyn Authorizer>>,
}

impl AccessGuard {
    pub fn new(configs: ConfigStore) -> Self {
        Self {
            authorizers: vec![
                Box::new(SessionAuthorizer::new(configs.clone())),
                Box::new(SecretAuthorizer::new(configs)),
            ],
        }
    }

    pub async fn authorize(&self, instance_id: &str, credentials: &Credentials) -> Result<()> {
        for authorizer in &self.authorizers {
            if authorizer.authorize(instance_id, credentials).await? {
                return Ok(());
            }
        }

        warn!(instance_id = %instance_id, "Memory access denied");
        Err(MemoryError::Unauthorized)
    }
}
