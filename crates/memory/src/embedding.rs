//! Embedding provider client.
//!
//! The provider is an external collaborator that may be down, slow, or
//! unconfigured. Degraded operation is the expected path, so the client API
//! returns an explicit [`EmbeddingOutcome`] variant instead of an error:
//! callers branch on `Unavailable` (falling back to lexical search) rather
//! than catching failures.

use async_trait::async_trait;
use engram_common::MemoryError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "nomic-embed-text";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Result of one embedding attempt.
#[derive(Debug, Clone)]
pub enum EmbeddingOutcome {
    Embedded(Vec<f32>),
    /// Provider failed, timed out, or is not configured. Never fatal for the
    /// caller; search degrades to lexical mode and ingest stores no vector.
    Unavailable,
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> EmbeddingOutcome;
}

#[derive(Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct HttpEmbeddingClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpEmbeddingClient {
    pub fn new(
        base_url: Option<String>,
        model: Option<String>,
        api_key: Option<String>,
        timeout_ms: Option<u64>,
    ) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key,
            timeout: Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
            http_client: reqwest::Client::new(),
        }
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = EmbeddingsRequest {
            model: self.model.clone(),
            input: vec![text.to_string()],
        };

        let mut http_req = self.http_client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| MemoryError::Upstream(format!("embeddings request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(MemoryError::Upstream(format!(
                "embeddings API error {status}: {body_text}"
            )));
        }

        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| {
            MemoryError::Upstream(format!("failed to parse embeddings response: {e}"))
        })?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| MemoryError::Upstream("empty embeddings response".into()))
    }

    /// Build the request body for testing purposes.
    #[cfg(test)]
    fn build_request_body(&self, text: &str) -> EmbeddingsRequest {
        EmbeddingsRequest {
            model: self.model.clone(),
            input: vec![text.to_string()],
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> EmbeddingOutcome {
        match tokio::time::timeout(self.timeout, self.request(text)).await {
            Ok(Ok(vector)) => {
                debug!(dimension = vector.len(), "Generated query embedding");
                EmbeddingOutcome::Embedded(vector)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Embedding provider failed, degrading to lexical mode");
                EmbeddingOutcome::Unavailable
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Embedding provider timed out, degrading to lexical mode"
                );
                EmbeddingOutcome::Unavailable
            }
        }
    }
}

/// Cosine similarity of two vectors. Mismatched or zero-length inputs score
/// 0.0 instead of panicking: a stored vector from an older model must never
/// break a search.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_embeddings_format() {
        let client = HttpEmbeddingClient::new(
            None,
            Some("nomic-embed-text".into()),
            Some("sk-test".into()),
            None,
        );
        let body = client.build_request_body("hello world");
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "nomic-embed-text");
        assert_eq!(json["input"].as_array().unwrap().len(), 1);
        assert_eq!(json["input"][0], "hello world");
    }

    #[test]
    fn default_base_url_and_model() {
        let client = HttpEmbeddingClient::new(None, None, None, None);
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
        assert_eq!(client.model, DEFAULT_MODEL);
    }

    #[test]
    fn cosine_similarity_basics() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn cosine_similarity_is_defensive_about_shapes() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn unreachable_provider_degrades_instead_of_erroring() {
        // Port 9 (discard) is a safe never-listening target.
        let client = HttpEmbeddingClient::new(
            Some("http://127.0.0.1:9".into()),
            None,
            None,
            Some(250),
        );
        match client.embed("anything").await {
            EmbeddingOutcome::Unavailable => {}
            EmbeddingOutcome::Embedded(_) => panic!("expected Unavailable"),
        }
    }
}
