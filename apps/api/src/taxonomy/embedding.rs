//! Embedding client for taxonomy queries.
//!
//! Talks to an OpenAI-compatible `/embeddings` endpoint. Query embeddings
//! must come from the same model that populated the skills index offline, so
//! the model name is recorded on every processing run.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::EngineError;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Clone)]
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client"),
            base_url,
            api_key,
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embeds a single query string.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| EngineError::VectorIndexUnavailable(format!("embedding call: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::VectorIndexUnavailable(format!(
                "embedding endpoint returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            EngineError::VectorIndexUnavailable(format!("embedding response parse: {e}"))
        })?;

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                EngineError::VectorIndexUnavailable("embedding response was empty".to_string())
            })?;

        debug!(dims = embedding.len(), "Embedded taxonomy query");
        Ok(embedding)
    }
}
