//! Client for an OpenAI-compatible `/embeddings` endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::error::{IndexerError, Result};

pub struct EmbeddingClient {
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl EmbeddingClient {
    /// `Ok(None)` when no endpoint is configured. A configured endpoint
    /// without its credential is a configuration error.
    pub fn from_config(config: &SearchConfig) -> Result<Option<Self>> {
        let Some(endpoint) = config
            .embedding_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
        else {
            return Ok(None);
        };

        let api_key = std::env::var(&config.embedding_api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                IndexerError::Configuration(format!(
                    "embedding endpoint {} is configured but ${} is not set",
                    endpoint, config.embedding_api_key_env
                ))
            })?;

        let timeout = Duration::from_secs(config.embedding_timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexerError::Embedding(format!("failed to build http client: {}", e)))?;

        Ok(Some(Self {
            endpoint: endpoint.to_string(),
            model: config.embedding_model.clone(),
            api_key,
            timeout,
            http,
        }))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let payload = EmbeddingsRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        };
        let response = self
            .http
            .post(self.embeddings_url())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    IndexerError::Embedding(format!(
                        "request timed out after {:?} (model={})",
                        self.timeout, self.model
                    ))
                } else {
                    IndexerError::Embedding(format!("request failed (model={}): {}", self.model, e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IndexerError::Embedding(format!("failed to read response body: {}", e)))?;
        if !status.is_success() {
            return Err(IndexerError::Embedding(format!(
                "endpoint returned HTTP {}: {}",
                status,
                truncate_for_error(&body)
            )));
        }

        let parsed: EmbeddingsResponse = serde_json::from_str(&body).map_err(|e| {
            IndexerError::Embedding(format!(
                "invalid JSON from endpoint: {} (body={})",
                e,
                truncate_for_error(&body)
            ))
        })?;
        if parsed.data.len() != texts.len() {
            return Err(IndexerError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn embeddings_url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        if endpoint.ends_with("/embeddings") {
            endpoint.to_string()
        } else if endpoint.ends_with("/v1") {
            format!("{}/embeddings", endpoint)
        } else {
            format!("{}/v1/embeddings", endpoint)
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

fn truncate_for_error(value: &str) -> String {
    const LIMIT: usize = 400;
    match value.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &value[..cut]),
        None => value.to_string(),
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: Option<&str>, key_env: &str) -> SearchConfig {
        SearchConfig {
            embedding_endpoint: endpoint.map(str::to_string),
            embedding_api_key_env: key_env.to_string(),
            ..SearchConfig::default()
        }
    }

    #[test]
    fn test_no_endpoint_means_no_client() {
        assert!(EmbeddingClient::from_config(&config(None, "UNUSED"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_missing_credential_is_configuration_error() {
        let result = EmbeddingClient::from_config(&config(
            Some("https://api.example.invalid/v1"),
            "API_INDEXER_TEST_NEVER_SET",
        ));
        assert!(matches!(result, Err(IndexerError::Configuration(_))));
    }

    #[test]
    fn test_embeddings_url() {
        std::env::set_var("API_INDEXER_TEST_EMBED_KEY", "secret");
        for (endpoint, expected) in [
            ("https://api.openai.com/v1", "https://api.openai.com/v1/embeddings"),
            ("http://localhost:8080/", "http://localhost:8080/v1/embeddings"),
            ("http://host/v1/embeddings", "http://host/v1/embeddings"),
        ] {
            let client = EmbeddingClient::from_config(&config(Some(endpoint), "API_INDEXER_TEST_EMBED_KEY"))
                .unwrap()
                .unwrap();
            assert_eq!(client.embeddings_url(), expected);
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
