//! Embedding generation
//!
//! [`Embedder`] turns a batch of texts into vectors, order preserving.
//! [`OpenAiEmbedder`] calls an OpenAI-compatible `/embeddings` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{secret_from_env, EmbeddingConfig};
use crate::error::{Error, Result};

/// Produces one vector per input text, in input order
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Length of every vector this embedder returns
    fn dimension(&self) -> usize;
}

/// Request body for the `/embeddings` endpoint
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

/// Response body from the `/embeddings` endpoint
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedItem>,
}

#[derive(Debug, Deserialize)]
struct EmbedItem {
    embedding: Vec<f32>,
    index: usize,
}

/// Client for an OpenAI-compatible embedding service
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        dimension: usize,
        timeout_ms: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Embedding(format!("Failed to create HTTP client: {}", e)))?;

        info!("Created embedding client for {} ({})", base_url, model);
        Ok(Self {
            client,
            base_url,
            api_key,
            model,
            dimension,
        })
    }

    /// Build from config, reading the API key from the configured environment variable
    pub fn from_config(config: &EmbeddingConfig, dimension: usize) -> Result<Self> {
        let api_key = secret_from_env("embedding.api_key_env", &config.api_key_env)?;
        Self::new(
            config.base_url.clone(),
            api_key,
            config.model.clone(),
            dimension,
            config.timeout_ms,
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }
}

/// Order a response by its `index` field and check it against the request
fn collect_embeddings(
    mut data: Vec<EmbedItem>,
    expected_count: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected_count {
        return Err(Error::ContractViolation(format!(
            "embedding service returned {} vectors for {} inputs",
            data.len(),
            expected_count
        )));
    }

    // Keep the same order as input
    data.sort_by_key(|item| item.index);

    data.into_iter()
        .enumerate()
        .map(|(position, item)| {
            if item.index != position {
                Err(Error::ContractViolation(format!(
                    "embedding service returned index {} where {} was expected",
                    item.index, position
                )))
            } else if item.embedding.len() == dimension {
                Ok(item.embedding)
            } else {
                Err(Error::ContractViolation(format!(
                    "embedding {} has dimension {}, expected {}",
                    item.index,
                    item.embedding.len(),
                    dimension
                )))
            }
        })
        .collect()
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!("Requesting embeddings for {} texts", texts.len());

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
            dimensions: Some(self.dimension),
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "embedding service returned {}: {}",
                status, body
            )));
        }

        let result: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse embedding response: {}", e)))?;

        let embeddings = collect_embeddings(result.data, texts.len(), self.dimension)?;
        debug!("Received {} embeddings from {}", embeddings.len(), self.model);
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: usize, value: f32) -> EmbedItem {
        EmbedItem {
            embedding: vec![value; 3],
            index,
        }
    }

    #[test]
    fn test_collect_restores_input_order() {
        let data = vec![item(2, 0.3), item(0, 0.1), item(1, 0.2)];
        let vectors = collect_embeddings(data, 3, 3).unwrap();
        assert_eq!(vectors[0][0], 0.1);
        assert_eq!(vectors[1][0], 0.2);
        assert_eq!(vectors[2][0], 0.3);
    }

    #[test]
    fn test_collect_rejects_wrong_count() {
        let err = collect_embeddings(vec![item(0, 0.1)], 2, 3).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_collect_rejects_duplicate_index() {
        let err = collect_embeddings(vec![item(0, 0.1), item(0, 0.2)], 2, 3).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_collect_rejects_out_of_range_index() {
        let err = collect_embeddings(vec![item(0, 0.1), item(5, 0.2)], 2, 3).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_collect_rejects_wrong_dimension() {
        let err = collect_embeddings(vec![item(0, 0.1)], 1, 4).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_request_serialization() {
        let input = vec!["hello".to_string()];
        let request = EmbedRequest {
            model: "text-embedding-3-small",
            input: &input,
            encoding_format: "float",
            dimensions: Some(1536),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"][0], "hello");
        assert_eq!(json["dimensions"], 1536);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_request() {
        let embedder = OpenAiEmbedder::new(
            "http://127.0.0.1:9".to_string(),
            "key".to_string(),
            "model".to_string(),
            3,
            100,
        )
        .unwrap();
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }
}
